//! # Capacity broadcaster
//!
//! Advertises this cluster's spare capacity, prices and network
//! parameters to every peer cluster declared in the local store.
//!
//! ## Per-peer state machine
//!
//! ```text
//!  Discovering ──▶ Connecting ──(retries exhausted)──▶ Terminated
//!                      │
//!                      ▼
//!                 Publishing ◀──────▶ Sleeping
//!                      │
//!              (first success)
//!                      ▼
//!                  Watching   (parallel, at most once)
//! ```
//!
//! Every state ends in `Stopped` on shutdown.
//!
//! ## Pipeline
//!
//! Each cycle runs [`aggregator::aggregate`], a [`pricing::PricingPolicy`],
//! [`builder::build`] and [`publisher::publish`] in that order, with inputs
//! read fresh from the local store.

pub mod aggregator;
pub mod builder;
pub mod connector;
pub mod discovery;
pub mod pricing;
pub mod publisher;
pub mod scheduler;
pub mod watcher;

pub use aggregator::{aggregate, CapacitySnapshot, ImageSet};
pub use builder::{build, derive_pod_cidr, network_info, widen_pod_cidr};
pub use connector::{connect_with_retry, ConnectError, HttpConnector, PeerConnection, PeerConnector};
pub use discovery::{discover, PeerDescriptor};
pub use pricing::{BaselinePricing, PriceList, PricingPolicy};
pub use publisher::{publish, Ack, PublishError};
pub use scheduler::{
    BroadcastError, BroadcastHandle, Broadcaster, PeerEvent, PeerReport, PeerState, PeerStatus,
    PeerStatusBoard,
};
pub use watcher::{LifecycleHandler, LoggingHandler, Transition, WatchContext, WatchLatch};
