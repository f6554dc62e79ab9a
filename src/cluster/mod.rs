//! # Cluster data model
//!
//! Typed views of the objects the broadcaster reads and writes. The object
//! stores themselves live in [`crate::store`]; this module only describes
//! what flows through them.
//!
//! ## Resources
//!
//! - **ConfigRecord**: string key/value records; peer descriptors are stored
//!   as config records in the local cluster
//! - **Node**: local machines whose allocatable resources are advertised
//! - **Advertisement**: the record published on every peer
//!
//! ```text
//!   local store                         peer store
//!  ┌────────────────┐                  ┌───────────────────────────┐
//!  │ ConfigRecord   │──descriptors──▶  │                           │
//!  │ Node ...       │──snapshot────▶   │ Advertisement/<cluster>   │
//!  └────────────────┘                  └───────────────────────────┘
//! ```

pub mod advertisement;
pub mod node;
pub mod quantity;
pub mod resources;

pub use advertisement::{
    Advertisement, AdvertisementPhase, AdvertisementSpec, AdvertisementStatus, NetworkInfo,
    ADVERTISEMENT_API_VERSION, ADVERTISEMENT_KIND,
};
pub use node::{ContainerImage, Node, NodeSpec, NodeStatus};
pub use quantity::{Quantity, QuantityError, QuantityFormat};
pub use resources::*;
