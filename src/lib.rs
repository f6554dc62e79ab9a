//! Capacity broadcaster
//!
//! Publishes this cluster's spare capacity, prices and network parameters
//! as an advertisement on every peer cluster, and follows what the peers
//! decide about it.

pub mod broadcaster;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod credentials;
pub mod server;
pub mod store;
