//! Object store access
//!
//! The broadcaster never implements list/create/update/watch itself; it
//! goes through [`ObjectStore`]. The local cluster and every peer are each
//! one store instance.

pub mod http;
pub mod memory;

pub use http::HttpObjectStore;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::cluster::{Advertisement, ConfigRecord, LabelSelector, Node, WatchEvent};

/// Errors returned by an object store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflicting update of {kind} '{name}'")]
    Conflict { kind: String, name: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: &str, name: &str) -> Self {
        StoreError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        StoreError::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::AlreadyExists { .. })
    }
}

/// Stream of changes to one advertisement
pub type WatchStream = BoxStream<'static, Result<WatchEvent<Advertisement>, StoreError>>;

// ============================================================================
// SBIO: Trait for abstraction (allows in-memory stores in tests)
// ============================================================================

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All config records in a namespace
    async fn list_config_records(&self, namespace: &str) -> Result<Vec<ConfigRecord>, StoreError>;

    /// Nodes matching a label selector
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, StoreError>;

    /// Read one advertisement, `None` when absent
    async fn get_advertisement(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Advertisement>, StoreError>;

    /// Store a new advertisement, failing if the name is taken
    async fn create_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError>;

    /// Replace an existing advertisement
    ///
    /// When `metadata.resource_version` is set it must match the stored
    /// revision, otherwise the update is rejected with `Conflict`.
    async fn update_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError>;

    /// Follow changes to one advertisement, starting after `resource_version`
    async fn watch_advertisement(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
    ) -> Result<WatchStream, StoreError>;
}
