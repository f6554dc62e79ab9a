//! Peer connections
//!
//! A connection is established once per peer task. Attempts are retried a
//! fixed number of times with a fixed delay; after that the peer is given
//! up on for the lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::discovery::PeerDescriptor;
use super::watcher::WatchLatch;
use crate::credentials::{parse_credentials, CredentialsError};
use crate::store::{HttpObjectStore, ObjectStore, StoreError};

/// Errors while connecting to a peer
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid peer credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Peer unreachable: {0}")]
    Store(#[from] StoreError),

    #[error("Gave up on peer '{peer_id}' after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        peer_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// An established link to one peer
///
/// Owned by exactly one peer task, together with the latch that keeps the
/// lifecycle watcher from starting twice.
pub struct PeerConnection {
    pub peer_id: String,

    /// Store on the peer side
    pub store: Arc<dyn ObjectStore>,

    /// Namespace advertisements are published into on this peer
    pub namespace: String,

    pub watch_latch: WatchLatch,
}

impl PeerConnection {
    pub fn new(
        peer_id: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            store,
            namespace: namespace.into(),
            watch_latch: WatchLatch::new(),
        }
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows scripted connectors in tests)
// ============================================================================

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Make a single connection attempt
    async fn connect(&self, descriptor: &PeerDescriptor) -> Result<PeerConnection, ConnectError>;
}

/// Connects to peers over HTTP using the descriptor's credentials
///
/// A connection only counts once the peer answered a read for our
/// advertisement, so unreachable peers and bad tokens go through the retry
/// budget.
pub struct HttpConnector {
    default_namespace: String,
    advertisement_name: String,
}

impl HttpConnector {
    pub fn new(default_namespace: impl Into<String>, advertisement_name: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            advertisement_name: advertisement_name.into(),
        }
    }
}

#[async_trait]
impl PeerConnector for HttpConnector {
    async fn connect(&self, descriptor: &PeerDescriptor) -> Result<PeerConnection, ConnectError> {
        let creds = parse_credentials(&descriptor.credentials)?;
        let namespace = creds
            .namespace
            .clone()
            .unwrap_or_else(|| self.default_namespace.clone());

        let store = HttpObjectStore::from_credentials(&creds)?;
        store
            .get_advertisement(&namespace, &self.advertisement_name)
            .await?;

        Ok(PeerConnection::new(
            descriptor.peer_id.clone(),
            Arc::new(store),
            namespace,
        ))
    }
}

/// Connect with a fixed retry budget and a fixed delay between attempts
///
/// No delay follows the last failed attempt. Cancellation interrupts the
/// wait between attempts.
pub async fn connect_with_retry(
    connector: &dyn PeerConnector,
    descriptor: &PeerDescriptor,
    budget: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<PeerConnection, ConnectError> {
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=budget {
        match connector.connect(descriptor).await {
            Ok(connection) => {
                info!("Created client to remote cluster {}", descriptor.peer_id);
                return Ok(connection);
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt == budget {
                    break;
                }
                warn!(
                    "Unable to create client to remote cluster {} (attempt {}/{}): {}. Retry in {:?}",
                    descriptor.peer_id, attempt, budget, e, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    error!(
        "Failed to create client to remote cluster {}: {}",
        descriptor.peer_id, last_error
    );
    Err(ConnectError::RetriesExhausted {
        peer_id: descriptor.peer_id.clone(),
        attempts: budget,
        last_error,
    })
}


#[cfg(test)]
mod tests {
    use super::mock::ScriptedConnector;
    use super::*;
    use crate::store::InMemoryObjectStore;
    use tokio::time::Instant;

    const DELAY: Duration = Duration::from_secs(60);

    fn descriptor(peer_id: &str) -> PeerDescriptor {
        PeerDescriptor {
            peer_id: peer_id.to_string(),
            record_name: format!("foreign-kubeconfig-{}", peer_id),
            credentials: "server: http://127.0.0.1:9".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_two_delays() {
        let connector =
            ScriptedConnector::new(2).with_peer("peerA", InMemoryObjectStore::new());
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let connection = connect_with_retry(&connector, &descriptor("peerA"), 3, DELAY, &cancel)
            .await
            .unwrap();

        assert_eq!(connection.peer_id, "peerA");
        assert_eq!(connector.attempts(), 3);
        assert_eq!(start.elapsed(), DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_is_terminal() {
        let connector = ScriptedConnector::new(u32::MAX);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = connect_with_retry(&connector, &descriptor("peerA"), 3, DELAY, &cancel).await;

        assert!(matches!(
            result,
            Err(ConnectError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(connector.attempts(), 3);
        assert_eq!(start.elapsed(), DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_delay() {
        let connector = ScriptedConnector::new(u32::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = connect_with_retry(&connector, &descriptor("peerA"), 3, DELAY, &cancel).await;
        assert!(matches!(result, Err(ConnectError::Cancelled)));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_http_connector_rejects_bad_credentials() {
        let connector = HttpConnector::new("default", "advertisement-c1");
        let mut bad = descriptor("peerA");
        bad.credentials = "not-a-url: true".to_string();

        let result = connector.connect(&bad).await;
        assert!(matches!(result, Err(ConnectError::Credentials(_))));
    }
}
