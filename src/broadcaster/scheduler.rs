//! Per-peer broadcast tasks
//!
//! One task is spawned per discovered peer. Each task connects once, then
//! loops forever over snapshot, price, build and publish, sleeping a fixed
//! interval between cycles. Tasks report progress to a supervisor that
//! keeps the [`PeerStatusBoard`] current.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::aggregator::aggregate;
use super::builder::{build, network_info};
use super::connector::{connect_with_retry, ConnectError, PeerConnection, PeerConnector};
use super::discovery::{discover, PeerDescriptor};
use super::pricing::{BaselinePricing, PricingPolicy};
use super::publisher::{publish, Ack, PublishError};
use super::watcher::{watch_once, LifecycleHandler, LoggingHandler, WatchContext};
use crate::config::BroadcasterConfig;
use crate::store::{ObjectStore, StoreError};

/// Capacity of the report channel between peer tasks and the supervisor
const REPORT_BUFFER: usize = 256;

/// Errors that stop the broadcaster from starting
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Unable to discover peers: {0}")]
    Discovery(#[from] StoreError),
}

/// Why one cycle did not publish
#[derive(Error, Debug)]
enum CycleError {
    #[error("unable to list local nodes: {0}")]
    Snapshot(StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Where a peer task currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Discovering,
    Connecting,
    Publishing,
    Sleeping,
    /// Gave up connecting; the peer is abandoned until restart
    Terminated,
    /// Ended by shutdown
    Stopped,
}

/// Something a peer task wants the supervisor to know
#[derive(Debug, Clone)]
pub enum PeerEvent {
    State(PeerState),
    Published { at: DateTime<Utc>, ack: Ack },
    CycleFailed(String),
    WatcherStarted,
    Terminated { reason: String },
}

#[derive(Debug, Clone)]
pub struct PeerReport {
    pub peer_id: String,
    pub event: PeerEvent,
}

/// Last known status of one peer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatus {
    pub peer_id: String,
    pub state: PeerState,
    pub watching: bool,
    pub publish_count: u64,
    pub last_publish: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PeerStatus {
    fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: PeerState::Discovering,
            watching: false,
            publish_count: 0,
            last_publish: None,
            last_error: None,
        }
    }

    fn apply(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::State(state) => {
                self.state = state;
                if state == PeerState::Stopped {
                    self.watching = false;
                }
            }
            PeerEvent::Published { at, .. } => {
                self.publish_count += 1;
                self.last_publish = Some(at);
                self.last_error = None;
            }
            PeerEvent::CycleFailed(e) => self.last_error = Some(e),
            PeerEvent::WatcherStarted => self.watching = true,
            PeerEvent::Terminated { reason } => {
                self.state = PeerState::Terminated;
                self.watching = false;
                self.last_error = Some(reason);
            }
        }
    }
}

/// Shared view of every peer's status
#[derive(Clone, Default)]
pub struct PeerStatusBoard {
    peers: Arc<DashMap<String, PeerStatus>>,
}

impl PeerStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, peer_id: &str) {
        self.peers
            .insert(peer_id.to_string(), PeerStatus::new(peer_id));
    }

    pub fn apply(&self, report: PeerReport) {
        self.peers
            .entry(report.peer_id.clone())
            .or_insert_with(|| PeerStatus::new(&report.peer_id))
            .apply(report.event);
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerStatus> {
        self.peers.get(peer_id).map(|s| s.value().clone())
    }

    /// All peers, ordered by id
    pub fn peers(&self) -> Vec<PeerStatus> {
        let mut peers: Vec<PeerStatus> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Fold reports into the board until every peer task has ended
async fn supervise(mut reports: mpsc::Receiver<PeerReport>, board: PeerStatusBoard) {
    while let Some(report) = reports.recv().await {
        if let PeerEvent::Terminated { ref reason } = report.event {
            error!("Broadcast to remote cluster {} terminated: {}", report.peer_id, reason);
        }
        board.apply(report);
    }
    debug!("All peer tasks reported their end");
}

/// Broadcaster wiring, consumed by [`Broadcaster::start`]
pub struct Broadcaster {
    config: Arc<BroadcasterConfig>,
    local: Arc<dyn ObjectStore>,
    connector: Arc<dyn PeerConnector>,
    pricing: Arc<dyn PricingPolicy>,
    handler: Arc<dyn LifecycleHandler>,
}

impl Broadcaster {
    /// Broadcaster with baseline pricing and a logging lifecycle handler
    pub fn new(
        config: BroadcasterConfig,
        local: Arc<dyn ObjectStore>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            local,
            connector,
            pricing: Arc::new(BaselinePricing::default()),
            handler: Arc::new(LoggingHandler),
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingPolicy>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Discover peers and spawn one task per peer
    ///
    /// Fails only when the descriptor namespace cannot be listed. The peer
    /// set is fixed from here on.
    pub async fn start(self, cancel: CancellationToken) -> Result<BroadcastHandle, BroadcastError> {
        let descriptors = match discover(self.local.as_ref(), &self.config).await {
            Ok(d) => d,
            Err(e) => {
                error!("Peer discovery failed, broadcaster not started: {}", e);
                return Err(e.into());
            }
        };

        let board = PeerStatusBoard::new();
        for descriptor in &descriptors {
            board.register(&descriptor.peer_id);
        }

        let (tx, rx) = mpsc::channel(REPORT_BUFFER);
        let supervisor = tokio::spawn(supervise(rx, board.clone()));

        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            let span = tracing::info_span!(
                "peer",
                peer_id = %descriptor.peer_id,
                cluster_id = %self.config.cluster_id
            );
            let task = PeerTask {
                descriptor,
                config: self.config.clone(),
                local: self.local.clone(),
                connector: self.connector.clone(),
                pricing: self.pricing.clone(),
                handler: self.handler.clone(),
                reports: tx.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(task.run().instrument(span));
        }

        info!(
            "Broadcasting cluster {} to {} peer(s)",
            self.config.cluster_id,
            tasks.len()
        );

        Ok(BroadcastHandle {
            tasks,
            supervisor,
            board,
            cancel,
        })
    }
}

/// Running broadcaster
pub struct BroadcastHandle {
    tasks: JoinSet<()>,
    supervisor: JoinHandle<()>,
    board: PeerStatusBoard,
    cancel: CancellationToken,
}

impl BroadcastHandle {
    pub fn status(&self) -> PeerStatusBoard {
        self.board.clone()
    }

    pub fn peer_count(&self) -> usize {
        self.tasks.len()
    }

    /// Ask every peer task and watcher to stop
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every peer task to end
    ///
    /// Peer tasks only end on shutdown or when they give up connecting, so
    /// in normal operation this does not return.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Peer task failed: {}", e);
            }
        }
        if let Err(e) = self.supervisor.await {
            error!("Supervisor failed: {}", e);
        }
        info!("Broadcaster stopped");
    }
}

/// State owned by one peer task
struct PeerTask {
    descriptor: PeerDescriptor,
    config: Arc<BroadcasterConfig>,
    local: Arc<dyn ObjectStore>,
    connector: Arc<dyn PeerConnector>,
    pricing: Arc<dyn PricingPolicy>,
    handler: Arc<dyn LifecycleHandler>,
    reports: mpsc::Sender<PeerReport>,
    cancel: CancellationToken,
}

impl PeerTask {
    async fn report(&self, event: PeerEvent) {
        // The supervisor outlives every task; a failed send means shutdown
        let _ = self
            .reports
            .send(PeerReport {
                peer_id: self.descriptor.peer_id.clone(),
                event,
            })
            .await;
    }

    async fn run(self) {
        self.report(PeerEvent::State(PeerState::Connecting)).await;

        let connection = connect_with_retry(
            self.connector.as_ref(),
            &self.descriptor,
            self.config.retry_budget,
            self.config.retry_delay,
            &self.cancel,
        )
        .await;

        let mut connection = match connection {
            Ok(c) => c,
            Err(ConnectError::Cancelled) => {
                self.report(PeerEvent::State(PeerState::Stopped)).await;
                return;
            }
            Err(e) => {
                self.report(PeerEvent::Terminated {
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        };

        let mut watcher: Option<JoinHandle<()>> = None;

        loop {
            self.report(PeerEvent::State(PeerState::Publishing)).await;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.cycle(&connection) => result,
            };

            match result {
                Ok(ack) => {
                    self.report(PeerEvent::Published {
                        at: Utc::now(),
                        ack,
                    })
                    .await;
                    let ctx = self.watch_context(&connection);
                    if let Some(handle) = watch_once(
                        &mut connection,
                        ctx,
                        self.handler.clone(),
                        self.config.watch_retry_delay,
                        self.cancel.child_token(),
                    ) {
                        watcher = Some(handle);
                        self.report(PeerEvent::WatcherStarted).await;
                    }
                }
                Err(e) => {
                    warn!(
                        "Advertisement not published to remote cluster {}: {}",
                        self.descriptor.peer_id, e
                    );
                    self.report(PeerEvent::CycleFailed(e.to_string())).await;
                }
            }

            self.report(PeerEvent::State(PeerState::Sleeping)).await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.publish_interval) => {}
            }
        }

        if let Some(handle) = watcher {
            if let Err(e) = handle.await {
                warn!("Watcher for remote cluster {} failed: {}", self.descriptor.peer_id, e);
            }
        }
        info!("Stopped broadcasting to remote cluster {}", self.descriptor.peer_id);
        self.report(PeerEvent::State(PeerState::Stopped)).await;
    }

    /// One snapshot, price, build and publish round
    async fn cycle(&self, connection: &PeerConnection) -> Result<Ack, CycleError> {
        let nodes = self
            .local
            .list_nodes(&self.config.node_selector)
            .await
            .map_err(CycleError::Snapshot)?;

        let (snapshot, images) = aggregate(&nodes);
        let prices = self.pricing.price(&snapshot, &images);
        let network = network_info(&self.config, &nodes);
        let advertisement = build(
            &self.config,
            &connection.namespace,
            &snapshot,
            &images,
            prices,
            network,
            Utc::now(),
        );

        debug!(
            "Publishing {} node(s), {} image(s) to remote cluster {}",
            nodes.len(),
            images.len(),
            connection.peer_id
        );
        Ok(publish(connection.store.as_ref(), &advertisement).await?)
    }

    fn watch_context(&self, connection: &PeerConnection) -> WatchContext {
        WatchContext {
            cluster_id: self.config.cluster_id.clone(),
            peer_id: connection.peer_id.clone(),
            namespace: connection.namespace.clone(),
            name: self.config.advertisement_name(),
            local: self.local.clone(),
        }
    }
}
