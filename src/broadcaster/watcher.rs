//! Lifecycle watcher for published advertisements
//!
//! After the first successful publish to a peer, a watcher follows the
//! peer's copy of our advertisement and reports consumer decisions
//! (accepted, refused) and removals to a [`LifecycleHandler`]. The watcher
//! runs next to the publish loop and is started at most once per peer
//! connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::connector::PeerConnection;
use crate::cluster::{Advertisement, AdvertisementPhase, WatchEvent, WatchEventType};
use crate::store::{ObjectStore, StoreError};

/// Single-use latch guarding the watcher start
#[derive(Debug, Default)]
pub struct WatchLatch {
    fired: bool,
}

impl WatchLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once
    pub fn try_fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

/// What a watcher knows about the advertisement it follows
#[derive(Clone)]
pub struct WatchContext {
    pub cluster_id: String,
    pub peer_id: String,
    pub namespace: String,
    pub name: String,

    /// Store of the local cluster, for handlers that record decisions
    pub local: Arc<dyn ObjectStore>,
}

/// A change in the peer's view of our advertisement
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Phase {
        from: Option<AdvertisementPhase>,
        to: AdvertisementPhase,
        advertisement: Box<Advertisement>,
    },
    Deleted,
}

/// Reacts to advertisement transitions on a peer
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn on_transition(&self, ctx: &WatchContext, transition: Transition);
}

/// Logs every transition
#[derive(Debug, Default, Clone)]
pub struct LoggingHandler;

#[async_trait]
impl LifecycleHandler for LoggingHandler {
    async fn on_transition(&self, ctx: &WatchContext, transition: Transition) {
        match transition {
            Transition::Phase {
                to: AdvertisementPhase::Accepted,
                advertisement,
                ..
            } => {
                let remapped = advertisement
                    .status
                    .as_ref()
                    .and_then(|s| s.remote_pod_cidr.as_deref())
                    .unwrap_or("none");
                info!(
                    "Advertisement {} accepted by remote cluster {} (remapped pod block: {})",
                    ctx.name, ctx.peer_id, remapped
                );
            }
            Transition::Phase {
                to: AdvertisementPhase::Refused,
                ..
            } => {
                warn!(
                    "Advertisement {} refused by remote cluster {}",
                    ctx.name, ctx.peer_id
                );
            }
            Transition::Phase { from, to, .. } => {
                debug!(
                    "Advertisement {} on remote cluster {}: {:?} -> {:?}",
                    ctx.name, ctx.peer_id, from, to
                );
            }
            Transition::Deleted => {
                warn!(
                    "Advertisement {} was removed from remote cluster {}",
                    ctx.name, ctx.peer_id
                );
            }
        }
    }
}

/// Fold one event into the last known phase
fn track(
    last_phase: &mut Option<AdvertisementPhase>,
    event: WatchEvent<Advertisement>,
) -> Option<Transition> {
    match event.event_type {
        WatchEventType::Deleted => {
            last_phase.take()?;
            Some(Transition::Deleted)
        }
        WatchEventType::Added | WatchEventType::Modified => {
            let phase = event.object.phase();
            if *last_phase == Some(phase) {
                return None;
            }
            let from = last_phase.replace(phase);
            Some(Transition::Phase {
                from,
                to: phase,
                advertisement: Box::new(event.object),
            })
        }
    }
}

/// Follow the advertisement until cancelled
///
/// Ended or failed watches are re-opened after `retry_delay`, resuming from
/// the last revision seen. A server answering that the revision is too old
/// (410) makes the next watch start from the current state.
pub async fn run_watcher(
    ctx: WatchContext,
    peer: Arc<dyn ObjectStore>,
    handler: Arc<dyn LifecycleHandler>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    let mut resource_version: Option<String> = None;
    let mut last_phase: Option<AdvertisementPhase> = None;

    info!(
        "Watching advertisement {}/{} on remote cluster {}",
        ctx.namespace, ctx.name, ctx.peer_id
    );

    'watch: loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'watch,
            opened = peer.watch_advertisement(&ctx.namespace, &ctx.name, resource_version.clone()) => opened,
        };

        match opened {
            Ok(mut events) => loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'watch,
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        if let Some(rv) = event.object.metadata.resource_version.clone() {
                            resource_version = Some(rv);
                        }
                        if let Some(transition) = track(&mut last_phase, event) {
                            handler.on_transition(&ctx, transition).await;
                        }
                    }
                    Some(Err(StoreError::Api { status: 410, .. })) => {
                        debug!("Watch revision expired, restarting from current state");
                        resource_version = None;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Watch on remote cluster {} failed: {}", ctx.peer_id, e);
                        break;
                    }
                    None => {
                        debug!("Watch on remote cluster {} closed", ctx.peer_id);
                        break;
                    }
                }
            },
            Err(e) => warn!("Unable to watch remote cluster {}: {}", ctx.peer_id, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break 'watch,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    info!("Stopped watching remote cluster {}", ctx.peer_id);
}

/// Start the watcher for this connection unless it already runs
///
/// Only the first call per connection spawns a task; later calls return
/// `None`.
pub fn watch_once(
    connection: &mut PeerConnection,
    ctx: WatchContext,
    handler: Arc<dyn LifecycleHandler>,
    retry_delay: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !connection.watch_latch.try_fire() {
        return None;
    }
    let span = tracing::info_span!("watcher", peer_id = %ctx.peer_id, cluster_id = %ctx.cluster_id);
    let peer = connection.store.clone();
    Some(tokio::spawn(
        run_watcher(ctx, peer, handler, retry_delay, cancel).instrument(span),
    ))
}
