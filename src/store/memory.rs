//! In-process object store
//!
//! Behaves like a real API server for everything the broadcaster relies
//! on: resource versions, optimistic concurrency, label selectors and
//! watch fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::{ObjectStore, StoreError, WatchStream};
use crate::cluster::{
    Advertisement, AdvertisementStatus, ConfigRecord, LabelSelector, Node, WatchEvent,
    WatchEventType, ADVERTISEMENT_KIND,
};

const WATCH_BUFFER: usize = 64;

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Object store held entirely in memory
#[derive(Clone)]
pub struct InMemoryObjectStore {
    config_records: Arc<DashMap<String, ConfigRecord>>,
    nodes: Arc<DashMap<String, Node>>,
    advertisements: Arc<DashMap<String, Advertisement>>,
    revision: Arc<AtomicU64>,
    events: broadcast::Sender<WatchEvent<Advertisement>>,
    watches_opened: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            config_records: Arc::new(DashMap::new()),
            nodes: Arc::new(DashMap::new()),
            advertisements: Arc::new(DashMap::new()),
            revision: Arc::new(AtomicU64::new(0)),
            events,
            watches_opened: Arc::new(AtomicUsize::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add or replace a config record
    pub fn insert_config_record(&self, record: ConfigRecord) {
        let k = key(&record.metadata.namespace, &record.metadata.name);
        self.config_records.insert(k, record);
    }

    /// Add or replace a node
    pub fn insert_node(&self, node: Node) {
        self.nodes.insert(node.metadata.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) -> Option<Node> {
        self.nodes.remove(name).map(|(_, n)| n)
    }

    /// Make every call fail with `Unavailable` until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of advertisements stored in a namespace
    pub fn advertisement_count(&self, namespace: &str) -> usize {
        let prefix = format!("{}/", namespace);
        self.advertisements
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .count()
    }

    /// How many watches have been opened so far
    pub fn watches_opened(&self) -> usize {
        self.watches_opened.load(Ordering::SeqCst)
    }

    /// Write a consumer status onto a stored advertisement
    pub fn set_advertisement_status(
        &self,
        namespace: &str,
        name: &str,
        status: AdvertisementStatus,
    ) -> Result<Advertisement, StoreError> {
        let mut entry = self
            .advertisements
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::not_found(ADVERTISEMENT_KIND, name))?;
        entry.status = Some(status);
        entry.metadata.resource_version = Some(self.next_revision());
        let updated = entry.clone();
        drop(entry);

        self.emit(WatchEventType::Modified, &updated);
        Ok(updated)
    }

    /// Remove an advertisement, as a consumer garbage-collecting it would
    pub fn delete_advertisement(&self, namespace: &str, name: &str) -> Option<Advertisement> {
        let removed = self.advertisements.remove(&key(namespace, name)).map(|(_, a)| a);
        if let Some(ref adv) = removed {
            self.emit(WatchEventType::Deleted, adv);
        }
        removed
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn emit(&self, event_type: WatchEventType, adv: &Advertisement) {
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send(WatchEvent {
            event_type,
            object: adv.clone(),
        });
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_config_records(&self, namespace: &str) -> Result<Vec<ConfigRecord>, StoreError> {
        self.check_available()?;
        let mut records: Vec<ConfigRecord> = self
            .config_records
            .iter()
            .filter(|e| e.metadata.namespace == namespace)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(records)
    }

    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, StoreError> {
        self.check_available()?;
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|e| selector.matches(&e.metadata.labels))
            .map(|e| e.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(nodes)
    }

    async fn get_advertisement(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Advertisement>, StoreError> {
        self.check_available()?;
        Ok(self
            .advertisements
            .get(&key(namespace, name))
            .map(|e| e.value().clone()))
    }

    async fn create_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError> {
        self.check_available()?;
        let k = key(&adv.metadata.namespace, &adv.metadata.name);

        let stored = match self.advertisements.entry(k) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::already_exists(
                    ADVERTISEMENT_KIND,
                    &adv.metadata.name,
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = adv.clone();
                stored.metadata.uid = Some(Uuid::new_v4().to_string());
                stored.metadata.resource_version = Some(self.next_revision());
                stored.metadata.creation_timestamp = Some(Utc::now());
                slot.insert(stored.clone());
                stored
            }
        };

        self.emit(WatchEventType::Added, &stored);
        Ok(stored)
    }

    async fn update_advertisement(&self, adv: &Advertisement) -> Result<Advertisement, StoreError> {
        self.check_available()?;
        let k = key(&adv.metadata.namespace, &adv.metadata.name);

        let mut entry = self
            .advertisements
            .get_mut(&k)
            .ok_or_else(|| StoreError::not_found(ADVERTISEMENT_KIND, &adv.metadata.name))?;

        if let Some(ref rv) = adv.metadata.resource_version {
            if entry.metadata.resource_version.as_ref() != Some(rv) {
                return Err(StoreError::conflict(ADVERTISEMENT_KIND, &adv.metadata.name));
            }
        }

        let mut stored = adv.clone();
        stored.metadata.uid = entry.metadata.uid.clone();
        stored.metadata.creation_timestamp = entry.metadata.creation_timestamp;
        stored.metadata.resource_version = Some(self.next_revision());
        *entry = stored.clone();
        drop(entry);

        self.emit(WatchEventType::Modified, &stored);
        Ok(stored)
    }

    async fn watch_advertisement(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
    ) -> Result<WatchStream, StoreError> {
        self.check_available()?;
        self.watches_opened.fetch_add(1, Ordering::SeqCst);

        let rx = self.events.subscribe();

        // Replay the current object if the caller has not seen it yet
        let initial = self
            .advertisements
            .get(&key(namespace, name))
            .and_then(|current| match resource_version {
                None => Some(WatchEvent {
                    event_type: WatchEventType::Added,
                    object: current.clone(),
                }),
                Some(ref seen) if current.metadata.resource_version.as_ref() != Some(seen) => {
                    Some(WatchEvent {
                        event_type: WatchEventType::Modified,
                        object: current.clone(),
                    })
                }
                Some(_) => None,
            });

        let namespace = namespace.to_string();
        let name = name.to_string();

        let stream = futures::stream::unfold((rx, initial), move |(mut rx, pending)| {
            let namespace = namespace.clone();
            let name = name.clone();
            async move {
                if let Some(event) = pending {
                    return Some((Ok(event), (rx, None)));
                }
                loop {
                    match rx.recv().await {
                        Ok(event)
                            if event.object.metadata.namespace == namespace
                                && event.object.metadata.name == name =>
                        {
                            return Some((Ok(event), (rx, None)));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            let err = StoreError::Unavailable(format!(
                                "watch fell behind by {} events",
                                skipped
                            ));
                            return Some((Err(err), (rx, None)));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
