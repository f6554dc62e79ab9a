//! Idempotent advertisement upsert
//!
//! Creates the advertisement on the peer when absent; otherwise replaces
//! its spec in place, keeping the peer's metadata and the consumer-written
//! status. Concurrent writers are handled by re-reading and retrying on
//! revision conflicts.

use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::Advertisement;
use crate::store::{ObjectStore, StoreError};

/// Attempts made when the peer reports a conflicting write
pub const CONFLICT_RETRIES: u32 = 3;

/// Outcome of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Created,
    Updated,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Unable to publish advertisement: {0}")]
    Store(#[from] StoreError),

    #[error("Advertisement kept changing on the peer after {0} attempts")]
    TooManyConflicts(u32),
}

/// Carry our new content onto the stored record
///
/// Identity and revision come from the stored copy so the update is
/// accepted; labels and annotations we set are merged over the stored ones.
fn merge_into(stored: &Advertisement, desired: &Advertisement) -> Advertisement {
    let mut updated = stored.clone();
    updated.api_version = desired.api_version.clone();
    updated.kind = desired.kind.clone();
    updated.spec = desired.spec.clone();
    for (k, v) in &desired.metadata.labels {
        updated.metadata.labels.insert(k.clone(), v.clone());
    }
    for (k, v) in &desired.metadata.annotations {
        updated.metadata.annotations.insert(k.clone(), v.clone());
    }
    updated
}

/// Create or update `adv` on the peer
pub async fn publish(store: &dyn ObjectStore, adv: &Advertisement) -> Result<Ack, PublishError> {
    let namespace = &adv.metadata.namespace;
    let name = &adv.metadata.name;

    for attempt in 1..=CONFLICT_RETRIES {
        let result = match store.get_advertisement(namespace, name).await? {
            None => store.create_advertisement(adv).await.map(|_| Ack::Created),
            Some(stored) => store
                .update_advertisement(&merge_into(&stored, adv))
                .await
                .map(|_| Ack::Updated),
        };

        match result {
            Ok(ack) => {
                info!("Advertisement {}/{} {:?}", namespace, name, ack);
                return Ok(ack);
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    "Conflict publishing {}/{} (attempt {}/{}), re-reading",
                    namespace, name, attempt, CONFLICT_RETRIES
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(PublishError::TooManyConflicts(CONFLICT_RETRIES))
}
