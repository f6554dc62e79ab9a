//! Peer descriptor discovery
//!
//! Peers are declared as config records in one namespace of the local
//! cluster. A record named `<prefix><peer-id>` holds the credentials for
//! that peer under a single data field.

use std::fmt;

use tracing::{info, warn};

use crate::cluster::ConfigRecord;
use crate::config::BroadcasterConfig;
use crate::store::{ObjectStore, StoreError};

/// Connection parameters for one peer, as read at startup
#[derive(Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Peer cluster identifier (record name minus the prefix)
    pub peer_id: String,

    /// Name of the config record it came from
    pub record_name: String,

    /// Raw credential blob, parsed by the connector
    pub credentials: String,
}

// Keep credentials out of logs
impl fmt::Debug for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerDescriptor")
            .field("peer_id", &self.peer_id)
            .field("record_name", &self.record_name)
            .finish_non_exhaustive()
    }
}

/// Why a record carrying the prefix was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyPeerId,
    MissingCredentials,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyPeerId => write!(f, "no peer id after prefix"),
            SkipReason::MissingCredentials => write!(f, "credential field missing or empty"),
        }
    }
}

/// Turn one record into a descriptor
///
/// `Ok(None)` means the record is not a peer descriptor at all.
pub fn descriptor_from_record(
    record: &ConfigRecord,
    prefix: &str,
    credential_field: &str,
) -> Result<Option<PeerDescriptor>, SkipReason> {
    let Some(peer_id) = record.metadata.name.strip_prefix(prefix) else {
        return Ok(None);
    };
    if peer_id.is_empty() {
        return Err(SkipReason::EmptyPeerId);
    }
    let credentials = record
        .data
        .get(credential_field)
        .filter(|c| !c.trim().is_empty())
        .ok_or(SkipReason::MissingCredentials)?;

    Ok(Some(PeerDescriptor {
        peer_id: peer_id.to_string(),
        record_name: record.metadata.name.clone(),
        credentials: credentials.clone(),
    }))
}

/// Read all peer descriptors from the local store
///
/// Malformed records are skipped with a warning. Failing to list the
/// namespace is returned to the caller, since no peer can be found then.
pub async fn discover(
    local: &dyn ObjectStore,
    config: &BroadcasterConfig,
) -> Result<Vec<PeerDescriptor>, StoreError> {
    let records = local.list_config_records(&config.descriptor_namespace).await?;

    let mut peers = Vec::new();
    for record in &records {
        match descriptor_from_record(record, &config.descriptor_prefix, &config.credential_field) {
            Ok(Some(descriptor)) => peers.push(descriptor),
            Ok(None) => {}
            Err(reason) => warn!(
                "Skipping peer descriptor {}/{}: {}",
                config.descriptor_namespace, record.metadata.name, reason
            ),
        }
    }

    info!(
        "Discovered {} peer(s) in namespace {}",
        peers.len(),
        config.descriptor_namespace
    );
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;

    const PREFIX: &str = "foreign-kubeconfig-";

    #[test]
    fn test_descriptor_from_record() {
        let record = ConfigRecord::new("default", "foreign-kubeconfig-peerA")
            .with_data("remote", "server: http://a:8181");
        let descriptor = descriptor_from_record(&record, PREFIX, "remote")
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.peer_id, "peerA");
        assert_eq!(descriptor.record_name, "foreign-kubeconfig-peerA");
    }

    #[test]
    fn test_unrelated_record_is_ignored() {
        let record = ConfigRecord::new("default", "kube-root-ca.crt").with_data("ca.crt", "x");
        assert_eq!(descriptor_from_record(&record, PREFIX, "remote"), Ok(None));
    }

    #[test]
    fn test_malformed_records() {
        let no_id = ConfigRecord::new("default", PREFIX).with_data("remote", "server: x");
        assert_eq!(
            descriptor_from_record(&no_id, PREFIX, "remote"),
            Err(SkipReason::EmptyPeerId)
        );

        let no_creds = ConfigRecord::new("default", "foreign-kubeconfig-b");
        assert_eq!(
            descriptor_from_record(&no_creds, PREFIX, "remote"),
            Err(SkipReason::MissingCredentials)
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        let descriptor = PeerDescriptor {
            peer_id: "a".to_string(),
            record_name: "foreign-kubeconfig-a".to_string(),
            credentials: "token: topsecret".to_string(),
        };
        assert!(!format!("{:?}", descriptor).contains("topsecret"));
    }

    #[tokio::test]
    async fn test_discover_skips_malformed() {
        let store = InMemoryObjectStore::new();
        store.insert_config_record(
            ConfigRecord::new("default", "foreign-kubeconfig-peerA").with_data("remote", "server: http://a"),
        );
        store.insert_config_record(ConfigRecord::new("default", "foreign-kubeconfig-broken"));
        store.insert_config_record(
            ConfigRecord::new("default", "foreign-kubeconfig-peerB").with_data("remote", "server: http://b"),
        );
        store.insert_config_record(ConfigRecord::new("default", "unrelated"));
        store.insert_config_record(
            ConfigRecord::new("elsewhere", "foreign-kubeconfig-peerC").with_data("remote", "server: http://c"),
        );

        let config = BroadcasterConfig::new("local");
        let peers = discover(&store, &config).await.unwrap();
        let ids: Vec<_> = peers.iter().map(|p| p.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["peerA", "peerB"]);
    }

    #[tokio::test]
    async fn test_discover_list_failure_is_reported() {
        let store = InMemoryObjectStore::new();
        store.set_unavailable(true);

        let config = BroadcasterConfig::new("local");
        assert!(discover(&store, &config).await.is_err());
    }
}
