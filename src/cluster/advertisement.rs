//! Advertisement resource - the record published on each peer cluster
//!
//! One advertisement exists per producing cluster in a peer's store. Its
//! name is derived from the producer's cluster id, so republishing always
//! targets the same object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::resources::{ObjectMeta, ResourceQuantities};

/// API version of the advertisement resource
pub const ADVERTISEMENT_API_VERSION: &str = "protocol.peering.io/v1";

/// Kind of the advertisement resource
pub const ADVERTISEMENT_KIND: &str = "Advertisement";

/// A published capacity advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: AdvertisementSpec,

    /// Written by the consuming cluster, never by the broadcaster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdvertisementStatus>,
}

/// Content of an advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementSpec {
    /// Identifier of the producing cluster
    pub cluster_id: String,

    /// Container images available on the producer's nodes
    #[serde(default)]
    pub images: Vec<String>,

    /// Allocatable totals (cpu, memory, pods)
    #[serde(default)]
    pub availability: ResourceQuantities,

    /// Price per resource kind and per image
    #[serde(default)]
    pub prices: ResourceQuantities,

    pub network: NetworkInfo,

    /// When the advertisement was built
    pub timestamp: DateTime<Utc>,

    /// Advisory expiry for consumers
    pub time_to_live: DateTime<Utc>,
}

/// Connectivity parameters of the producing cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    #[serde(rename = "gatewayIP")]
    pub gateway_ip: String,

    #[serde(rename = "gatewayPrivateIP")]
    pub gateway_private_ip: String,
}

/// Consumer-side decision about an advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdvertisementPhase {
    /// Not yet evaluated by the consumer
    #[default]
    Pending,
    /// Consumer will schedule workloads on the producer
    Accepted,
    /// Consumer declined the offer
    Refused,
}

/// Status block authored by the consuming cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementStatus {
    #[serde(default)]
    pub phase: AdvertisementPhase,

    /// Pod block the consumer remapped ours to, if it had to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_pod_cidr: Option<String>,
}

impl Advertisement {
    /// Name of the advertisement produced by `cluster_id`
    pub fn object_name(prefix: &str, cluster_id: &str) -> String {
        format!("{}{}", prefix, cluster_id)
    }

    /// Wrap a spec into a new, not yet stored, advertisement
    pub fn new(metadata: ObjectMeta, spec: AdvertisementSpec) -> Self {
        Self {
            api_version: ADVERTISEMENT_API_VERSION.to_string(),
            kind: ADVERTISEMENT_KIND.to_string(),
            metadata,
            spec,
            status: None,
        }
    }

    /// Phase reported by the consumer, `Pending` when none
    pub fn phase(&self) -> AdvertisementPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> Advertisement {
        Advertisement::new(
            ObjectMeta::namespaced("default", Advertisement::object_name("advertisement-", "c1")),
            AdvertisementSpec {
                cluster_id: "c1".to_string(),
                images: vec!["app:v1".to_string()],
                availability: ResourceQuantities::new(),
                prices: ResourceQuantities::new(),
                network: NetworkInfo::default(),
                timestamp: now,
                time_to_live: now + Duration::minutes(30),
            },
        )
    }

    #[test]
    fn test_object_name() {
        assert_eq!(Advertisement::object_name("advertisement-", "abc"), "advertisement-abc");
    }

    #[test]
    fn test_phase_defaults_to_pending() {
        let mut adv = sample(Utc::now());
        assert_eq!(adv.phase(), AdvertisementPhase::Pending);

        adv.status = Some(AdvertisementStatus {
            phase: AdvertisementPhase::Accepted,
            remote_pod_cidr: None,
        });
        assert_eq!(adv.phase(), AdvertisementPhase::Accepted);
    }

    #[test]
    fn test_wire_format() {
        let adv = sample(Utc::now());
        let json = serde_json::to_value(&adv).unwrap();
        assert_eq!(json["apiVersion"], ADVERTISEMENT_API_VERSION);
        assert_eq!(json["spec"]["clusterId"], "c1");
        assert!(json["spec"]["network"].get("podCIDR").is_some());
        assert!(json["spec"].get("timeToLive").is_some());
        assert!(json.get("status").is_none());
    }
}
