//! Advertisement composition
//!
//! Everything here is pure: the same inputs and `now` give the same record.

use chrono::{DateTime, Utc};

use super::aggregator::{CapacitySnapshot, ImageSet};
use super::pricing::PriceList;
use crate::cluster::{Advertisement, AdvertisementSpec, NetworkInfo, Node, ObjectMeta};
use crate::config::BroadcasterConfig;

/// Widen a node's pod block to the `/16` containing it
///
/// Only the first two octets are kept. Returns `None` when the block does
/// not start with two valid octets. Clusters whose nodes span several
/// `/16`s, or that use a narrower overall range, get a block that does not
/// match their real layout.
pub fn widen_pod_cidr(node_cidr: &str) -> Option<String> {
    let mut octets = node_cidr.trim().split('.');
    let first = octets.next()?.parse::<u8>().ok()?;
    let second = octets.next()?.parse::<u8>().ok()?;
    Some(format!("{}.{}.0.0/16", first, second))
}

/// Pod block to advertise, sampled from the first node
pub fn derive_pod_cidr(nodes: &[Node], default_cidr: &str) -> String {
    nodes
        .first()
        .and_then(|n| n.spec.pod_cidr.as_deref())
        .and_then(widen_pod_cidr)
        .unwrap_or_else(|| default_cidr.to_string())
}

/// Network parameters for this cycle
pub fn network_info(config: &BroadcasterConfig, nodes: &[Node]) -> NetworkInfo {
    NetworkInfo {
        pod_cidr: derive_pod_cidr(nodes, &config.default_pod_cidr),
        gateway_ip: config.gateway_ip.clone(),
        gateway_private_ip: config.gateway_private_ip.clone(),
    }
}

/// Compose an advertisement valid from `now` for the configured TTL
pub fn build(
    config: &BroadcasterConfig,
    namespace: &str,
    snapshot: &CapacitySnapshot,
    images: &ImageSet,
    prices: PriceList,
    network: NetworkInfo,
    now: DateTime<Utc>,
) -> Advertisement {
    let metadata = ObjectMeta::namespaced(namespace, config.advertisement_name());

    let spec = AdvertisementSpec {
        cluster_id: config.cluster_id.clone(),
        images: images.iter().map(str::to_string).collect(),
        availability: snapshot.as_quantities().clone(),
        prices: prices.into_quantities(),
        network,
        timestamp: now,
        time_to_live: now + config.advertisement_ttl,
    };

    Advertisement::new(metadata, spec)
}
