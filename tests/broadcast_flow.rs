//! End-to-end broadcast over in-memory stores
//!
//! Time is paused, so the ten-minute publish interval and the one-minute
//! connect delay elapse instantly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use capacity_broadcaster::broadcaster::{
    Broadcaster, ConnectError, LifecycleHandler, PeerConnection, PeerConnector, PeerDescriptor,
    PeerState, Transition, WatchContext,
};
use capacity_broadcaster::cluster::{
    AdvertisementPhase, AdvertisementStatus, ConfigRecord, Node, Quantity,
};
use capacity_broadcaster::config::BroadcasterConfig;
use capacity_broadcaster::store::{InMemoryObjectStore, ObjectStore, StoreError};

const MINUTE: Duration = Duration::from_secs(60);
const ADVERTISEMENT: &str = "advertisement-c1";

/// Hands out a fixed in-memory store per peer
struct MemoryConnector {
    peers: HashMap<String, InMemoryObjectStore>,
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn connect(&self, descriptor: &PeerDescriptor) -> Result<PeerConnection, ConnectError> {
        let store = self
            .peers
            .get(&descriptor.peer_id)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("no route to {}", descriptor.peer_id)))?;
        Ok(PeerConnection::new(
            descriptor.peer_id.clone(),
            Arc::new(store),
            "default",
        ))
    }
}

/// Remembers every transition per peer
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(String, Transition)>>,
}

#[async_trait]
impl LifecycleHandler for RecordingHandler {
    async fn on_transition(&self, ctx: &WatchContext, transition: Transition) {
        self.seen.lock().await.push((ctx.peer_id.clone(), transition));
    }
}

fn worker(cpu: i64) -> Node {
    Node::new("worker-1")
        .with_resources(cpu, 16, 110)
        .with_pod_cidr("10.32.0.5/24")
        .with_image("app:v1", 1)
}

fn local_cluster(peers: &[&str]) -> InMemoryObjectStore {
    let local = InMemoryObjectStore::new();
    for peer in peers {
        local.insert_config_record(
            ConfigRecord::new("default", format!("foreign-kubeconfig-{}", peer))
                .with_data("remote", "server: http://127.0.0.1:9"),
        );
    }
    // Neither of these is a peer descriptor
    local.insert_config_record(ConfigRecord::new("default", "foreign-kubeconfig-"));
    local.insert_config_record(ConfigRecord::new("default", "cluster-settings"));

    local.insert_node(worker(8));
    // Injected by a peer, must not be counted
    local.insert_node(
        Node::new("virtual-peerA")
            .with_label("type", "virtual-node")
            .with_resources(1000, 1000, 1000)
            .with_image("remote-only:v1", 1),
    );
    local
}

#[tokio::test(start_paused = true)]
async fn test_advertises_to_every_peer_and_updates_in_place() {
    let peer_a = InMemoryObjectStore::new();
    let peer_b = InMemoryObjectStore::new();
    let connector = MemoryConnector {
        peers: HashMap::from([
            ("peerA".to_string(), peer_a.clone()),
            ("peerB".to_string(), peer_b.clone()),
        ]),
    };
    let local = local_cluster(&["peerA", "peerB"]);
    local.insert_node(
        Node::new("worker-2")
            .with_resources(4, 8, 110)
            .with_pod_cidr("10.32.1.7/24")
            .with_image("app:v1", 1),
    );
    let cancel = CancellationToken::new();

    let handle = Broadcaster::new(
        BroadcasterConfig::new("c1").with_gateway("203.0.113.1", "10.0.0.1"),
        Arc::new(local.clone()),
        Arc::new(connector),
    )
    .start(cancel.clone())
    .await
    .unwrap();
    let board = handle.status();
    assert_eq!(handle.peer_count(), 2);

    tokio::time::sleep(MINUTE).await;

    let mut uids = Vec::new();
    for peer in [&peer_a, &peer_b] {
        let adv = peer
            .get_advertisement("default", ADVERTISEMENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adv.spec.cluster_id, "c1");
        assert_eq!(adv.spec.availability["cpu"].value(), 12);
        assert_eq!(adv.spec.availability["memory"], "24Gi".parse::<Quantity>().unwrap());
        assert_eq!(adv.spec.availability["pods"].value(), 220);
        assert_eq!(adv.spec.images, vec!["app:v1"]);
        assert!(adv.spec.prices.contains_key("cpu"));
        assert!(adv.spec.prices.contains_key("memory"));
        assert!(adv.spec.prices.contains_key("app:v1"));
        assert!(!adv.spec.prices.contains_key("remote-only:v1"));
        assert_eq!(adv.spec.network.pod_cidr, "10.32.0.0/16");
        assert_eq!(
            adv.spec.time_to_live - adv.spec.timestamp,
            chrono::Duration::minutes(30)
        );
        uids.push(adv.metadata.uid.clone());
    }

    // A worker leaves and the other shrinks; the next cycle replaces the record in place
    assert!(local.remove_node("worker-2").is_some());
    local.insert_node(worker(4));
    tokio::time::sleep(MINUTE * 10).await;

    for (peer, uid) in [&peer_a, &peer_b].into_iter().zip(uids) {
        assert_eq!(peer.advertisement_count("default"), 1);
        let adv = peer
            .get_advertisement("default", ADVERTISEMENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adv.spec.availability["cpu"].value(), 4);
        assert_eq!(adv.metadata.uid, uid);
    }

    for peer in ["peerA", "peerB"] {
        let status = board.get(peer).unwrap();
        assert_eq!(status.publish_count, 2);
        assert!(status.watching);
    }
    assert_eq!(peer_a.watches_opened(), 1);
    assert_eq!(peer_b.watches_opened(), 1);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_consumer_decisions_reach_the_handler_and_survive_republish() {
    let peer_a = InMemoryObjectStore::new();
    let connector = MemoryConnector {
        peers: HashMap::from([("peerA".to_string(), peer_a.clone())]),
    };
    let handler = Arc::new(RecordingHandler::default());
    let cancel = CancellationToken::new();

    let handle = Broadcaster::new(
        BroadcasterConfig::new("c1"),
        Arc::new(local_cluster(&["peerA"])),
        Arc::new(connector),
    )
    .with_handler(handler.clone())
    .start(cancel.clone())
    .await
    .unwrap();

    tokio::time::sleep(MINUTE).await;
    peer_a
        .set_advertisement_status(
            "default",
            ADVERTISEMENT,
            AdvertisementStatus {
                phase: AdvertisementPhase::Accepted,
                remote_pod_cidr: Some("10.200.0.0/16".to_string()),
            },
        )
        .unwrap();
    tokio::time::sleep(MINUTE * 10).await;

    // The republish kept the consumer's decision
    let adv = peer_a
        .get_advertisement("default", ADVERTISEMENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(adv.phase(), AdvertisementPhase::Accepted);

    let seen = handler.seen.lock().await;
    assert!(seen.iter().all(|(peer, _)| peer == "peerA"));
    assert!(seen.iter().any(|(_, t)| matches!(
        t,
        Transition::Phase {
            to: AdvertisementPhase::Accepted,
            ..
        }
    )));
    drop(seen);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_is_abandoned_alone() {
    let peer_a = InMemoryObjectStore::new();
    let connector = MemoryConnector {
        peers: HashMap::from([("peerA".to_string(), peer_a.clone())]),
    };
    let cancel = CancellationToken::new();

    let handle = Broadcaster::new(
        BroadcasterConfig::new("c1"),
        Arc::new(local_cluster(&["peerA", "peerB"])),
        Arc::new(connector),
    )
    .start(cancel.clone())
    .await
    .unwrap();
    let board = handle.status();

    // peerB uses its three attempts within two minutes
    tokio::time::sleep(MINUTE * 3).await;
    assert_eq!(board.get("peerB").unwrap().state, PeerState::Terminated);
    assert_eq!(board.get("peerA").unwrap().publish_count, 1);

    tokio::time::sleep(MINUTE * 10).await;
    assert_eq!(board.get("peerA").unwrap().publish_count, 2);
    assert_eq!(board.get("peerB").unwrap().publish_count, 0);

    handle.shutdown();
    handle.join().await;
}
