//! Integration scenarios exercising the full routing stack
//!
//! These run several nodes, each with its own cloud, router, sender and
//! validators, over the simulated transports.

use std::time::Duration;

use ringmesh_core::RoutingConfig;
use ringmesh_routing::Cloud;

use crate::network::SimNetwork;
use crate::scenarios::{
    ChaosConfig, run_chaos, run_cloud_broadcast, run_flood, run_ring_relay, run_same_ring,
};

#[tokio::test]
async fn test_same_ring_scenario() {
    let report = run_same_ring().await.unwrap();
    assert!(report.success(), "{report}");
    assert_eq!(report.stats.sent, 1);
    // One UDP unicast, nothing to forward
    assert_eq!(report.stats.received, 1);
    assert_eq!(report.stats.forwarded, 0);
}

#[tokio::test]
async fn test_ring_relay_scenario() {
    let report = run_ring_relay().await.unwrap();
    assert!(report.success(), "{report}");
    // A -> C over HTTP, C -> B over UDP
    assert_eq!(report.stats.received, 2);
    assert_eq!(report.stats.forwarded, 1);
}

#[tokio::test]
async fn test_flood_scenario() {
    let report = run_flood().await.unwrap();
    assert!(report.success(), "{report}");
    assert!(report.stats.rejected > 0);
}

#[tokio::test]
async fn test_cloud_broadcast_reaches_every_ring() {
    let report = run_cloud_broadcast(3, 3).await.unwrap();
    assert!(report.success(), "{report}");
    assert_eq!(report.expected, 8);
}

#[tokio::test]
async fn test_chaos_without_loss_delivers_everything() {
    let report = run_chaos(ChaosConfig {
        nodes: 8,
        rings: 2,
        messages: 10,
        loss_rate: 0.0,
        http_probability: 1.0,
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(report.success(), "{report}");
}

#[tokio::test]
async fn test_chaos_reports_partial_delivery() {
    let report = run_chaos(ChaosConfig {
        loss_rate: 0.5,
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(report.delivered <= report.expected);
    assert!(report.delivery_ratio() <= 1.0);
}

#[tokio::test]
async fn test_forwarded_message_carries_spent_hops() {
    let network = SimNetwork::new(RoutingConfig::default());
    network.add_node("A", 1, true).unwrap();
    let b = network.add_node("B", 2, false).unwrap();
    network.add_node("C", 2, true).unwrap();
    network.introduce_all();

    let (message, receipt) = network.send("A", "B", b"hop check").unwrap();
    assert!(receipt.wait_for_delivery(Duration::from_secs(2)).await);
    assert!(network.settle(Duration::from_secs(2)).await);

    let delivered = b.inbox();
    let copy = delivered
        .iter()
        .find(|m| m.uuid() == message.uuid())
        .unwrap();
    assert_eq!(copy.hops(), 0);
    network.shutdown().await;
}

#[tokio::test]
async fn test_www_reaches_isolated_ring() {
    let network = SimNetwork::with_www(RoutingConfig::default());
    network.add_node("A", 1, false).unwrap();
    let island = network.add_node("I", 9, false).unwrap();
    // Nobody knows the island and it has no HTTP endpoint
    let (message, _receipt) = network.send("A", "I", b"over the web").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(network.settle(Duration::from_secs(2)).await);
    assert!(island.has_received(message.uuid()));
    network.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_deliveries_are_rejected_not_redelivered() {
    let network = SimNetwork::new(RoutingConfig::default());
    for name in ["A", "B", "C", "D"] {
        network.add_node(name, 1, false).unwrap();
    }
    let (message, _receipt) = network.broadcast("A", b"to all").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(network.settle(Duration::from_secs(2)).await);

    for node in network.nodes() {
        let copies = node
            .inbox()
            .iter()
            .filter(|m| m.uuid() == message.uuid())
            .count();
        if node.name == "A" {
            assert_eq!(copies, 0);
        } else {
            assert_eq!(copies, 1, "{} got {copies} copies", node.name);
        }
        assert!(!node.cloud().is_local_agent(&network.cloud_iden()));
    }
    network.shutdown().await;
}
