//! Pre-defined simulation scenarios
//!
//! Each scenario builds a small multi-ring network, sends traffic through the
//! real routing stack and reports how much of it arrived.

use std::time::Duration;

use rand::Rng;
use ringmesh_core::RoutingConfig;
use tracing::info;

use crate::error::SimResult;
use crate::network::{SimNetwork, StatsSnapshot};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a scenario run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: &'static str,
    /// Messages (or recipients, for broadcasts) that should have arrived
    pub expected: usize,
    /// How many actually arrived
    pub delivered: usize,
    pub stats: StatsSnapshot,
}

impl ScenarioReport {
    pub fn success(&self) -> bool {
        self.delivered == self.expected
    }

    pub fn delivery_ratio(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        self.delivered as f64 / self.expected as f64
    }
}

impl std::fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        writeln!(
            f,
            "  delivered {}/{} ({:.0}%)",
            self.delivered,
            self.expected,
            self.delivery_ratio() * 100.0
        )?;
        write!(f, "  {}", self.stats)
    }
}

async fn finish(
    network: SimNetwork,
    name: &'static str,
    expected: usize,
    delivered: impl Fn(&SimNetwork) -> usize,
) -> ScenarioReport {
    network.settle(SETTLE_TIMEOUT).await;
    let report = ScenarioReport {
        name,
        expected,
        delivered: delivered(&network),
        stats: network.stats(),
    };
    network.shutdown().await;
    info!(scenario = name, delivered = report.delivered, expected, "Scenario finished");
    report
}

/// Two UDP-only agents on one ring
///
/// ```text
/// ring 1: A ── B
/// ```
///
/// A knows B's ring, so the message goes out as one UDP unicast with no hops
/// left.
pub async fn run_same_ring() -> SimResult<ScenarioReport> {
    info!("=== Running Same-Ring Scenario ===");
    let network = SimNetwork::new(RoutingConfig::default());
    network.add_node("A", 1, false)?;
    let b = network.add_node("B", 1, false)?;
    network.introduce_all();

    let (message, receipt) = network.send("A", "B", b"hello B")?;
    let acknowledged = receipt.wait_for_delivery(DELIVERY_TIMEOUT).await;
    info!(acknowledged, gate = %receipt.gate_name(), "A -> B");

    Ok(finish(network, "same-ring", 1, |_| usize::from(b.has_received(message.uuid()))).await)
}

/// Delivery into a foreign ring through an HTTP-reachable peer
///
/// ```text
/// ring 1: A (http)        ring 2: B ── C (http)
/// ```
///
/// B has no HTTP endpoint, so A hands the message to C with one hop left and
/// C delivers it over ring 2.
pub async fn run_ring_relay() -> SimResult<ScenarioReport> {
    info!("=== Running Ring-Relay Scenario ===");
    let network = SimNetwork::new(RoutingConfig::default());
    network.add_node("A", 1, true)?;
    let b = network.add_node("B", 2, false)?;
    network.add_node("C", 2, true)?;
    network.introduce_all();

    let (message, receipt) = network.send("A", "B", b"hello B via C")?;
    let acknowledged = receipt.wait_for_delivery(DELIVERY_TIMEOUT).await;
    info!(acknowledged, gate = %receipt.gate_name(), "A -> B");

    Ok(finish(network, "ring-relay", 1, |_| usize::from(b.has_received(message.uuid()))).await)
}

/// Flood to a destination the sender has never heard of
///
/// ```text
/// ring 1: A ── X ── G (http)      ring 2: D (http)
/// ```
///
/// Only G knows D. A broadcasts on ring 1, G forwards straight to D over
/// HTTP and every other copy dies on the dedup caches.
pub async fn run_flood() -> SimResult<ScenarioReport> {
    info!("=== Running Flood Scenario ===");
    let network = SimNetwork::new(RoutingConfig::default());
    network.add_node("A", 1, false)?;
    network.add_node("X", 1, false)?;
    network.add_node("G", 1, true)?;
    let d = network.add_node("D", 2, true)?;
    network.introduce("G", "D")?;

    let (message, receipt) = network.send("A", "D", b"anyone know D?")?;
    let acknowledged = receipt.wait_for_delivery(DELIVERY_TIMEOUT).await;
    info!(acknowledged, gate = %receipt.gate_name(), "A -> D");

    Ok(finish(network, "flood", 1, |_| usize::from(d.has_received(message.uuid()))).await)
}

/// Cloud-wide broadcast across several rings
///
/// The origin floods its own ring and relays over HTTP into every other ring,
/// where the relays flood again.
pub async fn run_cloud_broadcast(rings: u8, per_ring: usize) -> SimResult<ScenarioReport> {
    info!(rings, per_ring, "=== Running Cloud-Broadcast Scenario ===");
    let network = SimNetwork::new(RoutingConfig::default());
    for ring in 1..=rings.max(1) {
        for i in 0..per_ring.max(1) {
            network.add_node(&format!("r{ring}n{i}"), ring, true)?;
        }
    }
    network.introduce_all();
    let origin = "r1n0";

    let (message, receipt) = network.broadcast(origin, b"hello cloud")?;
    let acknowledged = receipt.wait_for_delivery(DELIVERY_TIMEOUT).await;
    info!(acknowledged, gate = %receipt.gate_name(), "Broadcast sent");

    let expected = network.nodes().len() - 1;
    Ok(finish(network, "cloud-broadcast", expected, |network| {
        network
            .nodes()
            .iter()
            .filter(|node| node.has_received(message.uuid()))
            .count()
    })
    .await)
}

/// Parameters of [`run_chaos`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    pub nodes: usize,
    pub rings: u8,
    pub messages: usize,
    /// Probability that a single transport delivery is lost
    pub loss_rate: f64,
    /// Probability that a node exposes an HTTP endpoint
    pub http_probability: f64,
    /// Probability that a node is offline for the run
    pub offline_probability: f64,
    /// Run with the WWW relay gateway on every node
    pub www: bool,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            nodes: 12,
            rings: 3,
            messages: 40,
            loss_rate: 0.1,
            http_probability: 0.5,
            offline_probability: 0.0,
            www: false,
        }
    }
}

/// Random traffic over a randomly built network with packet loss
///
/// Every node knows every other node. Delivery is best effort; the report
/// shows how much survived.
pub async fn run_chaos(config: ChaosConfig) -> SimResult<ScenarioReport> {
    info!(?config, "=== Running Chaos Scenario ===");
    let routing = RoutingConfig::default();
    let network = if config.www {
        SimNetwork::with_www(routing)
    } else {
        SimNetwork::new(routing)
    };

    let nodes = config.nodes.clamp(2, 200);
    let rings = config.rings.max(1);
    let names: Vec<String> = (0..nodes).map(|i| format!("n{i}")).collect();
    let offline: Vec<bool> = {
        let mut rng = rand::rng();
        for (i, name) in names.iter().enumerate() {
            let ring = (i % rings as usize) as u8 + 1;
            let http = rng.random_bool(config.http_probability.clamp(0.0, 1.0));
            network.add_node(name, ring, http)?;
        }
        names
            .iter()
            .map(|_| rng.random_bool(config.offline_probability.clamp(0.0, 1.0)))
            .collect()
    };
    network.introduce_all();
    network.set_loss_rate(config.loss_rate);
    for (name, offline) in names.iter().zip(&offline) {
        if *offline {
            network.set_online(name, false)?;
        }
    }

    let pairs: Vec<(usize, usize)> = {
        let mut rng = rand::rng();
        (0..config.messages)
            .map(|_| {
                let from = rng.random_range(0..nodes);
                let mut to = rng.random_range(0..nodes - 1);
                if to >= from {
                    to += 1;
                }
                (from, to)
            })
            .collect()
    };

    let mut sent = Vec::with_capacity(pairs.len());
    for (from, to) in pairs {
        let (message, receipt) = network.send(&names[from], &names[to], b"chaos")?;
        sent.push((to, message.uuid(), receipt));
    }
    for (_, _, receipt) in &sent {
        receipt.wait_for_delivery(DELIVERY_TIMEOUT).await;
    }

    let targets: Vec<_> = sent
        .iter()
        .map(|(to, id, _)| (names[*to].clone(), *id))
        .collect();
    let expected = targets.len();
    Ok(finish(network, "chaos", expected, move |network| {
        targets
            .iter()
            .filter(|(name, id)| network.node(name).is_ok_and(|node| node.has_received(*id)))
            .count()
    })
    .await)
}
