//! # Ringmesh Simulation
//!
//! An in-process simulation of the ringmesh agent overlay.
//!
//! ## Overview
//!
//! Nodes are grouped into rings: a ring is the set of agents one UDP
//! broadcast reaches. Some agents also expose an HTTP endpoint that agents on
//! other rings can reach directly. The simulation runs the real routing stack
//! on every node and only fakes the wire:
//!
//! - **Network** (`network.rs`): nodes, simulated gateways and listeners
//! - **Scenarios** (`scenarios.rs`): pre-built runs for the CLI and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use ringmesh_simulation::*;
//!
//! let network = SimNetwork::new(RoutingConfig::default());
//! network.add_node("A", 1, false)?;
//! network.add_node("B", 1, false)?;
//! network.introduce_all();
//!
//! let (message, receipt) = network.send("A", "B", b"hello")?;
//! assert!(receipt.wait_for_delivery(Duration::from_secs(1)).await);
//! ```

pub mod error;
pub mod network;
pub mod scenarios;

#[cfg(test)]
mod integration_scenarios;

pub use error::{SimError, SimResult};
pub use network::{SimNetwork, SimNode, SimStats, StatsSnapshot};
pub use scenarios::{
    ChaosConfig, ScenarioReport, run_chaos, run_cloud_broadcast, run_flood, run_ring_relay,
    run_same_ring,
};

pub use ringmesh_core::RoutingConfig;
