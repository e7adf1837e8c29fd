//! # Ringmesh Routing
//!
//! Routing and delivery engine for the ringmesh agent overlay.
//!
//! The crate decides, for every message an agent sends or receives, which
//! transport to use and with which hop budget. It does not own sockets or
//! wire formats; those live behind the [`Gateway`](ringmesh_core::Gateway)
//! trait.
//!
//! ## Core Components
//!
//! - [`Router`]: evaluates an ordered chain of [`Route`]s, first match wins
//! - [`Sender`]: worker pool that routes in the background and returns
//!   placeholder receipts immediately
//! - [`Validators`]: receivable and forwardable checks for inbound messages
//! - [`Cloud`] / [`LocalCloud`]: the node's identity, ring, gateways and
//!   known agents
//! - [`TtlCache`]: concurrent map with per-entry expiry backing every
//!   dedup check
//!
//! ## Routing Order
//!
//! 1. **GUARDS**: spent hop budget or an already-routed uuid fails at once
//! 2. **DIRECT**: HTTP unicast to a reachable destination on another ring
//! 3. **SAME RING**: UDP to a destination on our broadcast segment
//! 4. **RELAY**: HTTP through a peer on the destination's ring
//! 5. **FLOOD**: UDP broadcast with a bounded hop budget
//!
//! Messages addressed to the cloud itself skip 2 to 5 and use a cloud
//! broadcast: UDP on our ring plus a bounded HTTP fan-out into every other
//! known ring.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ringmesh_routing::{LocalCloud, Router, Sender};
//!
//! let cloud = Arc::new(LocalCloud::new(gateways, &config));
//! let router = Arc::new(Router::new(cloud, config));
//! let sender = Sender::from_config(router);
//!
//! let receipt = sender.send(message);
//! if receipt.wait_for_delivery(Duration::from_secs(5)).await {
//!     println!("delivered via {}", receipt.gate_name());
//! }
//! ```

pub mod cache;
pub mod cloud;
pub mod error;
pub mod route;
pub mod router;
pub mod sender;
pub mod validators;

pub use cache::TtlCache;
pub use cloud::{Cloud, LocalCloud};
pub use error::{RoutingError, RoutingResult};
pub use route::{Origin, Route, RouteContext, RouteOutcome};
pub use router::Router;
pub use sender::Sender;
pub use validators::{Reason, Validators};
