//! # Ringmesh Core
//!
//! Core types and collaborator seams for the ringmesh agent overlay.
//!
//! Agents discover each other and exchange messages over interchangeable
//! transports (local UDP multicast, direct HTTP and a store-and-forward WWW
//! relay). This crate holds the values those transports carry and the
//! handles used to observe delivery; the routing engine lives in
//! `ringmesh-routing`.
//!
//! ## Key Types
//!
//! - [`Iden`]: typed identifier for agents, clouds and messages
//! - [`Message`]: immutable message value with a hop budget
//! - [`Ring`]: fingerprint of a local broadcast domain
//! - [`RemoteAgent`]: what a cloud knows about another agent
//! - [`Receipt`]: observable, eventually terminal delivery status
//!
//! ## Key Traits
//!
//! - [`Gateway`]: a transport the router delegates I/O to
//! - [`Signer`]: produces the signature a message should carry

pub mod agent;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod receipt;
pub mod ring;
pub mod signing;

// Re-export main types
pub use agent::RemoteAgent;
pub use config::RoutingConfig;
pub use endpoint::{Endpoint, GatewayType};
pub use error::{IdentityError, SigningError, TransportError};
pub use gateway::{Gateway, Gateways, NoopGateway};
pub use identity::{Iden, IdenType};
pub use message::{DEFAULT_HOPS, Message, MessageType, Payload};
pub use receipt::{
    MultiGatewayReceipt, MultiReceipt, Receipt, ReceiptStatus, SharedReceipt, SingleReceipt,
};
pub use ring::Ring;
pub use signing::{KeyedSigner, Signer, Unsigned};
