//! Simulation error types

use thiserror::Error;

/// Errors raised while building or driving a simulated network
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("No host address left for node {0}")]
    AddressSpaceExhausted(String),

    #[error("Node {0} has been shut down")]
    NodeStopped(String),
}

pub type SimResult<T> = Result<T, SimError>;
