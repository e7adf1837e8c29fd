//! Error types for the ringmesh core

use thiserror::Error;

/// Errors raised by a gateway while handing a message to its transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Target unreachable: {0}")]
    Unreachable(String),

    #[error("Gateway closed: {0}")]
    Closed(String),
}

/// Errors related to identifiers
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Unknown identity kind: {0}")]
    UnknownKind(String),
}

/// Errors related to message signing
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Canonical encoding failed: {0}")]
    Encoding(#[from] postcard::Error),
}
