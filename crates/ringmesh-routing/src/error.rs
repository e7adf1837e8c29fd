//! Routing error types

use thiserror::Error;
use uuid::Uuid;

pub use ringmesh_core::TransportError;

/// Errors surfaced by the router
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Every route in the chain declined the message
    #[error("No suitable route for message {0}")]
    NoRoute(Uuid),

    /// A gateway failed while sending; the rest of the chain was skipped
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_display() {
        let id = Uuid::new_v4();
        assert!(format!("{}", RoutingError::NoRoute(id)).contains(&id.to_string()));

        let err: RoutingError = TransportError::Closed("udp".to_string()).into();
        assert!(matches!(err, RoutingError::Transport(_)));
        assert!(format!("{}", err).contains("Gateway closed"));
    }
}
