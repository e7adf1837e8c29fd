//! Gateway abstraction
//!
//! A [`Gateway`] is the transport collaborator the routing core hands
//! messages to. The core never touches sockets itself; it only decides which
//! gateway to use, with which hop budget, and towards which agent.
//!
//! ## Implementations
//!
//! - [`NoopGateway`]: stands in for an absent transport (always fails)
//! - UDP multicast, direct HTTP and the WWW relay live outside this crate

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::RemoteAgent;
use crate::endpoint::{Endpoint, GatewayType};
use crate::error::TransportError;
use crate::message::Message;
use crate::receipt::{SharedReceipt, SingleReceipt};

/// Transport gateway
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Human readable gateway name used in receipts and logs
    fn name(&self) -> &str;

    /// The transport family this gateway speaks
    fn kind(&self) -> GatewayType;

    /// Local endpoints this gateway listens on
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Whether this gateway can reach `agent` without help from another agent
    ///
    /// The default considers any agent advertising an endpoint of this
    /// gateway's kind reachable.
    fn can_reach(&self, agent: &RemoteAgent) -> bool {
        agent.has_endpoint(self.kind())
    }

    /// Hand a message to the transport
    ///
    /// `target` is the agent to deliver to, or `None` to broadcast.
    ///
    /// # Errors
    ///
    /// A transport error aborts the routing attempt that issued the send.
    async fn send(
        &self,
        message: &Message,
        target: Option<&RemoteAgent>,
    ) -> Result<SharedReceipt, TransportError>;
}

/// Gateway used in place of a transport that is not configured
///
/// It reaches nobody and every send resolves to a failed receipt, so routes
/// degrade instead of erroring.
#[derive(Debug, Clone, Copy)]
pub struct NoopGateway {
    kind: GatewayType,
}

impl NoopGateway {
    pub fn new(kind: GatewayType) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Gateway for NoopGateway {
    fn name(&self) -> &str {
        "noop"
    }

    fn kind(&self) -> GatewayType {
        self.kind
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    fn can_reach(&self, _agent: &RemoteAgent) -> bool {
        false
    }

    async fn send(
        &self,
        message: &Message,
        _target: Option<&RemoteAgent>,
    ) -> Result<SharedReceipt, TransportError> {
        Ok(SingleReceipt::failed(self.name(), message).shared())
    }
}

/// The gateways a cloud owns, one per transport family
#[derive(Clone, Default)]
pub struct Gateways {
    gateways: HashMap<GatewayType, Arc<dyn Gateway>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its own kind, replacing any previous one
    pub fn with(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.insert(gateway);
        self
    }

    pub fn insert(&mut self, gateway: Arc<dyn Gateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    /// Gateway for `kind`, or a no-op stand-in when none is registered
    pub fn get(&self, kind: GatewayType) -> Arc<dyn Gateway> {
        self.gateways
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopGateway::new(kind)))
    }

    pub fn has(&self, kind: GatewayType) -> bool {
        self.gateways.contains_key(&kind)
    }

    /// Endpoints of every registered gateway
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut kinds: Vec<_> = self.gateways.keys().copied().collect();
        kinds.sort();
        kinds
            .into_iter()
            .flat_map(|kind| self.gateways[&kind].endpoints())
            .collect()
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.gateways.iter().map(|(kind, g)| (kind, g.name())))
            .finish()
    }
}
