//! Remote agents known to a cloud

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, GatewayType};
use crate::identity::Iden;
use crate::ring::Ring;

/// What a cloud knows about an agent living in another process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAgent {
    pub iden: Iden,
    pub ring: Ring,
    pub endpoints: Vec<Endpoint>,
    /// Last time anything was heard from this agent
    pub last_access: DateTime<Utc>,
}

impl RemoteAgent {
    pub fn new(iden: Iden, ring: Ring) -> Self {
        Self {
            iden,
            ring,
            endpoints: Vec::new(),
            last_access: Utc::now(),
        }
    }

    /// Build an agent from its endpoints, deriving its ring
    pub fn from_endpoints(iden: Iden, endpoints: Vec<Endpoint>) -> Self {
        let ring = Ring::make(&endpoints);
        Self {
            iden,
            ring,
            endpoints,
            last_access: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Endpoints served by the given gateway type
    pub fn endpoints_of(&self, kind: GatewayType) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(move |e| e.kind == kind)
    }

    pub fn has_endpoint(&self, kind: GatewayType) -> bool {
        self.endpoints_of(kind).next().is_some()
    }

    /// Record that the agent was just heard from
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_access
    }
}
