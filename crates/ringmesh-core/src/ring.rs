//! Ring: a topology fingerprint for local broadcast domains
//!
//! Two entities with the same [`Ring`] are assumed to reach each other with a
//! single local UDP broadcast. The ring is derived from the first UDP
//! endpoint an entity knows about: the network address fills the upper 64
//! bits of the uuid and the prefix length the lower 64. Entities without a
//! UDP endpoint get a random ring, which never matches anybody else.
//!
//! A stale or wrong ring only costs efficiency. Routing always keeps a
//! flood-broadcast fallback.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::{Endpoint, GatewayType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ring {
    uuid: Uuid,
}

impl Ring {
    /// Derive the ring from a set of endpoints
    pub fn make<'a>(endpoints: impl IntoIterator<Item = &'a Endpoint>) -> Self {
        Self::derive(endpoints).unwrap_or_else(Self::random)
    }

    /// The ring of the first UDP endpoint, if there is one
    pub fn derive<'a>(endpoints: impl IntoIterator<Item = &'a Endpoint>) -> Option<Self> {
        endpoints
            .into_iter()
            .find(|e| e.kind == GatewayType::Udp)
            .map(|udp| Self {
                uuid: Uuid::from_u64_pair(udp.network_bits(), u64::from(udp.prefix_len)),
            })
    }

    /// A fresh random ring
    pub fn random() -> Self {
        Self {
            uuid: Uuid::new_v4(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Display for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ring:{}", self.uuid)
    }
}
