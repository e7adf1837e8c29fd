//! The local cloud: our identity, ring, gateways and known agents
//!
//! The router never owns agent state. It asks a [`Cloud`] for everything it
//! needs to decide where a message goes, which keeps routing policy testable
//! against small in-memory clouds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use ringmesh_core::{
    Gateways, Iden, Message, RemoteAgent, Ring, RoutingConfig, Signer, Unsigned,
};
use tracing::{debug, info};

use crate::validators::Validators;

/// Everything the routing core needs to know about the local node
pub trait Cloud: Send + Sync + 'static {
    /// Identity of this cloud
    fn iden(&self) -> Iden;

    /// The ring our own UDP broadcast reaches
    fn ring(&self) -> Ring;

    /// Look up a known remote agent
    fn remote_agent(&self, iden: &Iden) -> Option<RemoteAgent>;

    /// Snapshot of every known remote agent
    fn remote_agents(&self) -> Vec<RemoteAgent>;

    /// Whether `iden` is one of our own agents
    fn is_local_agent(&self, iden: &Iden) -> bool;

    /// Validation pipelines applied to inbound messages
    fn validators(&self) -> &Validators;

    /// The signature this cloud would put on `message`, if it signs at all
    fn sign(&self, message: &Message) -> Option<Vec<u8>>;

    /// Gateways by transport family
    fn gateways(&self) -> &Gateways;
}

#[derive(Debug, Clone, Copy)]
struct RingState {
    ring: Ring,
    /// Derived from a UDP endpoint rather than drawn at random
    derived: bool,
}

impl RingState {
    fn from_gateways(gateways: &Gateways) -> Self {
        match Ring::derive(&gateways.endpoints()) {
            Some(ring) => Self { ring, derived: true },
            None => Self {
                ring: Ring::random(),
                derived: false,
            },
        }
    }
}

/// In-memory [`Cloud`] backed by concurrent maps
pub struct LocalCloud {
    iden: Iden,
    ring: RwLock<RingState>,
    gateways: Gateways,
    remote: DashMap<Iden, RemoteAgent>,
    local: DashSet<Iden>,
    signer: Arc<dyn Signer>,
    validators: Validators,
}

impl LocalCloud {
    /// Create a cloud whose ring is derived from the gateways' endpoints
    pub fn new(gateways: Gateways, config: &RoutingConfig) -> Self {
        let ring = RingState::from_gateways(&gateways);
        Self {
            iden: Iden::cloud(),
            ring: RwLock::new(ring),
            gateways,
            remote: DashMap::new(),
            local: DashSet::new(),
            signer: Arc::new(Unsigned),
            validators: Validators::new(config.message_lifetime),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_iden(mut self, iden: Iden) -> Self {
        self.iden = iden;
        self
    }

    /// Add or replace a remote agent record
    pub fn register_remote(&self, agent: RemoteAgent) {
        debug!(agent = %agent.iden.short_id(), ring = %agent.ring, "Registered remote agent");
        self.remote.insert(agent.iden, agent);
    }

    pub fn remove_remote(&self, iden: &Iden) -> Option<RemoteAgent> {
        self.remote.remove(iden).map(|(_, agent)| agent)
    }

    /// Mark a remote agent as just heard from
    ///
    /// Returns `false` if the agent is unknown.
    pub fn touch_remote(&self, iden: &Iden) -> bool {
        match self.remote.get_mut(iden) {
            Some(mut agent) => {
                agent.touch();
                true
            }
            None => false,
        }
    }

    pub fn add_local(&self, iden: Iden) {
        self.local.insert(iden);
    }

    pub fn remove_local(&self, iden: &Iden) -> bool {
        self.local.remove(iden).is_some()
    }

    pub fn local_agents(&self) -> Vec<Iden> {
        self.local.iter().map(|iden| *iden).collect()
    }

    /// Recompute the ring after gateway endpoints changed
    ///
    /// Without a UDP endpoint a random ring is kept as long as it stays
    /// random; a new one is drawn only when a UDP endpoint went away.
    /// Returns `true` if the ring changed.
    pub fn refresh_ring(&self) -> bool {
        let next = RingState::from_gateways(&self.gateways);
        let mut current = self.ring.write();
        if !next.derived && !current.derived {
            return false;
        }
        if current.ring == next.ring {
            return false;
        }
        info!(old = %current.ring, new = %next.ring, "Ring changed");
        *current = next;
        true
    }

    /// Drop remote agents not heard from for longer than `max_idle`
    pub fn prune_idle_agents(&self, max_idle: chrono::Duration) -> Vec<Iden> {
        let cutoff = Utc::now() - max_idle;
        let mut pruned = Vec::new();
        self.remote.retain(|iden, agent| {
            let keep = agent.last_access >= cutoff;
            if !keep {
                pruned.push(*iden);
            }
            keep
        });
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Pruned idle remote agents");
        }
        pruned
    }

    /// Known remote agents grouped by ring
    pub fn agents_by_ring(&self) -> HashMap<Ring, Vec<RemoteAgent>> {
        let mut rings: HashMap<Ring, Vec<RemoteAgent>> = HashMap::new();
        for agent in self.remote.iter() {
            rings.entry(agent.ring).or_default().push(agent.clone());
        }
        rings
    }
}

impl Cloud for LocalCloud {
    fn iden(&self) -> Iden {
        self.iden
    }

    fn ring(&self) -> Ring {
        self.ring.read().ring
    }

    fn remote_agent(&self, iden: &Iden) -> Option<RemoteAgent> {
        self.remote.get(iden).map(|agent| agent.clone())
    }

    fn remote_agents(&self) -> Vec<RemoteAgent> {
        self.remote.iter().map(|agent| agent.clone()).collect()
    }

    fn is_local_agent(&self, iden: &Iden) -> bool {
        self.local.contains(iden)
    }

    fn validators(&self) -> &Validators {
        &self.validators
    }

    fn sign(&self, message: &Message) -> Option<Vec<u8>> {
        self.signer.sign(message)
    }

    fn gateways(&self) -> &Gateways {
        &self.gateways
    }
}

impl std::fmt::Debug for LocalCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCloud")
            .field("iden", &self.iden)
            .field("ring", &self.ring.read().ring)
            .field("remote", &self.remote.len())
            .field("local", &self.local.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringmesh_core::{Endpoint, Gateway, GatewayType, NoopGateway};

    fn cloud() -> LocalCloud {
        LocalCloud::new(Gateways::new(), &RoutingConfig::default())
    }

    #[test]
    fn test_register_and_lookup() {
        let cloud = cloud();
        let agent = RemoteAgent::new(Iden::agent(), Ring::random());
        cloud.register_remote(agent.clone());

        assert_eq!(cloud.remote_agent(&agent.iden), Some(agent.clone()));
        assert_eq!(cloud.remote_agents().len(), 1);
        assert!(cloud.remove_remote(&agent.iden).is_some());
        assert!(cloud.remote_agent(&agent.iden).is_none());
    }

    #[test]
    fn test_local_agents() {
        let cloud = cloud();
        let local = Iden::agent();
        cloud.add_local(local);

        assert!(cloud.is_local_agent(&local));
        assert!(!cloud.is_local_agent(&Iden::agent()));
        assert_eq!(cloud.local_agents(), vec![local]);
        assert!(cloud.remove_local(&local));
        assert!(!cloud.is_local_agent(&local));
    }

    #[test]
    fn test_touch_updates_last_access() {
        let cloud = cloud();
        let mut agent = RemoteAgent::new(Iden::agent(), Ring::random());
        agent.last_access = Utc::now() - chrono::Duration::minutes(5);
        cloud.register_remote(agent.clone());

        assert!(cloud.touch_remote(&agent.iden));
        let touched = cloud.remote_agent(&agent.iden).unwrap();
        assert!(touched.last_access > agent.last_access);
        assert!(!cloud.touch_remote(&Iden::agent()));
    }

    #[test]
    fn test_prune_idle_agents() {
        let cloud = cloud();
        let fresh = RemoteAgent::new(Iden::agent(), Ring::random());
        let mut stale = RemoteAgent::new(Iden::agent(), Ring::random());
        stale.last_access = Utc::now() - chrono::Duration::minutes(10);
        cloud.register_remote(fresh.clone());
        cloud.register_remote(stale.clone());

        let pruned = cloud.prune_idle_agents(chrono::Duration::minutes(1));
        assert_eq!(pruned, vec![stale.iden]);
        assert!(cloud.remote_agent(&fresh.iden).is_some());
    }

    #[test]
    fn test_agents_by_ring() {
        let cloud = cloud();
        let ring = Ring::random();
        cloud.register_remote(RemoteAgent::new(Iden::agent(), ring));
        cloud.register_remote(RemoteAgent::new(Iden::agent(), ring));
        cloud.register_remote(RemoteAgent::new(Iden::agent(), Ring::random()));

        let rings = cloud.agents_by_ring();
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[&ring].len(), 2);
    }

    #[test]
    fn test_ring_follows_udp_endpoint() {
        let endpoint = Endpoint::udp("192.168.1.20:7000".parse().unwrap(), 24);
        let cloud_a = LocalCloud::new(
            Gateways::new().with(Arc::new(FixedGateway(endpoint))),
            &RoutingConfig::default(),
        );
        let cloud_b = LocalCloud::new(
            Gateways::new().with(Arc::new(FixedGateway(Endpoint::udp(
                "192.168.1.77:7000".parse().unwrap(),
                24,
            )))),
            &RoutingConfig::default(),
        );
        assert_eq!(cloud_a.ring(), cloud_b.ring());
        assert!(!cloud_a.refresh_ring());
    }

    #[test]
    fn test_random_ring_survives_refresh() {
        let cloud = cloud();
        let ring = cloud.ring();
        assert!(!cloud.refresh_ring());
        assert!(!cloud.refresh_ring());
        assert_eq!(cloud.ring(), ring);
    }

    #[test]
    fn test_ring_tracks_udp_endpoint_changes() {
        let endpoints = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cloud = LocalCloud::new(
            Gateways::new().with(Arc::new(MovableGateway(endpoints.clone()))),
            &RoutingConfig::default(),
        );
        let random = cloud.ring();

        let udp = Endpoint::udp("10.1.2.3:7000".parse().unwrap(), 24);
        endpoints.lock().push(udp);
        assert!(cloud.refresh_ring());
        assert_eq!(cloud.ring(), Ring::make(&[udp]));
        assert!(!cloud.refresh_ring());

        // Losing the UDP endpoint draws one new random ring, then keeps it
        endpoints.lock().clear();
        assert!(cloud.refresh_ring());
        let fallback = cloud.ring();
        assert_ne!(fallback, random);
        assert_ne!(fallback, Ring::make(&[udp]));
        assert!(!cloud.refresh_ring());
        assert_eq!(cloud.ring(), fallback);
    }

    #[test]
    fn test_missing_gateway_falls_back_to_noop() {
        let cloud = cloud();
        let gateway = cloud.gateways().get(GatewayType::Http);
        assert_eq!(gateway.name(), NoopGateway::new(GatewayType::Http).name());
    }

    struct FixedGateway(Endpoint);

    #[async_trait::async_trait]
    impl Gateway for FixedGateway {
        fn name(&self) -> &str {
            "fixed"
        }

        fn kind(&self) -> GatewayType {
            GatewayType::Udp
        }

        fn endpoints(&self) -> Vec<Endpoint> {
            vec![self.0]
        }

        async fn send(
            &self,
            message: &Message,
            _target: Option<&RemoteAgent>,
        ) -> Result<ringmesh_core::SharedReceipt, ringmesh_core::TransportError> {
            Ok(ringmesh_core::SingleReceipt::delivered(self.name(), message).shared())
        }
    }

    struct MovableGateway(Arc<parking_lot::Mutex<Vec<Endpoint>>>);

    #[async_trait::async_trait]
    impl Gateway for MovableGateway {
        fn name(&self) -> &str {
            "movable"
        }

        fn kind(&self) -> GatewayType {
            GatewayType::Udp
        }

        fn endpoints(&self) -> Vec<Endpoint> {
            self.0.lock().clone()
        }

        async fn send(
            &self,
            message: &Message,
            _target: Option<&RemoteAgent>,
        ) -> Result<ringmesh_core::SharedReceipt, ringmesh_core::TransportError> {
            Ok(ringmesh_core::SingleReceipt::delivered(self.name(), message).shared())
        }
    }
}
