//! In-process network of ringmesh nodes
//!
//! Every [`SimNode`] runs the real routing stack: its own [`LocalCloud`],
//! [`Router`] and [`Sender`]. Only the transports are simulated:
//!
//! - **UDP** reaches nodes on the sender's ring
//! - **HTTP** reaches a target that exposes an HTTP endpoint
//! - **WWW** reaches every node
//!
//! Each delivery runs the receiving node's listener on its own task:
//! receivable check, local delivery, forwardable check, then
//! [`Router::forward`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use ringmesh_core::{
    Endpoint, Gateway, GatewayType, Gateways, Iden, Message, MessageType, Payload, ReceiptStatus,
    RemoteAgent, Ring, RoutingConfig, SharedReceipt, SingleReceipt, TransportError,
};
use ringmesh_routing::{Cloud, LocalCloud, Router, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{SimError, SimResult};

const UDP_PORT: u16 = 4000;
const HTTP_PORT: u16 = 8080;
const RING_PREFIX: u8 = 24;
const FIRST_HOST: usize = 10;
const LAST_HOST: u8 = 254;

/// Counters shared by every node of a network
#[derive(Debug, Default)]
pub struct SimStats {
    sent: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl SimStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SimStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages submitted by agents
    pub sent: u64,
    /// Transport deliveries that reached a listener
    pub received: u64,
    /// Deliveries the receivable check turned away
    pub rejected: u64,
    /// Messages handed to a local agent or accepted as cloud traffic
    pub delivered: u64,
    /// Inbound messages passed on by a router
    pub forwarded: u64,
    /// Deliveries lost to offline nodes or packet loss
    pub dropped: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} received={} rejected={} delivered={} forwarded={} dropped={}",
            self.sent, self.received, self.rejected, self.delivered, self.forwarded, self.dropped
        )
    }
}

struct NetworkInner {
    cloud: Iden,
    config: RoutingConfig,
    www: bool,
    nodes: DashMap<Iden, Arc<SimNode>>,
    names: DashMap<String, Iden>,
    /// Probability that any single transport delivery is lost
    loss_rate: RwLock<f64>,
    in_flight: AtomicUsize,
    stats: SimStats,
}

impl NetworkInner {
    fn node(&self, iden: &Iden) -> Option<Arc<SimNode>> {
        self.nodes.get(iden).map(|node| node.clone())
    }

    fn nodes_where(&self, keep: impl Fn(&SimNode) -> bool) -> Vec<Arc<SimNode>> {
        self.nodes
            .iter()
            .filter(|node| keep(node.value()))
            .map(|node| node.clone())
            .collect()
    }

    /// Hand `message` to `node`'s listener; `false` if the delivery was lost
    fn deliver(self: &Arc<Self>, node: &Arc<SimNode>, message: &Message) -> bool {
        if !node.is_online() {
            SimStats::bump(&self.stats.dropped);
            trace!(node = %node.name, "Delivery to offline node dropped");
            return false;
        }
        let loss = *self.loss_rate.read();
        if loss > 0.0 && rand::rng().random_bool(loss.min(1.0)) {
            SimStats::bump(&self.stats.dropped);
            trace!(node = %node.name, message_id = %message.uuid(), "Delivery lost");
            return false;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let network = self.clone();
        let node = node.clone();
        let message = message.clone();
        tokio::spawn(async move {
            node.listen(&network, message).await;
            network.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        true
    }
}

/// Simulated transport owned by one node
struct SimGateway {
    kind: GatewayType,
    name: String,
    owner: Iden,
    ring: Ring,
    endpoints: Vec<Endpoint>,
    network: Weak<NetworkInner>,
}

#[async_trait]
impl Gateway for SimGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GatewayType {
        self.kind
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    async fn send(
        &self,
        message: &Message,
        target: Option<&RemoteAgent>,
    ) -> Result<SharedReceipt, TransportError> {
        let Some(network) = self.network.upgrade() else {
            return Err(TransportError::Closed(self.name.clone()));
        };

        let recipients: Vec<Arc<SimNode>> = match (self.kind, target) {
            (GatewayType::Udp, Some(agent)) => network
                .node(&agent.iden)
                .filter(|node| node.ring() == self.ring)
                .into_iter()
                .collect(),
            (GatewayType::Udp, None) => {
                network.nodes_where(|node| node.agent != self.owner && node.ring() == self.ring)
            }
            (GatewayType::Http, Some(agent)) => network
                .node(&agent.iden)
                .filter(|node| node.http.is_some())
                .into_iter()
                .collect(),
            (GatewayType::Http, None) => {
                return Err(TransportError::Unreachable(
                    "http cannot broadcast".to_string(),
                ));
            }
            (GatewayType::Www, _) => network.nodes_where(|node| node.agent != self.owner),
        };

        let delivered = recipients
            .iter()
            .filter(|node| network.deliver(node, message))
            .count();
        trace!(
            gateway = %self.name,
            message_id = %message.uuid(),
            hops = message.hops(),
            delivered,
            "Simulated send"
        );

        let status = if delivered > 0 {
            ReceiptStatus::Delivered
        } else {
            ReceiptStatus::Failed
        };
        Ok(SingleReceipt::new(self.name.clone(), status, message).shared())
    }
}

/// One agent with its own cloud, router and sender
pub struct SimNode {
    pub name: String,
    pub agent: Iden,
    udp: Endpoint,
    http: Option<Endpoint>,
    online: AtomicBool,
    cloud: Arc<LocalCloud>,
    router: Arc<Router<LocalCloud>>,
    sender: Mutex<Option<Sender<LocalCloud>>>,
    sweepers: Vec<JoinHandle<()>>,
    inbox: Mutex<Vec<Message>>,
}

impl SimNode {
    pub fn ring(&self) -> Ring {
        self.cloud.ring()
    }

    pub fn cloud(&self) -> &Arc<LocalCloud> {
        &self.cloud
    }

    pub fn router(&self) -> &Arc<Router<LocalCloud>> {
        &self.router
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// How other nodes see this one
    pub fn remote_agent(&self) -> RemoteAgent {
        let mut agent = RemoteAgent::new(self.agent, self.ring()).with_endpoint(self.udp);
        if let Some(http) = self.http {
            agent = agent.with_endpoint(http);
        }
        agent
    }

    /// Messages delivered to this node's agent or to the cloud
    pub fn inbox(&self) -> Vec<Message> {
        self.inbox.lock().clone()
    }

    pub fn has_received(&self, message_id: Uuid) -> bool {
        self.inbox.lock().iter().any(|m| m.uuid() == message_id)
    }

    async fn listen(&self, network: &NetworkInner, message: Message) {
        SimStats::bump(&network.stats.received);
        let cloud = self.cloud.as_ref();

        if let Err(reason) = cloud.validators().is_receivable(cloud, &message) {
            SimStats::bump(&network.stats.rejected);
            trace!(node = %self.name, message_id = %message.uuid(), %reason, "Not receivable");
            return;
        }
        cloud.touch_remote(message.from());

        if cloud.is_local_agent(message.to()) || *message.to() == cloud.iden() {
            SimStats::bump(&network.stats.delivered);
            info!(
                node = %self.name,
                from = %message.from().short_id(),
                message_id = %message.uuid(),
                hops = message.hops(),
                "Message delivered"
            );
            self.inbox.lock().push(message.clone());
        }

        if let Err(reason) = cloud.validators().is_forwardable(cloud, &message) {
            trace!(node = %self.name, message_id = %message.uuid(), %reason, "Not forwardable");
            return;
        }
        match self.router.forward(&message).await {
            Ok(receipt) => {
                if !receipt.is_failed() {
                    SimStats::bump(&network.stats.forwarded);
                }
                debug!(node = %self.name, status = ?receipt.status(), gate = %receipt.gate_name(), "Forwarded");
            }
            Err(e) => warn!(node = %self.name, error = %e, "Forwarding failed"),
        }
    }
}

impl std::fmt::Debug for SimNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNode")
            .field("name", &self.name)
            .field("agent", &self.agent.short_id())
            .field("ring", &self.ring())
            .field("http", &self.http.is_some())
            .field("online", &self.is_online())
            .finish()
    }
}

/// A simulated multi-ring network
pub struct SimNetwork {
    inner: Arc<NetworkInner>,
}

impl SimNetwork {
    pub fn new(config: RoutingConfig) -> Self {
        Self::build(config, false)
    }

    /// A network whose nodes also carry a WWW relay gateway
    pub fn with_www(config: RoutingConfig) -> Self {
        Self::build(config, true)
    }

    fn build(config: RoutingConfig, www: bool) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                cloud: Iden::cloud(),
                config,
                www,
                nodes: DashMap::new(),
                names: DashMap::new(),
                loss_rate: RwLock::new(0.0),
                in_flight: AtomicUsize::new(0),
                stats: SimStats::default(),
            }),
        }
    }

    /// Identity of the cloud every node belongs to
    pub fn cloud_iden(&self) -> Iden {
        self.inner.cloud
    }

    /// Add a node on ring `10.0.<ring>.0/24`
    ///
    /// With `http` set, the node exposes an HTTP endpoint other nodes can
    /// reach directly. Must be called from within a tokio runtime.
    pub fn add_node(&self, name: &str, ring: u8, http: bool) -> SimResult<Arc<SimNode>> {
        if self.inner.names.contains_key(name) {
            return Err(SimError::DuplicateNode(name.to_string()));
        }
        let host = u8::try_from(FIRST_HOST + self.inner.nodes.len())
            .ok()
            .filter(|host| *host <= LAST_HOST)
            .ok_or_else(|| SimError::AddressSpaceExhausted(name.to_string()))?;
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, ring, host));
        let udp = Endpoint::udp(SocketAddr::new(ip, UDP_PORT), RING_PREFIX);
        let http = http.then(|| Endpoint::http(SocketAddr::new(ip, HTTP_PORT)));

        let agent = Iden::agent();
        let ring_id = Ring::make(&[udp]);
        let network = Arc::downgrade(&self.inner);
        let gateway = |kind: GatewayType, endpoints: Vec<Endpoint>| -> Arc<dyn Gateway> {
            Arc::new(SimGateway {
                kind,
                name: kind.to_string(),
                owner: agent,
                ring: ring_id,
                endpoints,
                network: network.clone(),
            })
        };

        let mut gateways = Gateways::new()
            .with(gateway(GatewayType::Udp, vec![udp]))
            .with(gateway(GatewayType::Http, http.into_iter().collect()));
        if self.inner.www {
            gateways.insert(gateway(GatewayType::Www, Vec::new()));
        }

        let cloud = Arc::new(LocalCloud::new(gateways, &self.inner.config).with_iden(self.inner.cloud));
        cloud.add_local(agent);
        let router = Arc::new(Router::new(cloud.clone(), self.inner.config.clone()));
        let mut sweepers = cloud.validators().spawn_sweeper(self.inner.config.cache_sweep_interval);
        sweepers.push(router.spawn_cache_sweeper());
        let sender = Sender::from_config(router.clone());

        let node = Arc::new(SimNode {
            name: name.to_string(),
            agent,
            udp,
            http,
            online: AtomicBool::new(true),
            cloud,
            router,
            sender: Mutex::new(Some(sender)),
            sweepers,
            inbox: Mutex::new(Vec::new()),
        });
        debug!(node = name, agent = %agent.short_id(), ring = %node.ring(), http = http.is_some(), "Node added");
        self.inner.names.insert(name.to_string(), agent);
        self.inner.nodes.insert(agent, node.clone());
        Ok(node)
    }

    pub fn node(&self, name: &str) -> SimResult<Arc<SimNode>> {
        self.inner
            .names
            .get(name)
            .and_then(|iden| self.inner.node(&iden))
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    pub fn nodes(&self) -> Vec<Arc<SimNode>> {
        self.inner.nodes_where(|_| true)
    }

    /// Teach `who` about `whom`
    pub fn introduce(&self, who: &str, whom: &str) -> SimResult<()> {
        let who = self.node(who)?;
        let whom = self.node(whom)?;
        if who.agent != whom.agent {
            who.cloud.register_remote(whom.remote_agent());
        }
        Ok(())
    }

    /// Teach every node about every other node
    pub fn introduce_all(&self) {
        let nodes = self.nodes();
        for who in &nodes {
            for whom in &nodes {
                if who.agent != whom.agent {
                    who.cloud.register_remote(whom.remote_agent());
                }
            }
        }
    }

    pub fn set_online(&self, name: &str, online: bool) -> SimResult<()> {
        let node = self.node(name)?;
        node.online.store(online, Ordering::SeqCst);
        debug!(node = name, online, "Node availability changed");
        Ok(())
    }

    pub fn set_loss_rate(&self, loss_rate: f64) {
        *self.inner.loss_rate.write() = loss_rate.clamp(0.0, 1.0);
    }

    /// Send an application message from one node's agent to another's
    pub fn send(&self, from: &str, to: &str, body: &[u8]) -> SimResult<(Message, SharedReceipt)> {
        let to = self.node(to)?.agent;
        self.submit(from, to, Payload::Generic(body.to_vec()))
    }

    /// Send a message addressed to the whole cloud
    pub fn broadcast(&self, from: &str, body: &[u8]) -> SimResult<(Message, SharedReceipt)> {
        self.submit(from, self.inner.cloud, Payload::Generic(body.to_vec()))
    }

    fn submit(&self, from: &str, to: Iden, payload: Payload) -> SimResult<(Message, SharedReceipt)> {
        let node = self.node(from)?;
        let message = Message::new(MessageType::App, node.agent, to, payload);
        let sender = node.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SimError::NodeStopped(node.name.clone()));
        };
        SimStats::bump(&self.inner.stats.sent);
        let receipt: SharedReceipt = sender.send(message.clone());
        Ok((message, receipt))
    }

    /// Wait until no delivery has been in flight for a short quiet period
    ///
    /// Returns `false` if the network is still busy when `timeout` elapses.
    pub async fn settle(&self, timeout: Duration) -> bool {
        const POLL: Duration = Duration::from_millis(10);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut quiet = 0;
        while tokio::time::Instant::now() < deadline {
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                quiet += 1;
                if quiet >= 3 {
                    return true;
                }
            } else {
                quiet = 0;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.inner.config
    }

    /// Stop every node's sender and cache sweepers
    pub async fn shutdown(&self) {
        for node in self.nodes() {
            let sender = node.sender.lock().take();
            if let Some(sender) = sender {
                sender.shutdown().await;
            }
            for sweeper in &node.sweepers {
                sweeper.abort();
            }
        }
        info!(stats = %self.stats(), "Network shut down");
    }
}

impl std::fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNetwork")
            .field("nodes", &self.inner.nodes.len())
            .field("www", &self.inner.www)
            .finish()
    }
}
