//! Routes of the routing chain
//!
//! A [`Route`] inspects a message and either accepts it, returning the
//! receipt of whatever it sent, or declines with
//! [`RouteOutcome::NotApplicable`] so the next route gets a chance. A
//! transport error propagates out of the chain and aborts it.
//!
//! ## Default chains
//!
//! Outbound (agent-addressed):
//!
//! 1. [`ZeroHopsGuard`]: hop budget exhausted, fail
//! 2. [`AlreadySeenGuard`]: uuid in the forwarding cache, fail
//! 3. [`DirectHttp`]: destination reachable over HTTP, unicast with hops 0
//! 4. [`SameRingUdp`]: destination on our ring, UDP with hops 0
//! 5. [`RingRelayHttp`]: relay through an HTTP-reachable agent on the
//!    destination's ring with hops 1
//! 6. [`WwwSideChannel`]: best-effort copy through the WWW relay
//! 7. [`UdpBroadcast`]: flood fallback
//!
//! Cloud-addressed messages replace steps 3 to 7 with [`WwwSideChannel`] and
//! [`CloudBroadcast`]. Inbound forwarding prepends [`ZeroHopsGuard`] and
//! [`LocalDestinationGuard`] to whichever chain applies.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ringmesh_core::{
    GatewayType, Message, MultiGatewayReceipt, MultiReceipt, RemoteAgent, Ring, RoutingConfig,
    SharedReceipt, SingleReceipt,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::cloud::Cloud;
use crate::error::RoutingResult;

/// Where the message being routed came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Created by one of our own agents
    Local,
    /// Received from the network and being passed on
    Forwarded,
}

/// Result of a single route attempt
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// The route handled the message; evaluation stops here
    Accepted(SharedReceipt),
    /// The route does not apply; try the next one
    NotApplicable,
}

/// State shared by every route during one chain evaluation
pub struct RouteContext<'a, C: Cloud> {
    pub cloud: &'a C,
    pub config: &'a RoutingConfig,
    pub origin: Origin,
    seen: &'a TtlCache<Uuid, u8>,
    stamped: AtomicBool,
}

impl<'a, C: Cloud> RouteContext<'a, C> {
    pub fn new(
        cloud: &'a C,
        config: &'a RoutingConfig,
        origin: Origin,
        seen: &'a TtlCache<Uuid, u8>,
    ) -> Self {
        Self {
            cloud,
            config,
            origin,
            seen,
            stamped: AtomicBool::new(false),
        }
    }

    /// Record the message uuid in the forwarding cache before transmitting
    ///
    /// Stamping happens at most once per evaluation. Returns `false` when a
    /// concurrent evaluation of the same uuid stamped it first, in which case
    /// the caller must not transmit.
    pub fn stamp(&self, message: &Message) -> bool {
        if self.stamped.load(Ordering::Acquire) {
            return true;
        }
        if self.seen.insert_if_absent(message.uuid(), message.hops()) {
            self.stamped.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Whether a previous evaluation already handled this uuid
    pub fn already_seen(&self, message: &Message) -> bool {
        !self.stamped.load(Ordering::Acquire) && self.seen.contains(&message.uuid())
    }

    /// Hop budget for a broadcast
    ///
    /// Locally originated messages start with `initial`; forwarded ones spend
    /// one hop.
    pub fn broadcast_hops(&self, message: &Message, initial: u8) -> u8 {
        match self.origin {
            Origin::Local => initial,
            Origin::Forwarded => message.hops().saturating_sub(1),
        }
    }

    fn known_destination(&self, message: &Message) -> Option<RemoteAgent> {
        self.cloud.remote_agent(message.to())
    }
}

/// One link of the routing chain
#[async_trait]
pub trait Route<C: Cloud>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Try to route `message`
    ///
    /// # Errors
    ///
    /// Returns an error when a gateway fails; the chain stops there.
    async fn attempt(&self, ctx: &RouteContext<'_, C>, message: &Message)
    -> RoutingResult<RouteOutcome>;
}

/// Chain of a locally originated or forwarded agent-addressed message
pub fn outbound_chain<C: Cloud>() -> Vec<Box<dyn Route<C>>> {
    vec![
        Box::new(ZeroHopsGuard),
        Box::new(AlreadySeenGuard),
        Box::new(DirectHttp),
        Box::new(SameRingUdp),
        Box::new(RingRelayHttp),
        Box::new(WwwSideChannel),
        Box::new(UdpBroadcast),
    ]
}

/// Chain of a message addressed to the cloud itself
pub fn cloud_chain<C: Cloud>() -> Vec<Box<dyn Route<C>>> {
    vec![
        Box::new(ZeroHopsGuard),
        Box::new(AlreadySeenGuard),
        Box::new(WwwSideChannel),
        Box::new(CloudBroadcast),
    ]
}

/// Guards run before forwarding an inbound message
pub fn inbound_chain<C: Cloud>() -> Vec<Box<dyn Route<C>>> {
    vec![Box::new(ZeroHopsGuard), Box::new(LocalDestinationGuard)]
}

fn failed(gateway: &str, message: &Message) -> RouteOutcome {
    RouteOutcome::Accepted(SingleReceipt::failed(gateway, message).shared())
}

fn lost_stamp(route: &'static str, message: &Message) -> RouteOutcome {
    debug!(route, message_id = %message.uuid(), "Concurrent evaluation already routing message");
    failed("already-seen", message)
}

/// Fails messages whose hop budget is spent
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroHopsGuard;

#[async_trait]
impl<C: Cloud> Route<C> for ZeroHopsGuard {
    fn name(&self) -> &'static str {
        "zero-hops"
    }

    async fn attempt(
        &self,
        _ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if message.hops() == 0 {
            return Ok(failed(Route::<C>::name(self), message));
        }
        Ok(RouteOutcome::NotApplicable)
    }
}

/// Fails messages this router already handled within the dedup window
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadySeenGuard;

#[async_trait]
impl<C: Cloud> Route<C> for AlreadySeenGuard {
    fn name(&self) -> &'static str {
        "already-seen"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if ctx.already_seen(message) {
            return Ok(failed(Route::<C>::name(self), message));
        }
        Ok(RouteOutcome::NotApplicable)
    }
}

/// Stops forwarding once the message reached one of our own agents
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDestinationGuard;

#[async_trait]
impl<C: Cloud> Route<C> for LocalDestinationGuard {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if ctx.cloud.is_local_agent(message.to()) {
            let receipt = SingleReceipt::delivered(Route::<C>::name(self), message).shared();
            return Ok(RouteOutcome::Accepted(receipt));
        }
        Ok(RouteOutcome::NotApplicable)
    }
}

/// Unicast over HTTP to a destination on another ring
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectHttp;

#[async_trait]
impl<C: Cloud> Route<C> for DirectHttp {
    fn name(&self) -> &'static str {
        "direct-http"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        let Some(agent) = ctx.known_destination(message) else {
            return Ok(RouteOutcome::NotApplicable);
        };
        // Same-ring destinations always go over UDP
        if agent.ring == ctx.cloud.ring() {
            return Ok(RouteOutcome::NotApplicable);
        }
        let gateway = ctx.cloud.gateways().get(GatewayType::Http);
        if !gateway.can_reach(&agent) {
            return Ok(RouteOutcome::NotApplicable);
        }
        if !ctx.stamp(message) {
            return Ok(lost_stamp(Route::<C>::name(self), message));
        }

        let receipt = gateway.send(&message.with_hops(0), Some(&agent)).await?;
        if receipt.is_failed() {
            debug!(
                message_id = %message.uuid(),
                to = %agent.iden.short_id(),
                "Direct HTTP send failed, falling through"
            );
            return Ok(RouteOutcome::NotApplicable);
        }
        Ok(RouteOutcome::Accepted(receipt))
    }
}

/// UDP to a destination on our own broadcast segment
#[derive(Debug, Clone, Copy, Default)]
pub struct SameRingUdp;

#[async_trait]
impl<C: Cloud> Route<C> for SameRingUdp {
    fn name(&self) -> &'static str {
        "same-ring-udp"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        let Some(agent) = ctx.known_destination(message) else {
            return Ok(RouteOutcome::NotApplicable);
        };
        if agent.ring != ctx.cloud.ring() {
            return Ok(RouteOutcome::NotApplicable);
        }
        if !ctx.stamp(message) {
            return Ok(lost_stamp(Route::<C>::name(self), message));
        }

        let gateway = ctx.cloud.gateways().get(GatewayType::Udp);
        let receipt = gateway.send(&message.with_hops(0), Some(&agent)).await?;
        if receipt.is_failed() {
            debug!(
                message_id = %message.uuid(),
                to = %agent.iden.short_id(),
                "Same-ring UDP send failed, falling through"
            );
            return Ok(RouteOutcome::NotApplicable);
        }
        Ok(RouteOutcome::Accepted(receipt))
    }
}

/// HTTP relay through another agent on the destination's ring
///
/// The relay receives the message with one hop left and delivers it over its
/// own ring. Candidates are tried most recently heard from first; the first
/// delivered receipt wins. If none delivers but some are still pending, the
/// pending receipts are returned together.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingRelayHttp;

impl RingRelayHttp {
    fn candidates<C: Cloud>(ctx: &RouteContext<'_, C>, destination: &RemoteAgent) -> Vec<RemoteAgent> {
        let gateway = ctx.cloud.gateways().get(GatewayType::Http);
        let mut candidates: Vec<_> = ctx
            .cloud
            .remote_agents()
            .into_iter()
            .filter(|agent| agent.ring == destination.ring && agent.iden != destination.iden)
            .filter(|agent| gateway.can_reach(agent))
            .collect();
        candidates.sort_by_key(|agent| Reverse(agent.last_access));
        candidates
    }
}

#[async_trait]
impl<C: Cloud> Route<C> for RingRelayHttp {
    fn name(&self) -> &'static str {
        "ring-relay-http"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if ctx.origin != Origin::Local {
            return Ok(RouteOutcome::NotApplicable);
        }
        let Some(destination) = ctx.known_destination(message) else {
            return Ok(RouteOutcome::NotApplicable);
        };
        if destination.ring == ctx.cloud.ring() {
            return Ok(RouteOutcome::NotApplicable);
        }
        let candidates = Self::candidates(ctx, &destination);
        if candidates.is_empty() {
            trace!(message_id = %message.uuid(), ring = %destination.ring, "No relay candidates");
            return Ok(RouteOutcome::NotApplicable);
        }
        if !ctx.stamp(message) {
            return Ok(lost_stamp(Route::<C>::name(self), message));
        }

        let gateway = ctx.cloud.gateways().get(GatewayType::Http);
        let relayed = message.with_hops(1);
        let mut pending = Vec::new();
        for relay in &candidates {
            let receipt = gateway.send(&relayed, Some(relay)).await?;
            if receipt.is_delivered() {
                debug!(
                    message_id = %message.uuid(),
                    relay = %relay.iden.short_id(),
                    "Relayed through ring peer"
                );
                return Ok(RouteOutcome::Accepted(receipt));
            }
            if !receipt.is_failed() {
                pending.push(receipt);
            }
        }

        if pending.is_empty() {
            debug!(message_id = %message.uuid(), tried = candidates.len(), "Every relay failed");
            return Ok(RouteOutcome::NotApplicable);
        }
        Ok(RouteOutcome::Accepted(
            MultiReceipt::new(message, pending).shared(),
        ))
    }
}

/// Best-effort copy through the WWW relay gateway
///
/// Runs detached and never ends the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct WwwSideChannel;

#[async_trait]
impl<C: Cloud> Route<C> for WwwSideChannel {
    fn name(&self) -> &'static str {
        "www"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if ctx.origin != Origin::Local || !ctx.cloud.gateways().has(GatewayType::Www) {
            return Ok(RouteOutcome::NotApplicable);
        }

        let gateway = ctx.cloud.gateways().get(GatewayType::Www);
        let message = message.clone();
        tokio::spawn(async move {
            match gateway.send(&message, None).await {
                Ok(receipt) => {
                    trace!(message_id = %message.uuid(), status = ?receipt.status(), "WWW copy sent")
                }
                Err(e) => warn!(message_id = %message.uuid(), error = %e, "WWW copy failed"),
            }
        });
        Ok(RouteOutcome::NotApplicable)
    }
}

/// Flood the message over UDP; accepts everything that reaches it
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpBroadcast;

#[async_trait]
impl<C: Cloud> Route<C> for UdpBroadcast {
    fn name(&self) -> &'static str {
        "udp-broadcast"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if !ctx.stamp(message) {
            return Ok(lost_stamp(Route::<C>::name(self), message));
        }
        let hops = ctx.broadcast_hops(message, ctx.config.max_hops_direct);
        let gateway = ctx.cloud.gateways().get(GatewayType::Udp);
        let receipt = gateway.send(&message.with_hops(hops), None).await?;
        Ok(RouteOutcome::Accepted(receipt))
    }
}

/// UDP broadcast plus bounded HTTP fan-out into foreign rings
///
/// Our own ring is covered by the broadcast. Every other ring gets at most
/// `max_messages_per_ring` HTTP copies, sent to its most recently heard from
/// reachable agents. Fan-out only happens for locally originated messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudBroadcast;

impl CloudBroadcast {
    fn relays<C: Cloud>(ctx: &RouteContext<'_, C>) -> Vec<RemoteAgent> {
        let own_ring = ctx.cloud.ring();
        let gateway = ctx.cloud.gateways().get(GatewayType::Http);

        let mut rings: HashMap<Ring, Vec<RemoteAgent>> = HashMap::new();
        for agent in ctx.cloud.remote_agents() {
            if agent.ring != own_ring && gateway.can_reach(&agent) {
                rings.entry(agent.ring).or_default().push(agent);
            }
        }

        let limit = ctx.config.max_messages_per_ring;
        rings
            .into_values()
            .flat_map(|mut agents| {
                agents.sort_by_key(|agent| Reverse(agent.last_access));
                agents.truncate(limit);
                agents
            })
            .collect()
    }
}

#[async_trait]
impl<C: Cloud> Route<C> for CloudBroadcast {
    fn name(&self) -> &'static str {
        "cloud-broadcast"
    }

    async fn attempt(
        &self,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<RouteOutcome> {
        if !ctx.stamp(message) {
            return Ok(lost_stamp(Route::<C>::name(self), message));
        }
        let hops = ctx.broadcast_hops(message, ctx.config.max_hops_cloud);
        let broadcast = message.with_hops(hops);

        let udp = ctx.cloud.gateways().get(GatewayType::Udp);
        let mut receipt =
            MultiGatewayReceipt::new(message).with(GatewayType::Udp, udp.send(&broadcast, None).await?);

        if ctx.origin == Origin::Local {
            let relays = Self::relays(ctx);
            if !relays.is_empty() {
                let http = ctx.cloud.gateways().get(GatewayType::Http);
                let mut sent = Vec::with_capacity(relays.len());
                for relay in &relays {
                    sent.push(http.send(&broadcast, Some(relay)).await?);
                }
                debug!(message_id = %message.uuid(), relays = sent.len(), "Cloud broadcast relayed");
                receipt = receipt.with(GatewayType::Http, MultiReceipt::new(message, sent).shared());
            }
        }
        Ok(RouteOutcome::Accepted(receipt.shared()))
    }
}
