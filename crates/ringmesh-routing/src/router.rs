//! The router
//!
//! [`Router`] evaluates an ordered chain of [`Route`]s and returns the
//! receipt of the first route that accepts the message. It owns the
//! forwarding dedup cache; everything else it asks the [`Cloud`] for.

use std::sync::Arc;

use ringmesh_core::{Message, RoutingConfig, SharedReceipt};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::cloud::Cloud;
use crate::error::{RoutingError, RoutingResult};
use crate::route::{self, Origin, Route, RouteContext, RouteOutcome};

/// Chain-of-responsibility message router
pub struct Router<C: Cloud> {
    cloud: Arc<C>,
    config: RoutingConfig,
    /// Uuids recently sent or forwarded, with the hop count seen at the time
    seen: Arc<TtlCache<Uuid, u8>>,
    outbound: Vec<Box<dyn Route<C>>>,
    cloud_broadcast: Vec<Box<dyn Route<C>>>,
    inbound: Vec<Box<dyn Route<C>>>,
}

impl<C: Cloud> Router<C> {
    /// Create a router with the default route chains
    pub fn new(cloud: Arc<C>, config: RoutingConfig) -> Self {
        Self::with_routes(cloud, config, route::outbound_chain(), route::cloud_chain())
    }

    /// Create a router with custom chains for agent- and cloud-addressed
    /// messages
    ///
    /// Inbound forwarding keeps its fixed guards in front of either chain.
    pub fn with_routes(
        cloud: Arc<C>,
        config: RoutingConfig,
        outbound: Vec<Box<dyn Route<C>>>,
        cloud_broadcast: Vec<Box<dyn Route<C>>>,
    ) -> Self {
        Self {
            seen: Arc::new(TtlCache::new(config.seen_ttl)),
            cloud,
            config,
            outbound,
            cloud_broadcast,
            inbound: route::inbound_chain(),
        }
    }

    pub fn cloud(&self) -> &Arc<C> {
        &self.cloud
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// The forwarding dedup cache
    pub fn seen(&self) -> &TtlCache<Uuid, u8> {
        &self.seen
    }

    /// Route a message created by one of our own agents
    ///
    /// # Errors
    ///
    /// Fails with [`RoutingError::Transport`] when a gateway errors and with
    /// [`RoutingError::NoRoute`] when every route declines.
    #[instrument(skip(self, message), fields(message_id = %message.uuid(), kind = %message.kind()))]
    pub async fn send(&self, message: &Message) -> RoutingResult<SharedReceipt> {
        let ctx = RouteContext::new(self.cloud.as_ref(), &self.config, Origin::Local, &self.seen);
        self.evaluate(self.chain_for(message).iter(), &ctx, message).await
    }

    /// Pass on a message received from the network
    ///
    /// # Errors
    ///
    /// Same as [`Router::send`].
    #[instrument(skip(self, message), fields(message_id = %message.uuid(), hops = message.hops()))]
    pub async fn forward(&self, message: &Message) -> RoutingResult<SharedReceipt> {
        let ctx = RouteContext::new(
            self.cloud.as_ref(),
            &self.config,
            Origin::Forwarded,
            &self.seen,
        );
        let chain = self.inbound.iter().chain(self.chain_for(message).iter());
        self.evaluate(chain, &ctx, message).await
    }

    fn chain_for(&self, message: &Message) -> &[Box<dyn Route<C>>] {
        if message.to().is_cloud() {
            &self.cloud_broadcast
        } else {
            &self.outbound
        }
    }

    async fn evaluate<'r>(
        &self,
        routes: impl Iterator<Item = &'r Box<dyn Route<C>>> + Send,
        ctx: &RouteContext<'_, C>,
        message: &Message,
    ) -> RoutingResult<SharedReceipt>
    where
        C: 'r,
    {
        for route in routes {
            match route.attempt(ctx, message).await? {
                RouteOutcome::Accepted(receipt) => {
                    debug!(
                        route = route.name(),
                        status = ?receipt.status(),
                        gate = %receipt.gate_name(),
                        "Message routed"
                    );
                    return Ok(receipt);
                }
                RouteOutcome::NotApplicable => trace!(route = route.name(), "Route not applicable"),
            }
        }
        Err(RoutingError::NoRoute(message.uuid()))
    }

    /// Periodically evict expired entries from the forwarding cache
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        self.seen.spawn_sweeper(self.config.cache_sweep_interval)
    }
}

impl<C: Cloud> std::fmt::Debug for Router<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |chain: &[Box<dyn Route<C>>]| chain.iter().map(|r| r.name()).collect::<Vec<_>>();
        f.debug_struct("Router")
            .field("outbound", &names(&self.outbound))
            .field("cloud_broadcast", &names(&self.cloud_broadcast))
            .field("seen", &self.seen.len())
            .finish()
    }
}
