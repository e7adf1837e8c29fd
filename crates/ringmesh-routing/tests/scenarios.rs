//! End-to-end routing scenarios against recording gateways

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ringmesh_core::{
    Endpoint, Gateway, GatewayType, Gateways, Iden, Message, MessageType, Payload, Receipt,
    ReceiptStatus, RemoteAgent, Ring, RoutingConfig, SharedReceipt, SingleReceipt,
    TransportError,
};
use ringmesh_routing::{Cloud, LocalCloud, Router, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    hops: u8,
    target: Option<Iden>,
}

struct Recorder {
    kind: GatewayType,
    endpoints: Vec<Endpoint>,
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    fn new(kind: GatewayType, endpoints: Vec<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            endpoints,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Gateway for Recorder {
    fn name(&self) -> &str {
        match self.kind {
            GatewayType::Udp => "udp",
            GatewayType::Http => "http",
            GatewayType::Www => "www",
        }
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
        self.calls.lock().push(Call {
            hops: message.hops(),
            target: target.map(|agent| agent.iden),
        });
        Ok(SingleReceipt::delivered(self.name(), message).shared())
    }
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Node "A" on ring 10.0.1.0/24 with UDP and HTTP gateways
struct NodeA {
    udp: Arc<Recorder>,
    http: Arc<Recorder>,
    www: Option<Arc<Recorder>>,
    cloud: Arc<LocalCloud>,
    router: Arc<Router<LocalCloud>>,
}

fn node_a(with_www: bool) -> NodeA {
    let udp = Recorder::new(
        GatewayType::Udp,
        vec![Endpoint::udp(addr("10.0.1.10:4000"), 24)],
    );
    let http = Recorder::new(GatewayType::Http, vec![Endpoint::http(addr("10.0.1.10:8080"))]);
    let mut gateways = Gateways::new().with(udp.clone()).with(http.clone());
    let www = with_www.then(|| Recorder::new(GatewayType::Www, Vec::new()));
    if let Some(www) = &www {
        gateways.insert(www.clone());
    }

    let config = RoutingConfig::default();
    let cloud = Arc::new(LocalCloud::new(gateways, &config));
    let router = Arc::new(Router::new(cloud.clone(), config));
    NodeA {
        udp,
        http,
        www,
        cloud,
        router,
    }
}

fn ring_of(addr_str: &str) -> Ring {
    Ring::make(&[Endpoint::udp(addr(addr_str), 24)])
}

fn app(to: Iden) -> Message {
    Message::new(MessageType::App, Iden::agent(), to, Payload::Generic(b"hello".to_vec()))
}

#[tokio::test]
async fn same_ring_peer_gets_one_udp_call() {
    let a = node_a(false);
    let b = RemoteAgent::from_endpoints(
        Iden::agent(),
        vec![Endpoint::udp(addr("10.0.1.20:4000"), 24)],
    );
    assert_eq!(b.ring, a.cloud.ring());
    a.cloud.register_remote(b.clone());

    let receipt = a.router.send(&app(b.iden)).await.unwrap();

    assert!(receipt.is_delivered());
    assert_eq!(
        a.udp.calls(),
        vec![Call {
            hops: 0,
            target: Some(b.iden)
        }]
    );
    assert!(a.http.calls().is_empty());
}

#[tokio::test]
async fn foreign_ring_peer_is_reached_through_relay() {
    let a = node_a(false);
    let r2 = ring_of("10.0.2.1:4000");
    let b = RemoteAgent::new(Iden::agent(), r2);
    let relay = RemoteAgent::new(Iden::agent(), r2)
        .with_endpoint(Endpoint::udp(addr("10.0.2.30:4000"), 24))
        .with_endpoint(Endpoint::http(addr("10.0.2.30:8080")));
    a.cloud.register_remote(b.clone());
    a.cloud.register_remote(relay.clone());

    let receipt = a.router.send(&app(b.iden)).await.unwrap();

    assert!(receipt.is_delivered());
    assert_eq!(
        a.http.calls(),
        vec![Call {
            hops: 1,
            target: Some(relay.iden)
        }]
    );
    assert!(a.udp.calls().is_empty());
}

#[tokio::test]
async fn unknown_destination_is_flooded() {
    let a = node_a(false);

    let receipt = a.router.send(&app(Iden::agent())).await.unwrap();

    assert!(receipt.is_delivered());
    assert_eq!(
        a.udp.calls(),
        vec![Call {
            hops: RoutingConfig::default().max_hops_direct,
            target: None
        }]
    );
}

#[tokio::test]
async fn www_copy_accompanies_flood() {
    let a = node_a(true);

    let receipt = a.router.send(&app(Iden::agent())).await.unwrap();
    assert_eq!(receipt.gate_name(), "udp");

    let www = a.www.as_ref().unwrap();
    for _ in 0..50 {
        if !www.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(www.calls().len(), 1);
    assert_eq!(www.calls()[0].target, None);
}

#[tokio::test]
async fn relayed_copy_is_not_sent_on_www() {
    let a = node_a(true);
    let b = RemoteAgent::from_endpoints(
        Iden::agent(),
        vec![Endpoint::udp(addr("10.0.1.21:4000"), 24)],
    );
    a.cloud.register_remote(b.clone());

    a.router.send(&app(b.iden)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(a.www.as_ref().unwrap().calls().is_empty());
}

#[tokio::test]
async fn cloud_broadcast_covers_every_ring() {
    let a = node_a(false);
    let rings = [ring_of("10.0.2.1:4000"), ring_of("10.0.3.1:4000"), ring_of("10.0.4.1:4000")];
    for (i, ring) in rings.iter().enumerate() {
        for j in 0..4 {
            let http = Endpoint::http(addr(&format!("10.0.{}.{}:8080", i + 2, j + 10)));
            a.cloud.register_remote(RemoteAgent::new(Iden::agent(), *ring).with_endpoint(http));
        }
    }

    let receipt = a.router.send(&app(a.cloud.iden())).await.unwrap();

    assert!(receipt.wait_for_delivery(Duration::from_millis(100)).await);
    assert_eq!(a.udp.calls().len(), 1);
    assert_eq!(a.udp.calls()[0].hops, 3);

    let calls = a.http.calls();
    assert_eq!(calls.len(), rings.len() * 2);
    for ring in rings {
        let per_ring = calls
            .iter()
            .filter_map(|call| call.target)
            .filter_map(|iden| a.cloud.remote_agent(&iden))
            .filter(|agent| agent.ring == ring)
            .count();
        assert!(per_ring <= 2);
    }
}

#[tokio::test]
async fn sender_resolves_same_ring_delivery() {
    let a = node_a(false);
    let b = RemoteAgent::from_endpoints(
        Iden::agent(),
        vec![Endpoint::udp(addr("10.0.1.22:4000"), 24)],
    );
    a.cloud.register_remote(b.clone());
    let sender = Sender::from_config(a.router.clone());

    let receipt = sender.send(app(b.iden));
    assert!(receipt.wait_for_delivery(Duration::from_secs(1)).await);
    assert_eq!(receipt.status(), ReceiptStatus::Delivered);
    assert_eq!(a.udp.calls().len(), 1);

    sender.shutdown().await;
}
