//! Delivery receipts
//!
//! Every routing attempt hands back a [`Receipt`]: an observable handle whose
//! status eventually settles on [`ReceiptStatus::Delivered`] or
//! [`ReceiptStatus::Failed`]. Transports fail independently, so a logical send
//! may be backed by several attempts; [`MultiReceipt`] and
//! [`MultiGatewayReceipt`] aggregate those.
//!
//! ## Status order
//!
//! `Unknown < Pending < {Delivered, Failed}`. The two terminal states are
//! never overwritten. The one exception is [`SingleReceipt::update`], which
//! lets a placeholder that is still `Unknown`/`Pending` adopt the outcome of
//! the real attempt.
//!
//! ## Aggregation
//!
//! - `Delivered` if any child is delivered
//! - else `Pending` if any child is pending
//! - else `Failed` if a child failed and none is still unknown
//! - else `Unknown`

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use crate::endpoint::GatewayType;
use crate::message::Message;

/// Maximum number of polling rounds a composite receipt splits its budget into
const WAIT_ROUNDS: u32 = 10;

/// Delivery status of a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Nothing is known about the attempt
    Unknown,
    /// The attempt is in flight
    Pending,
    /// The message reached its destination
    Delivered,
    /// The attempt is over and the message did not get through
    Failed,
}

impl ReceiptStatus {
    /// Delivered and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Delivered | ReceiptStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            ReceiptStatus::Unknown => 0,
            ReceiptStatus::Pending => 1,
            ReceiptStatus::Delivered | ReceiptStatus::Failed => 2,
        }
    }
}

/// Observable delivery outcome of one or more transport attempts
#[async_trait]
pub trait Receipt: Send + Sync + Debug {
    /// Uuid of the message this receipt tracks
    fn message_id(&self) -> Uuid;

    /// Current status
    fn status(&self) -> ReceiptStatus;

    /// Name of the gateway(s) responsible for the outcome
    fn gate_name(&self) -> String;

    /// Wait up to `timeout` for delivery
    ///
    /// Returns `true` iff the message is delivered before the deadline.
    async fn wait_for_delivery(&self, timeout: Duration) -> bool;

    fn is_delivered(&self) -> bool {
        self.status() == ReceiptStatus::Delivered
    }

    fn is_failed(&self) -> bool {
        self.status() == ReceiptStatus::Failed
    }
}

/// Receipt handle shared between the router, senders and callers
pub type SharedReceipt = Arc<dyn Receipt>;

#[derive(Debug)]
struct SingleState {
    status: ReceiptStatus,
    delegate: Option<SharedReceipt>,
}

/// Receipt for a single transport attempt
///
/// Status lives in a watch channel so waiters are woken as soon as a gateway
/// acknowledges the attempt or a placeholder adopts the real receipt.
#[derive(Debug)]
pub struct SingleReceipt {
    message_id: Uuid,
    gateway: String,
    /// Placeholders expect an `update` and keep waiters blocked while unknown
    placeholder: bool,
    state: watch::Sender<SingleState>,
}

impl SingleReceipt {
    /// Create a receipt for an attempt on `gateway`
    pub fn new(gateway: impl Into<String>, status: ReceiptStatus, message: &Message) -> Self {
        Self::build(message.uuid(), gateway.into(), status, false)
    }

    /// Create a placeholder that will later adopt the real receipt
    pub fn placeholder(message: &Message) -> Self {
        Self::build(message.uuid(), "pending".to_string(), ReceiptStatus::Unknown, true)
    }

    pub fn delivered(gateway: impl Into<String>, message: &Message) -> Self {
        Self::new(gateway, ReceiptStatus::Delivered, message)
    }

    pub fn pending(gateway: impl Into<String>, message: &Message) -> Self {
        Self::new(gateway, ReceiptStatus::Pending, message)
    }

    pub fn failed(gateway: impl Into<String>, message: &Message) -> Self {
        Self::new(gateway, ReceiptStatus::Failed, message)
    }

    fn build(message_id: Uuid, gateway: String, status: ReceiptStatus, placeholder: bool) -> Self {
        Self {
            message_id,
            gateway,
            placeholder,
            state: watch::Sender::new(SingleState {
                status,
                delegate: None,
            }),
        }
    }

    /// Wrap into a shared handle
    pub fn shared(self) -> SharedReceipt {
        Arc::new(self)
    }

    /// Apply a status reported by the transport
    ///
    /// Statuses only move forward; once terminal the receipt is frozen.
    /// Returns whether the status changed.
    pub fn set_status(&self, status: ReceiptStatus) -> bool {
        self.state.send_if_modified(|state| {
            if state.delegate.is_some()
                || state.status.is_terminal()
                || status.rank() < state.status.rank()
                || status == state.status
            {
                return false;
            }
            trace!(message_id = %self.message_id, from = ?state.status, to = ?status, "Receipt status changed");
            state.status = status;
            true
        })
    }

    /// Adopt the outcome of another receipt and wake all waiters
    ///
    /// Only a receipt that is still unknown or pending can adopt; after that
    /// its status, gate name and waits follow `other`.
    pub fn update(&self, other: SharedReceipt) -> bool {
        self.state.send_if_modified(|state| {
            if state.delegate.is_some() || state.status.is_terminal() {
                return false;
            }
            trace!(message_id = %self.message_id, adopted = ?other.status(), "Receipt adopted outcome");
            state.delegate = Some(other);
            true
        })
    }

    fn delegate(&self) -> Option<SharedReceipt> {
        self.state.borrow().delegate.clone()
    }

    fn blocks_on(&self, status: ReceiptStatus) -> bool {
        match status {
            ReceiptStatus::Pending => true,
            ReceiptStatus::Unknown => self.placeholder,
            ReceiptStatus::Delivered | ReceiptStatus::Failed => false,
        }
    }
}

#[async_trait]
impl Receipt for SingleReceipt {
    fn message_id(&self) -> Uuid {
        self.message_id
    }

    fn status(&self) -> ReceiptStatus {
        match self.delegate() {
            Some(delegate) => delegate.status(),
            None => self.state.borrow().status,
        }
    }

    fn gate_name(&self) -> String {
        match self.delegate() {
            Some(delegate) => delegate.gate_name(),
            None => self.gateway.clone(),
        }
    }

    async fn wait_for_delivery(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut rx = self.state.subscribe();

        let settled = match tokio::time::timeout_at(
            deadline,
            rx.wait_for(|state| state.delegate.is_some() || !self.blocks_on(state.status)),
        )
        .await
        {
            Ok(Ok(state)) => Some((state.status, state.delegate.clone())),
            _ => None,
        };

        match settled {
            Some((_, Some(delegate))) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                delegate.wait_for_delivery(remaining).await
            }
            Some((status, None)) => status == ReceiptStatus::Delivered,
            None => false,
        }
    }
}

/// Aggregate status over a set of children
fn aggregate_status<'a>(children: impl Iterator<Item = &'a SharedReceipt>) -> ReceiptStatus {
    let mut delivered = false;
    let mut pending = false;
    let mut failed = false;
    let mut unknown = false;

    for child in children {
        match child.status() {
            ReceiptStatus::Delivered => delivered = true,
            ReceiptStatus::Pending => pending = true,
            ReceiptStatus::Failed => failed = true,
            ReceiptStatus::Unknown => unknown = true,
        }
    }

    if delivered {
        ReceiptStatus::Delivered
    } else if pending {
        ReceiptStatus::Pending
    } else if failed && !unknown {
        ReceiptStatus::Failed
    } else {
        ReceiptStatus::Unknown
    }
}

/// Name of the first delivered child, else the still-open gateways joined by `+`
fn aggregate_gate_name(children: &[&SharedReceipt]) -> String {
    if let Some(delivered) = children.iter().find(|c| c.is_delivered()) {
        return delivered.gate_name();
    }
    children
        .iter()
        .filter(|c| !c.is_failed())
        .map(|c| c.gate_name())
        .collect::<Vec<_>>()
        .join("+")
}

/// Wait on children in rounds until one is delivered or the budget runs out
///
/// Each round hands every still-open child an equal slice of the time left
/// for that round, so a slow child cannot starve its siblings.
async fn wait_on_children(children: &[&SharedReceipt], timeout: Duration) -> bool {
    if children.is_empty() {
        tokio::time::sleep(timeout).await;
        return false;
    }

    let deadline = Instant::now() + timeout;
    for round in 0..WAIT_ROUNDS {
        if children.iter().any(|c| c.is_delivered()) {
            return true;
        }
        let open: Vec<&SharedReceipt> = children
            .iter()
            .copied()
            .filter(|c| !c.status().is_terminal())
            .collect();
        if open.is_empty() {
            return false;
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let shares = (WAIT_ROUNDS - round) * open.len() as u32;
        let slice = (deadline - now) / shares;
        for child in open {
            if child.wait_for_delivery(slice).await {
                return true;
            }
        }
    }

    children.iter().any(|c| c.is_delivered())
}

/// Receipt aggregating several attempts on the same transport
///
/// Used for fan-out such as relaying one message through several agents.
#[derive(Debug)]
pub struct MultiReceipt {
    message_id: Uuid,
    children: Vec<SharedReceipt>,
}

impl MultiReceipt {
    pub fn new(message: &Message, children: Vec<SharedReceipt>) -> Self {
        Self {
            message_id: message.uuid(),
            children,
        }
    }

    pub fn children(&self) -> &[SharedReceipt] {
        &self.children
    }

    pub fn shared(self) -> SharedReceipt {
        Arc::new(self)
    }
}

#[async_trait]
impl Receipt for MultiReceipt {
    fn message_id(&self) -> Uuid {
        self.message_id
    }

    fn status(&self) -> ReceiptStatus {
        aggregate_status(self.children.iter())
    }

    fn gate_name(&self) -> String {
        let children: Vec<&SharedReceipt> = self.children.iter().collect();
        aggregate_gate_name(&children)
    }

    async fn wait_for_delivery(&self, timeout: Duration) -> bool {
        let children: Vec<&SharedReceipt> = self.children.iter().collect();
        wait_on_children(&children, timeout).await
    }
}

/// Receipt aggregating attempts made through different gateways
#[derive(Debug)]
pub struct MultiGatewayReceipt {
    message_id: Uuid,
    receipts: Vec<(GatewayType, SharedReceipt)>,
}

impl MultiGatewayReceipt {
    pub fn new(message: &Message) -> Self {
        Self {
            message_id: message.uuid(),
            receipts: Vec::new(),
        }
    }

    /// Add the receipt produced by `kind`
    pub fn with(mut self, kind: GatewayType, receipt: SharedReceipt) -> Self {
        self.receipts.push((kind, receipt));
        self
    }

    /// First receipt produced by the given gateway type
    pub fn receipt_for(&self, kind: GatewayType) -> Option<&SharedReceipt> {
        self.receipts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, receipt)| receipt)
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn shared(self) -> SharedReceipt {
        Arc::new(self)
    }

    fn children(&self) -> Vec<&SharedReceipt> {
        self.receipts.iter().map(|(_, receipt)| receipt).collect()
    }
}

#[async_trait]
impl Receipt for MultiGatewayReceipt {
    fn message_id(&self) -> Uuid {
        self.message_id
    }

    fn status(&self) -> ReceiptStatus {
        aggregate_status(self.receipts.iter().map(|(_, receipt)| receipt))
    }

    fn gate_name(&self) -> String {
        aggregate_gate_name(&self.children())
    }

    async fn wait_for_delivery(&self, timeout: Duration) -> bool {
        wait_on_children(&self.children(), timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Iden;
    use crate::message::{MessageType, Payload};

    fn make_message() -> Message {
        Message::new(MessageType::App, Iden::agent(), Iden::agent(), Payload::Null)
    }

    fn single(status: ReceiptStatus, gateway: &str, msg: &Message) -> SharedReceipt {
        SingleReceipt::new(gateway, status, msg).shared()
    }

    #[test]
    fn test_terminal_status_is_frozen() {
        let msg = make_message();
        let receipt = SingleReceipt::pending("udp", &msg);

        assert!(receipt.set_status(ReceiptStatus::Delivered));
        assert!(!receipt.set_status(ReceiptStatus::Failed));
        assert!(!receipt.set_status(ReceiptStatus::Pending));
        assert_eq!(receipt.status(), ReceiptStatus::Delivered);
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let msg = make_message();
        let receipt = SingleReceipt::pending("udp", &msg);
        assert!(!receipt.set_status(ReceiptStatus::Unknown));
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
    }

    #[test]
    fn test_update_only_promotes_open_placeholders() {
        let msg = make_message();
        let placeholder = SingleReceipt::placeholder(&msg);
        assert!(placeholder.update(single(ReceiptStatus::Delivered, "http", &msg)));
        assert_eq!(placeholder.status(), ReceiptStatus::Delivered);
        assert_eq!(placeholder.gate_name(), "http");

        // A second outcome does not replace the first
        assert!(!placeholder.update(single(ReceiptStatus::Failed, "udp", &msg)));
        assert_eq!(placeholder.status(), ReceiptStatus::Delivered);

        let finished = SingleReceipt::failed("udp", &msg);
        assert!(!finished.update(single(ReceiptStatus::Delivered, "http", &msg)));
        assert_eq!(finished.status(), ReceiptStatus::Failed);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_settled() {
        let msg = make_message();
        let start = Instant::now();

        assert!(SingleReceipt::delivered("udp", &msg).wait_for_delivery(Duration::from_secs(30)).await);
        assert!(!SingleReceipt::failed("udp", &msg).wait_for_delivery(Duration::from_secs(30)).await);
        assert!(
            !SingleReceipt::new("udp", ReceiptStatus::Unknown, &msg)
                .wait_for_delivery(Duration::from_secs(30))
                .await
        );

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_wait_wakes_on_delivery() {
        let msg = make_message();
        let receipt = Arc::new(SingleReceipt::pending("udp", &msg));

        let acker = receipt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            acker.set_status(ReceiptStatus::Delivered);
        });

        let start = Instant::now();
        assert!(receipt.wait_for_delivery(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_wait_times_out() {
        let msg = make_message();
        let receipt = SingleReceipt::pending("udp", &msg);

        let start = Instant::now();
        assert!(!receipt.wait_for_delivery(Duration::from_millis(300)).await);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_wait_follows_adopted_receipt() {
        let msg = make_message();
        let placeholder = Arc::new(SingleReceipt::placeholder(&msg));
        let real = Arc::new(SingleReceipt::pending("http", &msg));

        let (p, r) = (placeholder.clone(), real.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            p.update(r.clone());
            tokio::time::sleep(Duration::from_millis(100)).await;
            r.set_status(ReceiptStatus::Delivered);
        });

        assert!(placeholder.wait_for_delivery(Duration::from_secs(2)).await);
        assert_eq!(placeholder.status(), ReceiptStatus::Delivered);
    }

    #[test]
    fn test_aggregate_status() {
        let msg = make_message();
        let d = || single(ReceiptStatus::Delivered, "http", &msg);
        let p = || single(ReceiptStatus::Pending, "udp", &msg);
        let f = || single(ReceiptStatus::Failed, "www", &msg);
        let u = || single(ReceiptStatus::Unknown, "udp", &msg);

        let status = |children: Vec<SharedReceipt>| MultiReceipt::new(&msg, children).status();

        assert_eq!(status(vec![f(), d(), u()]), ReceiptStatus::Delivered);
        assert_eq!(status(vec![f(), p(), u()]), ReceiptStatus::Pending);
        assert_eq!(status(vec![f(), f()]), ReceiptStatus::Failed);
        assert_eq!(status(vec![f(), u()]), ReceiptStatus::Unknown);
        assert_eq!(status(vec![]), ReceiptStatus::Unknown);
    }

    #[test]
    fn test_gate_name() {
        let msg = make_message();
        let receipt = MultiGatewayReceipt::new(&msg)
            .with(GatewayType::Udp, single(ReceiptStatus::Pending, "udp", &msg))
            .with(GatewayType::Www, single(ReceiptStatus::Failed, "www", &msg))
            .with(GatewayType::Http, single(ReceiptStatus::Unknown, "http", &msg));
        assert_eq!(receipt.gate_name(), "udp+http");

        let receipt = MultiReceipt::new(
            &msg,
            vec![
                single(ReceiptStatus::Pending, "udp", &msg),
                single(ReceiptStatus::Delivered, "http", &msg),
            ],
        );
        assert_eq!(receipt.gate_name(), "http");
    }

    #[test]
    fn test_receipt_for_gateway() {
        let msg = make_message();
        let receipt = MultiGatewayReceipt::new(&msg)
            .with(GatewayType::Udp, single(ReceiptStatus::Pending, "udp", &msg));
        assert!(receipt.receipt_for(GatewayType::Udp).is_some());
        assert!(receipt.receipt_for(GatewayType::Http).is_none());
        assert_eq!(receipt.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_wait_true_when_any_child_delivers() {
        let msg = make_message();
        let slow = Arc::new(SingleReceipt::pending("udp", &msg));
        let fast = Arc::new(SingleReceipt::pending("http", &msg));
        let children: Vec<SharedReceipt> = vec![slow.clone(), fast.clone()];
        let receipt = MultiReceipt::new(&msg, children);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            fast.set_status(ReceiptStatus::Delivered);
        });

        let start = Instant::now();
        assert!(receipt.wait_for_delivery(Duration::from_secs(2)).await);
        assert!(start.elapsed() <= Duration::from_secs(2));
        assert_eq!(receipt.status(), ReceiptStatus::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_wait_respects_budget() {
        let msg = make_message();
        let receipt = MultiReceipt::new(
            &msg,
            vec![
                SingleReceipt::pending("udp", &msg).shared(),
                SingleReceipt::pending("http", &msg).shared(),
            ],
        );

        let start = Instant::now();
        assert!(!receipt.wait_for_delivery(Duration::from_secs(1)).await);
        let elapsed = start.elapsed();
        assert!(elapsed <= Duration::from_millis(1100));
        assert!(elapsed >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_wait_without_children_sleeps_budget() {
        let msg = make_message();
        let receipt = MultiReceipt::new(&msg, vec![]);

        let start = Instant::now();
        assert!(!receipt.wait_for_delivery(Duration::from_millis(500)).await);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_multi_wait_returns_early_when_all_failed() {
        let msg = make_message();
        let receipt = MultiReceipt::new(
            &msg,
            vec![
                single(ReceiptStatus::Failed, "udp", &msg),
                single(ReceiptStatus::Failed, "http", &msg),
            ],
        );

        let start = Instant::now();
        assert!(!receipt.wait_for_delivery(Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
