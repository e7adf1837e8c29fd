//! Message validation pipelines
//!
//! Two ordered, short-circuiting predicate lists decide whether a message is
//! acceptable. The first failing predicate names the rejection [`Reason`].
//!
//! - **receivable** runs once per inbound message per gateway listener:
//!   `FromLocal`, `ToOther`, `TooOld`, `BadSigned`, `Duplicate`
//! - **forwardable** runs before a re-broadcast:
//!   `ToLocal`, `TooOld`, `BadSigned`, `Duplicate`
//!
//! Each pipeline owns an independent duplicate cache, separate from the
//! router's forwarding cache. The duplicate check runs last so only messages
//! that passed every other predicate get remembered.

use std::sync::Arc;
use std::time::Duration;

use ringmesh_core::{Iden, Message, signing::signature_hint};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::cloud::Cloud;

/// Why a message was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Reason {
    /// The message is an echo of one of our own local agents
    #[error("message comes from a local agent")]
    FromLocal,

    /// The message is addressed to a local agent, nothing left to forward
    #[error("message is addressed to a local agent")]
    ToLocal,

    /// The message is addressed to a different cloud
    #[error("message is addressed to another cloud")]
    ToOther,

    /// The signature does not match what our cloud expects
    #[error("message signature is invalid")]
    BadSigned,

    /// The message was already accepted within the dedup window
    #[error("message is a duplicate")]
    Duplicate,

    /// The message is older than the configured lifetime
    #[error("message is too old")]
    TooOld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    FromLocal,
    ToLocal,
    ToOther,
    TooOld,
    BadSigned,
    Duplicate,
}

impl Predicate {
    fn reason(&self) -> Reason {
        match self {
            Predicate::FromLocal => Reason::FromLocal,
            Predicate::ToLocal => Reason::ToLocal,
            Predicate::ToOther => Reason::ToOther,
            Predicate::TooOld => Reason::TooOld,
            Predicate::BadSigned => Reason::BadSigned,
            Predicate::Duplicate => Reason::Duplicate,
        }
    }
}

/// One ordered predicate list with its own duplicate cache
#[derive(Debug)]
struct Pipeline {
    name: &'static str,
    predicates: Vec<Predicate>,
    seen: Arc<TtlCache<Uuid, Iden>>,
    lifetime: Duration,
}

impl Pipeline {
    fn new(name: &'static str, predicates: Vec<Predicate>, lifetime: Duration) -> Self {
        Self {
            name,
            predicates,
            seen: Arc::new(TtlCache::new(lifetime)),
            lifetime,
        }
    }

    fn accepts<C: Cloud + ?Sized>(&self, predicate: Predicate, cloud: &C, message: &Message) -> bool {
        match predicate {
            Predicate::FromLocal => !cloud.is_local_agent(message.from()),
            Predicate::ToLocal => !cloud.is_local_agent(message.to()),
            Predicate::ToOther => !(message.to().is_cloud() && *message.to() != cloud.iden()),
            Predicate::TooOld => {
                // Clock skew can put creation in the future; treat that as fresh
                let age = message.age().to_std().unwrap_or(Duration::ZERO);
                age < self.lifetime
            }
            Predicate::BadSigned => {
                let expected = cloud.sign(message);
                match (expected.as_deref(), message.signature()) {
                    (None, None) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (expected, actual) => {
                        debug!(
                            expected = %signature_hint(expected),
                            actual = %signature_hint(actual),
                            "Signature presence mismatch"
                        );
                        false
                    }
                }
            }
            Predicate::Duplicate => self.seen.insert_if_absent(message.uuid(), *message.from()),
        }
    }

    fn check<C: Cloud + ?Sized>(&self, cloud: &C, message: &Message) -> Result<(), Reason> {
        for predicate in &self.predicates {
            if !self.accepts(*predicate, cloud, message) {
                let reason = predicate.reason();
                debug!(
                    pipeline = self.name,
                    message_id = %message.uuid(),
                    from = %message.from().short_id(),
                    reason = ?reason,
                    "Message rejected"
                );
                return Err(reason);
            }
        }
        Ok(())
    }
}

/// Receivable and forwardable pipelines of a cloud
#[derive(Debug)]
pub struct Validators {
    receivable: Pipeline,
    forwardable: Pipeline,
}

impl Validators {
    /// Create both pipelines; messages older than `lifetime` are rejected
    pub fn new(lifetime: Duration) -> Self {
        Self {
            receivable: Pipeline::new(
                "receivable",
                vec![
                    Predicate::FromLocal,
                    Predicate::ToOther,
                    Predicate::TooOld,
                    Predicate::BadSigned,
                    Predicate::Duplicate,
                ],
                lifetime,
            ),
            forwardable: Pipeline::new(
                "forwardable",
                vec![
                    Predicate::ToLocal,
                    Predicate::TooOld,
                    Predicate::BadSigned,
                    Predicate::Duplicate,
                ],
                lifetime,
            ),
        }
    }

    /// Whether an inbound message should be accepted at all
    pub fn is_receivable<C: Cloud + ?Sized>(&self, cloud: &C, message: &Message) -> Result<(), Reason> {
        self.receivable.check(cloud, message)
    }

    /// Whether an inbound message should be passed on to other agents
    pub fn is_forwardable<C: Cloud + ?Sized>(&self, cloud: &C, message: &Message) -> Result<(), Reason> {
        self.forwardable.check(cloud, message)
    }

    pub fn lifetime(&self) -> Duration {
        self.receivable.lifetime
    }

    /// Evict expired duplicate-cache entries from both pipelines
    pub fn prune_expired(&self) -> usize {
        self.receivable.seen.prune_expired() + self.forwardable.seen.prune_expired()
    }

    /// Entries currently held by both duplicate caches, expired ones included
    pub fn cached(&self) -> usize {
        self.receivable.seen.len() + self.forwardable.seen.len()
    }

    /// Sweep both duplicate caches every `interval` in the background
    ///
    /// The tasks stop on their own once the validators are dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.receivable.seen.spawn_sweeper(interval),
            self.forwardable.seen.spawn_sweeper(interval),
        ]
    }
}
