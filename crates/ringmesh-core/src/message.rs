//! Message values exchanged between agents
//!
//! A [`Message`] is immutable once built. Helpers such as
//! [`Message::with_hops`] return a modified copy and leave the original
//! untouched, so a message can be shared between concurrent routing
//! attempts without locks.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::SigningError;
use crate::identity::Iden;
use crate::ring::Ring;

/// Hop budget a freshly built message carries
pub const DEFAULT_HOPS: u8 = 10;

/// Message kinds understood by the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Presence,
    Discovery,
    Ping,
    Pong,
    App,
    Enquiry,
    QueryResponse,
    Fault,
    Trace,
    Healthcheck,
}

impl Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Presence => "presence",
            MessageType::Discovery => "discovery",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::App => "app",
            MessageType::Enquiry => "enquiry",
            MessageType::QueryResponse => "query-response",
            MessageType::Fault => "fault",
            MessageType::Trace => "trace",
            MessageType::Healthcheck => "healthcheck",
        };
        f.write_str(name)
    }
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// An agent announcing itself and where it can be reached
    Presence {
        agent: Iden,
        ring: Ring,
        endpoints: Vec<Endpoint>,
    },
    Fault {
        code: u32,
        detail: String,
    },
    Healthcheck {
        healthy: bool,
        detail: String,
    },
    /// Rows answering an earlier enquiry
    QueryResponse {
        query: Uuid,
        rows: Vec<Vec<u8>>,
    },
    /// Agents a trace message has passed through
    Trace {
        path: Vec<Iden>,
    },
    Null,
    Generic(Vec<u8>),
}

impl Payload {
    /// Split into fragments of roughly `max_len` bytes each
    ///
    /// Only opaque bytes and query rows are splittable. Every other variant
    /// comes back as a single fragment.
    pub fn split(&self, max_len: usize) -> Vec<Payload> {
        let max_len = max_len.max(1);
        match self {
            Payload::Generic(bytes) if bytes.len() > max_len => bytes
                .chunks(max_len)
                .map(|chunk| Payload::Generic(chunk.to_vec()))
                .collect(),
            Payload::QueryResponse { query, rows } => {
                let mut fragments = Vec::new();
                let mut current: Vec<Vec<u8>> = Vec::new();
                let mut size = 0;
                for row in rows {
                    // A row never gets split across fragments
                    if !current.is_empty() && size + row.len() > max_len {
                        fragments.push(Payload::QueryResponse {
                            query: *query,
                            rows: std::mem::take(&mut current),
                        });
                        size = 0;
                    }
                    size += row.len();
                    current.push(row.clone());
                }
                if !current.is_empty() || fragments.is_empty() {
                    fragments.push(Payload::QueryResponse {
                        query: *query,
                        rows: current,
                    });
                }
                fragments
            }
            other => vec![other.clone()],
        }
    }
}

/// Immutable message value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageType,
    from: Iden,
    to: Iden,
    hops: u8,
    reliable: bool,
    uuid: Uuid,
    sequence: u64,
    created_at: DateTime<Utc>,
    signature: Option<Vec<u8>>,
    payload: Payload,
}

/// The part of a message covered by its signature
///
/// Hops change in transit and the signature cannot sign itself, so both are
/// left out.
#[derive(Serialize)]
struct SignedFields<'a> {
    kind: MessageType,
    from: &'a Iden,
    to: &'a Iden,
    reliable: bool,
    uuid: &'a Uuid,
    sequence: u64,
    created_at: &'a DateTime<Utc>,
    payload: &'a Payload,
}

impl Message {
    /// Build a new message with a fresh uuid, stamped now
    pub fn new(kind: MessageType, from: Iden, to: Iden, payload: Payload) -> Self {
        Self {
            kind,
            from,
            to,
            hops: DEFAULT_HOPS,
            reliable: false,
            uuid: Uuid::new_v4(),
            sequence: 0,
            created_at: Utc::now(),
            signature: None,
            payload,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn from(&self) -> &Iden {
        &self.from
    }

    pub fn to(&self) -> &Iden {
        &self.to
    }

    pub fn hops(&self) -> u8 {
        self.hops
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Time elapsed since the message was created
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Copy with a different hop budget
    pub fn with_hops(&self, hops: u8) -> Self {
        Self {
            hops,
            ..self.clone()
        }
    }

    /// Copy flagged as reliable
    pub fn reliable(&self) -> Self {
        Self {
            reliable: true,
            ..self.clone()
        }
    }

    pub fn with_sequence(&self, sequence: u64) -> Self {
        Self {
            sequence,
            ..self.clone()
        }
    }

    pub fn with_created_at(&self, created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            ..self.clone()
        }
    }

    pub fn with_signature(&self, signature: Option<Vec<u8>>) -> Self {
        Self {
            signature,
            ..self.clone()
        }
    }

    /// Canonical bytes a signer covers
    pub fn signing_bytes(&self) -> Result<Vec<u8>, SigningError> {
        let fields = SignedFields {
            kind: self.kind,
            from: &self.from,
            to: &self.to,
            reliable: self.reliable,
            uuid: &self.uuid,
            sequence: self.sequence,
            created_at: &self.created_at,
            payload: &self.payload,
        };
        Ok(postcard::to_allocvec(&fields)?)
    }
}
