//! Identifiers for agents, clouds and messages
//!
//! An [`Iden`] pairs a kind with a uuid. Two idens are equal only when
//! both the kind and the uuid match, so an agent and a cloud can never be
//! confused even if their uuids collide.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// What an [`Iden`] names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdenType {
    /// A single agent process
    Agent,
    /// A whole cloud (the overlay a set of agents belongs to)
    Cloud,
    /// A message
    Message,
}

impl IdenType {
    fn as_str(&self) -> &'static str {
        match self {
            IdenType::Agent => "agent",
            IdenType::Cloud => "cloud",
            IdenType::Message => "message",
        }
    }
}

impl Display for IdenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdenType {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(IdenType::Agent),
            "cloud" => Ok(IdenType::Cloud),
            "message" => Ok(IdenType::Message),
            other => Err(IdentityError::UnknownKind(other.to_string())),
        }
    }
}

/// Typed identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Iden {
    pub kind: IdenType,
    pub uuid: Uuid,
}

impl Iden {
    /// Create an identifier from parts
    pub fn new(kind: IdenType, uuid: Uuid) -> Self {
        Self { kind, uuid }
    }

    /// Mint a fresh agent identifier
    pub fn agent() -> Self {
        Self::new(IdenType::Agent, Uuid::new_v4())
    }

    /// Mint a fresh cloud identifier
    pub fn cloud() -> Self {
        Self::new(IdenType::Cloud, Uuid::new_v4())
    }

    /// Mint a fresh message identifier
    pub fn message() -> Self {
        Self::new(IdenType::Message, Uuid::new_v4())
    }

    pub fn is_agent(&self) -> bool {
        self.kind == IdenType::Agent
    }

    pub fn is_cloud(&self) -> bool {
        self.kind == IdenType::Cloud
    }

    /// Short display form for logs, e.g. `agent:1a2b3c4d`
    pub fn short_id(&self) -> String {
        let simple = self.uuid.simple().to_string();
        format!("{}:{}", self.kind, &simple[..8])
    }
}

impl Display for Iden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.uuid)
    }
}

impl FromStr for Iden {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, uuid) = s
            .split_once(':')
            .ok_or_else(|| IdentityError::InvalidFormat(s.to_string()))?;
        let uuid = Uuid::parse_str(uuid).map_err(|e| IdentityError::InvalidFormat(e.to_string()))?;
        Ok(Self::new(kind.parse()?, uuid))
    }
}
