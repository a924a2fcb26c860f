use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Settlement networks the platform can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Base,
    BaseSepolia,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
        }
    }

    /// Return all supported networks
    pub fn all() -> Vec<Network> {
        vec![Network::Base, Network::BaseSepolia]
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Network::Base),
            "base-sepolia" => Ok(Network::BaseSepolia),
            other => Err(format!("unsupported network: {}", other)),
        }
    }
}

/// Opaque identity of a paying entity (the settlement source).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque identity of a recipient in the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub String);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A known recipient as the external directory reports it.
///
/// `registered` is token-specific: it gates whether the destination may
/// receive the settlement's base token at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub display_name: String,
    /// Destination address on the settlement network.
    pub address: String,
    /// Whether the destination is registered to receive the base token.
    pub registered: bool,
    /// Available balance, when the directory exposes one. Decimal string
    /// on the wire.
    pub available_balance: Option<Decimal>,
}

/// Point-in-time read of the directory used for one validation pass.
///
/// The builder validates against exactly one snapshot so a request can never
/// mix addresses resolved at different times.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    recipients: HashMap<RecipientId, Recipient>,
    /// Source entity's available balance, when known. None skips the
    /// sufficiency precheck and leaves the server as the authority.
    source_balance: Option<Decimal>,
    taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn new(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        Self {
            recipients: recipients.into_iter().map(|r| (r.id.clone(), r)).collect(),
            source_balance: None,
            taken_at: Utc::now(),
        }
    }

    pub fn with_source_balance(mut self, balance: Decimal) -> Self {
        self.source_balance = Some(balance);
        self
    }

    pub fn get(&self, id: &RecipientId) -> Option<&Recipient> {
        self.recipients.get(id)
    }

    pub fn source_balance(&self) -> Option<Decimal> {
        self.source_balance
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// External directory service holding recipients and balances.
///
/// Read-only from this crate's perspective; the settlement subsystem never
/// mutates directory state.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Take a snapshot of the directory as seen by `source`.
    async fn snapshot(&self, source: &EntityId) -> AppResult<RegistrySnapshot>;
}

/// In-memory directory used by tests and local development.
#[derive(Default)]
pub struct InMemoryDirectory {
    recipients: RwLock<HashMap<RecipientId, Recipient>>,
    source_balances: RwLock<HashMap<EntityId, Decimal>>,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upsert_recipient(&self, recipient: Recipient) {
        self.recipients
            .write()
            .insert(recipient.id.clone(), recipient);
    }

    pub fn set_source_balance(&self, source: EntityId, balance: Decimal) {
        self.source_balances.write().insert(source, balance);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn snapshot(&self, source: &EntityId) -> AppResult<RegistrySnapshot> {
        let mut snapshot = RegistrySnapshot::new(self.recipients.read().values().cloned());
        if let Some(balance) = self.source_balances.read().get(source) {
            snapshot = snapshot.with_source_balance(*balance);
        }
        Ok(snapshot)
    }
}
