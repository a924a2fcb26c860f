use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ValidationError, ValidationIssue};
use crate::registry::{EntityId, Network, Recipient, RecipientId, RegistrySnapshot};

/// One raw (recipient, amount) line as the caller supplies it.
///
/// The amount arrives as a decimal string; parsing it is part of validation.
#[derive(Debug, Clone)]
pub struct EntryInput {
    pub recipient: RecipientId,
    pub amount: String,
}

impl EntryInput {
    pub fn new(recipient: impl Into<RecipientId>, amount: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
        }
    }
}

/// A validated (recipient, amount) pair. Amount is strictly positive and the
/// recipient is a resolved snapshot copy, not a live directory reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientAmount {
    pub recipient: Recipient,
    pub amount: Decimal,
}

/// Wire shape of the batch payload, `{ sourceId, recipients, network }` plus
/// the client-side idempotency key. Amounts go out as decimal strings.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload<'a> {
    source_id: &'a str,
    network: &'a str,
    recipients: Vec<WireRecipient<'a>>,
    idempotency_key: String,
}

#[derive(Serialize)]
struct WireRecipient<'a> {
    address: &'a str,
    amount: String,
}

/// An immutable, fully validated batch settlement request.
///
/// The JSON body is serialized exactly once at build time; both protocol
/// calls send these same bytes, so the authorized call settles exactly what
/// the first call priced.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRequest {
    source: EntityId,
    network: Network,
    entries: Vec<RecipientAmount>,
    idempotency_key: Uuid,
    payload: Vec<u8>,
}

impl SettlementRequest {
    pub fn source(&self) -> &EntityId {
        &self.source
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Entries in the caller's original order.
    pub fn entries(&self) -> &[RecipientAmount] {
        &self.entries
    }

    pub fn total(&self) -> Decimal {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key
    }

    /// The serialized JSON body sent on every call for this request.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Validates and assembles batch requests against a directory snapshot.
///
/// Pure over its inputs: no side effects, no network. A request referencing
/// a duplicate, unregistered, or unresolvable recipient never gets built,
/// and the error names every blocking entry at once.
pub struct SettlementRequestBuilder;

impl SettlementRequestBuilder {
    pub fn build(
        source: EntityId,
        network: Network,
        entries: &[EntryInput],
        snapshot: &RegistrySnapshot,
    ) -> AppResult<SettlementRequest> {
        let mut issues = Vec::new();

        if entries.is_empty() {
            issues.push(ValidationIssue::EmptyBatch);
        }

        let mut seen: HashSet<&RecipientId> = HashSet::new();
        let mut resolved: Vec<RecipientAmount> = Vec::with_capacity(entries.len());
        let mut total = Decimal::ZERO;

        for entry in entries {
            if !seen.insert(&entry.recipient) {
                issues.push(ValidationIssue::DuplicateRecipient {
                    recipient: entry.recipient.to_string(),
                });
            }

            let amount = match Decimal::from_str(entry.amount.trim()) {
                Ok(amount) if amount > Decimal::ZERO => {
                    total += amount;
                    Some(amount)
                }
                Ok(amount) => {
                    issues.push(ValidationIssue::NonPositiveAmount {
                        recipient: entry.recipient.to_string(),
                        amount: amount.to_string(),
                    });
                    None
                }
                Err(_) => {
                    issues.push(ValidationIssue::UnparsableAmount {
                        recipient: entry.recipient.to_string(),
                        amount: entry.amount.clone(),
                    });
                    None
                }
            };

            let recipient = match snapshot.get(&entry.recipient) {
                Some(recipient) => recipient,
                None => {
                    issues.push(ValidationIssue::UnknownRecipient {
                        recipient: entry.recipient.to_string(),
                    });
                    continue;
                }
            };

            if !recipient.registered {
                issues.push(ValidationIssue::UnregisteredRecipient {
                    recipient: entry.recipient.to_string(),
                });
            }

            if !Self::address_is_valid(&recipient.address) {
                issues.push(ValidationIssue::InvalidAddress {
                    recipient: entry.recipient.to_string(),
                });
            }

            if let Some(amount) = amount {
                resolved.push(RecipientAmount {
                    recipient: recipient.clone(),
                    amount,
                });
            }
        }

        if let Some(available) = snapshot.source_balance() {
            if total > available {
                issues.push(ValidationIssue::InsufficientBalance {
                    total: total.to_string(),
                    available: available.to_string(),
                });
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        let idempotency_key = Uuid::new_v4();
        let payload = serde_json::to_vec(&WirePayload {
            source_id: &source.0,
            network: network.as_str(),
            recipients: resolved
                .iter()
                .map(|e| WireRecipient {
                    address: &e.recipient.address,
                    amount: e.amount.to_string(),
                })
                .collect(),
            idempotency_key: idempotency_key.to_string(),
        })
        .map_err(|e| AppError::Internal(format!("payload serialization failed: {}", e)))?;

        info!(
            "📋 Built settlement request: {} recipient(s), total {} on {}",
            resolved.len(),
            total,
            network
        );

        Ok(SettlementRequest {
            source,
            network,
            entries: resolved,
            idempotency_key,
            payload,
        })
    }

    /// Basic EVM address validation: 0x prefix plus 40 hex characters.
    fn address_is_valid(address: &str) -> bool {
        address.len() == 42
            && address.starts_with("0x")
            && address[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}
