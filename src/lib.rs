//! Client-side orchestrator for multi-recipient batch settlements over the
//! payment-required (HTTP 402) challenge/response handshake.
//!
//! The flow: build an immutable request against a directory snapshot, make
//! the first call, park on 402 until the caller explicitly confirms, make the
//! authorized call with the byte-identical payload, then reconcile balances
//! and history after a completed settlement. No call in this crate retries
//! automatically.

pub mod challenge;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod request;

pub use challenge::{
    CallMode, ChallengeOutcome, HttpChallengeClient, SettlementTransport, PAYMENT_REQUIRED,
};
pub use config::ClientConfig;
pub use error::{AppError, AppResult, ValidationError, ValidationIssue};
pub use orchestrator::{AttemptState, SettlementOrchestrator, SettlementOutcome};
pub use reconcile::{
    AccountView, BalanceService, ReconciliationAgent, TransactionHistoryService, TransactionRecord,
};
pub use registry::{
    EntityId, InMemoryDirectory, Network, Recipient, RecipientDirectory, RecipientId,
    RegistrySnapshot,
};
pub use request::{EntryInput, RecipientAmount, SettlementRequest, SettlementRequestBuilder};
