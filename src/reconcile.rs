use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::orchestrator::SettlementOutcome;
use crate::registry::EntityId;

/// External read-only balance query service.
#[async_trait]
pub trait BalanceService: Send + Sync {
    async fn fetch_balance(&self, entity: &EntityId) -> AppResult<Decimal>;
}

/// External read-only transaction history query service.
#[async_trait]
pub trait TransactionHistoryService: Send + Sync {
    async fn fetch_history(&self, entity: &EntityId) -> AppResult<Vec<TransactionRecord>>;
}

/// One settled transfer as the history service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub reference: String,
    pub recipient_address: String,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Cached read model a presentation layer can subscribe to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountView {
    pub balance: Option<Decimal>,
    pub history: Vec<TransactionRecord>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Refreshes balances and history after a completed settlement and merges
/// them into the cached view.
///
/// Idempotent: merging is last-write-wins on the freshness timestamp, so
/// reconciling the same outcome twice leaves the same final state. Failures
/// here never roll back or retry the settlement; the payment has already
/// completed.
pub struct ReconciliationAgent {
    balances: Arc<dyn BalanceService>,
    history: Arc<dyn TransactionHistoryService>,
    view: Arc<RwLock<AccountView>>,
}

impl ReconciliationAgent {
    pub fn new(
        balances: Arc<dyn BalanceService>,
        history: Arc<dyn TransactionHistoryService>,
    ) -> Self {
        Self {
            balances,
            history,
            view: Arc::new(RwLock::new(AccountView::default())),
        }
    }

    /// Current merged view.
    pub fn view(&self) -> AccountView {
        self.view.read().clone()
    }

    /// Shared handle for a presentation layer that polls the view directly.
    pub fn view_handle(&self) -> Arc<RwLock<AccountView>> {
        Arc::clone(&self.view)
    }

    /// Refresh balance and history for `source` after a terminal outcome.
    ///
    /// Only `Completed` outcomes trigger reads; failed attempts changed
    /// nothing worth reconciling. Errors are surfaced to the caller for
    /// reporting but must not be treated as a settlement failure.
    pub async fn reconcile(&self, source: &EntityId, outcome: &SettlementOutcome) -> AppResult<()> {
        let reference = match outcome {
            SettlementOutcome::Completed {
                transaction_reference,
            } => transaction_reference,
            SettlementOutcome::Failed { .. } => {
                debug!("Skipping reconciliation for failed attempt");
                return Ok(());
            }
        };

        let fetched = futures::try_join!(
            self.balances.fetch_balance(source),
            self.history.fetch_history(source),
        );

        let (balance, history) = match fetched {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Reconciliation read failed for {} after {}: {}",
                    source, reference, e
                );
                return Err(e);
            }
        };

        let refreshed_at = Utc::now();
        {
            let mut view = self.view.write();
            // Last write wins on freshness; a stale refresh never clobbers
            // a newer one.
            if view.refreshed_at.map_or(true, |t| t <= refreshed_at) {
                view.balance = Some(balance);
                view.history = history;
                view.refreshed_at = Some(refreshed_at);
            }
        }

        info!(
            "🔄 Reconciled {} after settlement {}: balance {}",
            source, reference, balance
        );
        Ok(())
    }
}
