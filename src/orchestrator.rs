use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::challenge::{CallMode, ChallengeOutcome, SettlementTransport};
use crate::error::{AppError, AppResult};
use crate::registry::{EntityId, Network, RegistrySnapshot};
use crate::request::{EntryInput, SettlementRequest, SettlementRequestBuilder};

/// Lifecycle of one settlement attempt.
///
/// Payment-required is a protocol step, not an error: the attempt parks in
/// `AwaitingPaymentConfirmation` until the caller explicitly confirms or
/// cancels. Terminal states are `Completed` and `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Idle,
    Validating,
    Submitted,
    AwaitingPaymentConfirmation {
        /// Authorized calls already made that came back 402 again.
        retries: u32,
    },
    Authorizing,
    Completed {
        transaction_reference: String,
    },
    Failed {
        reason: AppError,
    },
}

impl AttemptState {
    pub fn name(&self) -> &'static str {
        match self {
            AttemptState::Idle => "Idle",
            AttemptState::Validating => "Validating",
            AttemptState::Submitted => "Submitted",
            AttemptState::AwaitingPaymentConfirmation { .. } => "AwaitingPaymentConfirmation",
            AttemptState::Authorizing => "Authorizing",
            AttemptState::Completed { .. } => "Completed",
            AttemptState::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Completed { .. } | AttemptState::Failed { .. }
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Terminal value of an attempt, consumed by the caller and the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Completed { transaction_reference: String },
    Failed { reason: AppError },
}

/// Drives a single settlement attempt from intent to terminal outcome.
///
/// One orchestrator per attempt; it owns the immutable request built at
/// validation time and never reuses it across independent transfers. All
/// transitions take `&mut self`, so two transitions on the same attempt can
/// never interleave, and a cancel can never race an in-flight network call.
/// UI-agnostic: exposes only the state enum and terminal payloads.
pub struct SettlementOrchestrator {
    id: Uuid,
    transport: Arc<dyn SettlementTransport>,
    state: AttemptState,
    request: Option<SettlementRequest>,
    settlement_token: Option<String>,
}

impl SettlementOrchestrator {
    pub fn new(transport: Arc<dyn SettlementTransport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            state: AttemptState::Idle,
            request: None,
            settlement_token: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// The immutable request for this attempt, once validation has passed.
    pub fn request(&self) -> Option<&SettlementRequest> {
        self.request.as_ref()
    }

    /// Terminal outcome, if the attempt has reached one.
    pub fn outcome(&self) -> Option<SettlementOutcome> {
        match &self.state {
            AttemptState::Completed {
                transaction_reference,
            } => Some(SettlementOutcome::Completed {
                transaction_reference: transaction_reference.clone(),
            }),
            AttemptState::Failed { reason } => Some(SettlementOutcome::Failed {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    /// Validate the batch and make the first protocol call.
    ///
    /// Only valid from `Idle`. Validation errors fail the attempt without any
    /// network call; a 402 parks it awaiting explicit confirmation.
    pub async fn submit(
        &mut self,
        source: EntityId,
        network: Network,
        entries: &[EntryInput],
        snapshot: &RegistrySnapshot,
    ) -> AppResult<AttemptState> {
        self.expect_state("submit", |s| matches!(s, AttemptState::Idle))?;

        self.transition(AttemptState::Validating);
        let request = match SettlementRequestBuilder::build(source, network, entries, snapshot) {
            Ok(request) => request,
            Err(reason) => return Ok(self.fail(reason)),
        };
        self.request = Some(request);

        self.transition(AttemptState::Submitted);
        let outcome = {
            let request = self.request.as_ref().ok_or_else(|| {
                AppError::Internal("submitted attempt lost its request".to_string())
            })?;
            self.transport.send(request, CallMode::Initial).await
        };
        Ok(self.apply_call_result(outcome, 0))
    }

    /// Make the authorized second call with the same immutable request.
    ///
    /// Only valid from `AwaitingPaymentConfirmation`. A 402 on this call
    /// parks the attempt again with an incremented retry counter; the caller
    /// may confirm again or cancel.
    pub async fn confirm(&mut self) -> AppResult<AttemptState> {
        let retries = match &self.state {
            AttemptState::AwaitingPaymentConfirmation { retries } => *retries,
            _ => return Err(self.invalid("confirm")),
        };

        self.transition(AttemptState::Authorizing);
        let outcome = {
            let request = self.request.as_ref().ok_or_else(|| {
                AppError::Internal("confirming attempt lost its request".to_string())
            })?;
            let mode = CallMode::Authorized {
                settlement_token: self.settlement_token.as_deref(),
            };
            self.transport.send(request, mode).await
        };
        Ok(self.apply_call_result(outcome, retries + 1))
    }

    /// Abandon an attempt that is awaiting payment confirmation.
    pub fn cancel(&mut self) -> AppResult<AttemptState> {
        self.expect_state("cancel", |s| {
            matches!(s, AttemptState::AwaitingPaymentConfirmation { .. })
        })?;
        Ok(self.fail(AppError::UserCancelled))
    }

    fn apply_call_result(
        &mut self,
        outcome: AppResult<ChallengeOutcome>,
        retries: u32,
    ) -> AttemptState {
        match outcome {
            Ok(ChallengeOutcome::Settled {
                transaction_reference,
            }) => {
                info!(
                    "✅ Attempt {} completed: {}",
                    self.id, transaction_reference
                );
                self.transition(AttemptState::Completed {
                    transaction_reference,
                })
            }
            Ok(ChallengeOutcome::PaymentRequired {
                message,
                settlement_token,
            }) => {
                info!(
                    "💳 Attempt {} awaiting payment confirmation: {}",
                    self.id, message
                );
                if settlement_token.is_some() {
                    self.settlement_token = settlement_token;
                }
                self.transition(AttemptState::AwaitingPaymentConfirmation { retries })
            }
            Ok(ChallengeOutcome::Rejected { status, message }) => {
                self.fail(AppError::ServerRejection { status, message })
            }
            Err(reason) => self.fail(reason),
        }
    }

    fn transition(&mut self, next: AttemptState) -> AttemptState {
        info!("Attempt {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.state.clone()
    }

    fn fail(&mut self, reason: AppError) -> AttemptState {
        warn!("Attempt {} failed in {}: {}", self.id, self.state, reason);
        self.transition(AttemptState::Failed { reason })
    }

    fn expect_state(
        &self,
        action: &'static str,
        valid: impl Fn(&AttemptState) -> bool,
    ) -> AppResult<()> {
        if valid(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> AppError {
        AppError::InvalidState {
            action,
            state: self.state.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeOutcome;
    use crate::registry::{Recipient, RegistrySnapshot};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted transport recording every call it receives.
    struct MockTransport {
        script: Mutex<VecDeque<AppResult<ChallengeOutcome>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    #[derive(Clone)]
    struct RecordedCall {
        payload: Vec<u8>,
        authorized: bool,
        settlement_token: Option<String>,
    }

    impl MockTransport {
        fn scripted(outcomes: Vec<AppResult<ChallengeOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl SettlementTransport for MockTransport {
        async fn send(
            &self,
            request: &SettlementRequest,
            mode: CallMode<'_>,
        ) -> AppResult<ChallengeOutcome> {
            self.calls.lock().push(RecordedCall {
                payload: request.payload().to_vec(),
                authorized: mode.is_authorized(),
                settlement_token: match mode {
                    CallMode::Authorized { settlement_token } => {
                        settlement_token.map(str::to_string)
                    }
                    CallMode::Initial => None,
                },
            });
            self.script
                .lock()
                .pop_front()
                .expect("transport called more times than scripted")
        }
    }

    fn recipient(id: &str, registered: bool) -> Recipient {
        Recipient {
            id: id.into(),
            display_name: id.to_string(),
            address: format!("0x{:0>40}", id.len()),
            registered,
            available_balance: None,
        }
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::new(vec![
            recipient("alice", true),
            recipient("bob", true),
            recipient("carol", false),
        ])
    }

    fn entries() -> Vec<EntryInput> {
        vec![
            EntryInput::new("alice", "0.1"),
            EntryInput::new("bob", "0.5"),
        ]
    }

    fn settled(reference: &str) -> AppResult<ChallengeOutcome> {
        Ok(ChallengeOutcome::Settled {
            transaction_reference: reference.to_string(),
        })
    }

    fn payment_required(token: Option<&str>) -> AppResult<ChallengeOutcome> {
        Ok(ChallengeOutcome::PaymentRequired {
            message: "authorize payment".to_string(),
            settlement_token: token.map(str::to_string),
        })
    }

    async fn submit(
        orchestrator: &mut SettlementOrchestrator,
        entries: &[EntryInput],
    ) -> AttemptState {
        orchestrator
            .submit("acme".into(), Network::Base, entries, &snapshot())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn immediate_success_completes_the_attempt() {
        let transport = MockTransport::scripted(vec![settled("0xfeed")]);
        let mut orchestrator = SettlementOrchestrator::new(transport.clone());

        let state = submit(&mut orchestrator, &entries()).await;
        assert_eq!(
            state,
            AttemptState::Completed {
                transaction_reference: "0xfeed".to_string()
            }
        );
        assert_eq!(
            orchestrator.outcome(),
            Some(SettlementOutcome::Completed {
                transaction_reference: "0xfeed".to_string()
            })
        );

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].authorized);
    }

    #[tokio::test]
    async fn payment_required_then_confirm_completes() {
        let transport =
            MockTransport::scripted(vec![payment_required(Some("tok-9")), settled("0xabc")]);
        let mut orchestrator = SettlementOrchestrator::new(transport.clone());

        let state = submit(&mut orchestrator, &entries()).await;
        assert_eq!(
            state,
            AttemptState::AwaitingPaymentConfirmation { retries: 0 }
        );

        let state = orchestrator.confirm().await.unwrap();
        assert_eq!(
            state,
            AttemptState::Completed {
                transaction_reference: "0xabc".to_string()
            }
        );

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].authorized);
        assert_eq!(calls[1].settlement_token.as_deref(), Some("tok-9"));
    }

    #[tokio::test]
    async fn authorized_payload_is_byte_identical_to_first_call() {
        let transport = MockTransport::scripted(vec![
            payment_required(None),
            payment_required(None),
            settled("0x1"),
        ]);
        let mut orchestrator = SettlementOrchestrator::new(transport.clone());

        submit(&mut orchestrator, &entries()).await;
        orchestrator.confirm().await.unwrap();
        orchestrator.confirm().await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].payload, calls[1].payload);
        assert_eq!(calls[1].payload, calls[2].payload);
    }

    #[tokio::test]
    async fn repeated_402_on_confirm_increments_retries() {
        let transport =
            MockTransport::scripted(vec![payment_required(None), payment_required(None)]);
        let mut orchestrator = SettlementOrchestrator::new(transport);

        submit(&mut orchestrator, &entries()).await;
        let state = orchestrator.confirm().await.unwrap();
        assert_eq!(
            state,
            AttemptState::AwaitingPaymentConfirmation { retries: 1 }
        );
    }

    #[tokio::test]
    async fn validation_failure_makes_no_network_call() {
        let transport = MockTransport::scripted(vec![]);
        let mut orchestrator = SettlementOrchestrator::new(transport.clone());

        let duplicate = vec![
            EntryInput::new("alice", "0.1"),
            EntryInput::new("alice", "0.2"),
        ];
        let state = submit(&mut orchestrator, &duplicate).await;
        assert!(matches!(
            state,
            AttemptState::Failed {
                reason: AppError::Validation(_)
            }
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn network_failure_on_first_call_is_terminal() {
        let transport = MockTransport::scripted(vec![Err(AppError::Network(
            "request timed out".to_string(),
        ))]);
        let mut orchestrator = SettlementOrchestrator::new(transport);

        let state = submit(&mut orchestrator, &entries()).await;
        assert!(matches!(
            state,
            AttemptState::Failed {
                reason: AppError::Network(_)
            }
        ));
        // Terminal: neither confirm nor cancel is accepted.
        assert!(orchestrator.confirm().await.is_err());
        assert!(orchestrator.cancel().is_err());
    }

    #[tokio::test]
    async fn server_rejection_preserves_message() {
        let transport = MockTransport::scripted(vec![Ok(ChallengeOutcome::Rejected {
            status: Some(409),
            message: "insufficient escrow".to_string(),
        })]);
        let mut orchestrator = SettlementOrchestrator::new(transport);

        let state = submit(&mut orchestrator, &entries()).await;
        match state {
            AttemptState::Failed {
                reason: AppError::ServerRejection { status, message },
            } => {
                assert_eq!(status, Some(409));
                assert_eq!(message, "insufficient escrow");
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_is_only_valid_while_awaiting_confirmation() {
        let transport = MockTransport::scripted(vec![payment_required(None)]);
        let mut orchestrator = SettlementOrchestrator::new(transport);

        // Not yet submitted: cancel rejected without side effects.
        assert!(matches!(
            orchestrator.cancel(),
            Err(AppError::InvalidState { action: "cancel", .. })
        ));
        assert_eq!(orchestrator.state(), &AttemptState::Idle);

        submit(&mut orchestrator, &entries()).await;
        let state = orchestrator.cancel().unwrap();
        assert_eq!(
            state,
            AttemptState::Failed {
                reason: AppError::UserCancelled
            }
        );
    }

    #[tokio::test]
    async fn submit_is_rejected_once_the_attempt_has_started() {
        let transport = MockTransport::scripted(vec![payment_required(None)]);
        let mut orchestrator = SettlementOrchestrator::new(transport);

        submit(&mut orchestrator, &entries()).await;
        let second = orchestrator
            .submit("acme".into(), Network::Base, &entries(), &snapshot())
            .await;
        assert!(matches!(
            second,
            Err(AppError::InvalidState { action: "submit", .. })
        ));
        // State untouched by the rejected call.
        assert_eq!(
            orchestrator.state(),
            &AttemptState::AwaitingPaymentConfirmation { retries: 0 }
        );
    }

    #[tokio::test]
    async fn confirm_before_payment_required_is_rejected() {
        let transport = MockTransport::scripted(vec![]);
        let mut orchestrator = SettlementOrchestrator::new(transport.clone());

        assert!(matches!(
            orchestrator.confirm().await,
            Err(AppError::InvalidState { action: "confirm", .. })
        ));
        assert!(transport.calls().is_empty());
    }
}
