use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::request::SettlementRequest;

/// Status code the endpoint uses to signal that the same request must be
/// resubmitted with payment authorization before it will execute.
pub const PAYMENT_REQUIRED: u16 = 402;

/// Header carrying the explicit payment-authorization marker on the second
/// call. Absent this header the endpoint must not execute the transfer.
pub const PAYMENT_AUTHORIZATION_HEADER: &str = "x-payment-authorization";

/// Header echoing the settlement token the first call's 402 response issued.
pub const SETTLEMENT_TOKEN_HEADER: &str = "x-settlement-token";

const API_KEY_HEADER: &str = "x-api-key";

/// Which of the two protocol calls is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode<'a> {
    /// First call: no payment-authorization marker.
    Initial,
    /// Second call: authorization marker attached, token echoed when the
    /// server issued one.
    Authorized { settlement_token: Option<&'a str> },
}

impl CallMode<'_> {
    pub fn is_authorized(&self) -> bool {
        matches!(self, CallMode::Authorized { .. })
    }
}

/// Tagged result of one protocol call. Payment-required is a protocol step,
/// never an error; transport-level failures use the error channel instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The settlement executed; terminal success.
    Settled { transaction_reference: String },
    /// The request was accepted for pricing and awaits authorization.
    PaymentRequired {
        message: String,
        settlement_token: Option<String>,
    },
    /// Explicit non-success, non-402 response from the server.
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

impl fmt::Display for ChallengeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeOutcome::Settled {
                transaction_reference,
            } => write!(f, "settled ({})", transaction_reference),
            ChallengeOutcome::PaymentRequired { .. } => write!(f, "payment required"),
            ChallengeOutcome::Rejected { message, .. } => write!(f, "rejected: {}", message),
        }
    }
}

/// Transport seam for the two-phase settlement protocol.
///
/// One call per invocation, no internal retry loop; looping policy belongs
/// to the orchestrator.
#[async_trait]
pub trait SettlementTransport: Send + Sync {
    async fn send(
        &self,
        request: &SettlementRequest,
        mode: CallMode<'_>,
    ) -> AppResult<ChallengeOutcome>;
}

/// Structured response body from the settlement endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementResponse {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    /// Body-level status code; the server may mirror 402 here even when the
    /// HTTP layer reports something else.
    status_code: Option<u16>,
    result: Option<SettlementResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementResult {
    transaction_reference: Option<String>,
    settlement_token: Option<String>,
}

/// Map one HTTP response to a [`ChallengeOutcome`].
///
/// 402 is recognized from either the HTTP status or the body-level code,
/// regardless of the success flag. A body that cannot be parsed is a network
/// error unless the HTTP status alone already signals payment-required.
fn interpret_response(http_status: StatusCode, body: &[u8]) -> AppResult<ChallengeOutcome> {
    let parsed: Option<SettlementResponse> = serde_json::from_slice(body).ok();

    let body_code = parsed.as_ref().and_then(|r| r.status_code);
    if http_status.as_u16() == PAYMENT_REQUIRED || body_code == Some(PAYMENT_REQUIRED) {
        let (message, settlement_token) = match &parsed {
            Some(response) => (
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| "payment required".to_string()),
                response
                    .result
                    .as_ref()
                    .and_then(|r| r.settlement_token.clone()),
            ),
            None => ("payment required".to_string(), None),
        };
        return Ok(ChallengeOutcome::PaymentRequired {
            message,
            settlement_token,
        });
    }

    let response = parsed.ok_or_else(|| {
        AppError::Network(format!(
            "malformed response from settlement endpoint (HTTP {})",
            http_status.as_u16()
        ))
    })?;

    if response.success && http_status.is_success() {
        let transaction_reference = response
            .result
            .and_then(|r| r.transaction_reference)
            .ok_or_else(|| {
                AppError::Network("success response missing transaction reference".to_string())
            })?;
        return Ok(ChallengeOutcome::Settled {
            transaction_reference,
        });
    }

    Ok(ChallengeOutcome::Rejected {
        status: response.status_code.or(Some(http_status.as_u16())),
        message: response
            .message
            .unwrap_or_else(|| format!("settlement rejected (HTTP {})", http_status.as_u16())),
    })
}

/// Production transport: posts the request's pre-serialized bytes to the
/// settlement endpoint over HTTP.
///
/// The credential is injected at construction, never read from global state.
/// Every call is bounded by the configured timeout; a timeout is a hard
/// failure, not a payment-required signal.
pub struct HttpChallengeClient {
    client: reqwest::Client,
    settle_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpChallengeClient {
    pub fn new(config: &ClientConfig, api_key: impl Into<String>) -> AppResult<Self> {
        let timeout = config.request_timeout;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settle_url: format!(
                "{}/settlements",
                config.settlement_url.trim_end_matches('/')
            ),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn headers(&self, mode: CallMode<'_>) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(&self.api_key)
                    .map_err(|_| AppError::Config("API key is not a valid header".to_string()))?,
            );
        }
        if let CallMode::Authorized { settlement_token } = mode {
            headers.insert(PAYMENT_AUTHORIZATION_HEADER, HeaderValue::from_static("1"));
            if let Some(token) = settlement_token {
                headers.insert(
                    SETTLEMENT_TOKEN_HEADER,
                    HeaderValue::from_str(token).map_err(|_| {
                        AppError::Network("settlement token is not a valid header".to_string())
                    })?,
                );
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl SettlementTransport for HttpChallengeClient {
    async fn send(
        &self,
        request: &SettlementRequest,
        mode: CallMode<'_>,
    ) -> AppResult<ChallengeOutcome> {
        info!(
            "📤 Sending {} settlement call for {} ({} recipients)",
            if mode.is_authorized() {
                "authorized"
            } else {
                "initial"
            },
            request.source(),
            request.entries().len()
        );

        let response = self
            .client
            .post(&self.settle_url)
            .headers(self.headers(mode)?)
            // The exact bytes serialized at build time; never re-encoded.
            .body(request.payload().to_vec())
            .timeout(self.timeout)
            .send()
            .await?;

        let http_status = response.status();
        let body = response.bytes().await?;
        let outcome = interpret_response(http_status, &body)?;

        match &outcome {
            ChallengeOutcome::Settled { .. } | ChallengeOutcome::PaymentRequired { .. } => {
                info!("✅ Settlement call returned: {}", outcome)
            }
            ChallengeOutcome::Rejected { status, message } => {
                warn!("Settlement call rejected (status {:?}): {}", status, message)
            }
        }

        Ok(outcome)
    }
}
