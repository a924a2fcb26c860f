use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Top-level error type for the settlement client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Settlement rejected by server: {message}")]
    ServerRejection { status: Option<u16>, message: String },

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Invalid transition: {action} is not permitted in state {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-entry validation failures collected by the request builder.
///
/// Every blocking entry is reported, not just the first, so a caller can
/// surface all offending recipients in one pass.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationIssue {
    #[error("batch contains no entries")]
    EmptyBatch,

    #[error("amount {amount:?} for recipient {recipient} is not a valid decimal")]
    UnparsableAmount { recipient: String, amount: String },

    #[error("amount {amount} for recipient {recipient} must be positive")]
    NonPositiveAmount { recipient: String, amount: String },

    #[error("recipient {recipient} appears more than once in the batch")]
    DuplicateRecipient { recipient: String },

    #[error("recipient {recipient} is not registered to receive this token")]
    UnregisteredRecipient { recipient: String },

    #[error("recipient {recipient} is not known to the directory")]
    UnknownRecipient { recipient: String },

    #[error("recipient {recipient} has an invalid destination address")]
    InvalidAddress { recipient: String },

    #[error("batch total {total} exceeds available balance {available}")]
    InsufficientBalance { total: String, available: String },
}

/// Aggregate validation error carrying every issue found in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Recipient ids named by issues selected by the filter, for UI grouping.
    pub fn recipients<'a>(
        &'a self,
        matches: impl Fn(&'a ValidationIssue) -> Option<&'a String>,
    ) -> Vec<&'a String> {
        self.issues.iter().filter_map(matches).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settlement request validation failed: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::Network(format!("request timed out: {}", error))
        } else if error.is_connect() {
            AppError::Network(format!("connection failed: {}", error))
        } else {
            AppError::Network(format!("HTTP request error: {}", error))
        }
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Internal(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{:?}", error))
    }
}

/// Result type alias for the settlement client
pub type AppResult<T> = Result<T, AppError>;
