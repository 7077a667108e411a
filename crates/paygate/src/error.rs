use thiserror::Error;

use crate::intent::{IntentId, IntentState};

/// Failure reason codes persisted on intents that reach the `failed` state.
///
/// These are the only values ever surfaced to callers in `failureReason`;
/// the underlying error detail stays in the logs.
pub mod reason {
    pub const FUNDING_TIMEOUT: &str = "funding-timeout";
    pub const FUNDING_MISMATCH: &str = "funding-mismatch";
    pub const SWAP_FAILED: &str = "swap-failed";
    pub const SIGNING_FAILED: &str = "signing-failed";
    pub const SUBMISSION_FAILED: &str = "submission-failed";
    pub const SETTLEMENT_FAILED: &str = "settlement-failed";
}

/// Errors produced while creating, verifying, and settling payment intents.
///
/// Messages never contain key material or raw node payloads, only enough
/// detail to diagnose the failure from logs.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Malformed or unacceptable request input.
    #[error("invalid payment request: {0}")]
    Validation(String),

    /// Token symbol is not present in the configured registry.
    #[error("unknown token: {0}")]
    UnknownToken(String),

    /// No funding recorded at the gateway for this intent yet.
    #[error("funding not observed at the gateway yet")]
    FundingNotFound,

    /// Funding exists but does not match the intent (payer, token, or amount).
    #[error("funding mismatch: {0}")]
    FundingMismatch(String),

    /// A chain interaction exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Swap submission failed or the swap transaction reverted.
    #[error("swap failed: {0}")]
    Swap(String),

    /// Operator key could not be loaded or used.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The node rejected a transaction before inclusion.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// Settlement submission failed or the settle transaction reverted.
    #[error("settlement failed: {0}")]
    Settlement(String),

    /// RPC transport or node error outside a specific submission.
    #[error("chain error: {0}")]
    Chain(String),

    /// No intent persisted under this id.
    #[error("payment intent not found: {0}")]
    NotFound(IntentId),

    /// Another process committed a state transition first. Recovered
    /// internally by re-reading the current state, never surfaced to callers.
    #[error("concurrent state transition")]
    Conflict,

    /// The requested transition is not allowed by the state machine.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: IntentState, to: IntentState },

    /// Too many intents being confirmed at once.
    #[error("too many in-flight confirmations, try again shortly")]
    Overloaded,

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl PaymentError {
    /// Whether the same operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::FundingNotFound
                | PaymentError::Timeout(_)
                | PaymentError::Chain(_)
                | PaymentError::Settlement(_)
                | PaymentError::Overloaded
        )
    }

    /// The reason code recorded when this error makes an intent fail.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            PaymentError::FundingMismatch(_) => Some(reason::FUNDING_MISMATCH),
            PaymentError::Swap(_) => Some(reason::SWAP_FAILED),
            PaymentError::Signing(_) => Some(reason::SIGNING_FAILED),
            PaymentError::Submission(_) => Some(reason::SUBMISSION_FAILED),
            PaymentError::Settlement(_) | PaymentError::Timeout(_) | PaymentError::Chain(_) => {
                Some(reason::SETTLEMENT_FAILED)
            }
            _ => None,
        }
    }
}
