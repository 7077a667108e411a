use std::fmt;
use std::str::FromStr;

use alloy::primitives::{keccak256, Address, TxHash, B256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a payment intent. Unique for the lifetime of the
/// store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 32-byte reference under which this intent is keyed on-chain.
    ///
    /// Derived deterministically from the id so that a crashed process can
    /// re-derive it and probe contract state for work it already submitted.
    pub fn chain_ref(&self) -> B256 {
        keccak256(self.0.to_string().as_bytes())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for IntentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a payment intent.
///
/// Transitions are strictly forward. `settled` and `failed` are terminal and
/// immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentState {
    Pending,
    Verifying,
    Swapping,
    Settling,
    Settled,
    Failed,
}

impl IntentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, IntentState::Settled | IntentState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `swapping` is skipped when no conversion is needed, so `verifying`
    /// may advance directly to `settling`. Every non-terminal state may
    /// fail; `settled` is reachable only from `settling`.
    pub fn can_advance_to(self, next: IntentState) -> bool {
        use IntentState::*;
        matches!(
            (self, next),
            (Pending, Verifying)
                | (Verifying, Swapping)
                | (Verifying, Settling)
                | (Swapping, Settling)
                | (Settling, Settled)
                | (Pending, Failed)
                | (Verifying, Failed)
                | (Swapping, Failed)
                | (Settling, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentState::Pending => "pending",
            IntentState::Verifying => "verifying",
            IntentState::Swapping => "swapping",
            IntentState::Settling => "settling",
            IntentState::Settled => "settled",
            IntentState::Failed => "failed",
        }
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown intent state: {0}")]
pub struct ParseStateError(String);

impl FromStr for IntentState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentState::Pending),
            "verifying" => Ok(IntentState::Verifying),
            "swapping" => Ok(IntentState::Swapping),
            "settling" => Ok(IntentState::Settling),
            "settled" => Ok(IntentState::Settled),
            "failed" => Ok(IntentState::Failed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Request body for creating a payment intent.
///
/// The amount is a decimal string in the token's smallest denomination,
/// matching how wallets and pay pages already format token values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub payer_address: Address,
    /// Symbol of the token the payer funds with, e.g. "USDC".
    pub token: String,
    pub amount: String,
    /// Symbol of the token the merchant receives.
    pub settlement_token: String,
}

/// A persisted payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: IntentId,
    pub payer_address: Address,
    pub token: String,
    /// Amount in the funding token's smallest denomination.
    pub amount: u128,
    pub settlement_token: String,
    pub state: IntentState,
    /// Transaction that funded the gateway, when it could be located.
    pub chain_tx_hash: Option<TxHash>,
    /// Set only when a swap was required.
    pub swap_tx_hash: Option<TxHash>,
    pub settlement_tx_hash: Option<TxHash>,
    /// Reason code, set only in the `failed` state.
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PaymentIntent {
    pub fn new(request: &NewPayment, amount: u128) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: IntentId::new(),
            payer_address: request.payer_address,
            token: request.token.clone(),
            amount,
            settlement_token: request.settlement_token.clone(),
            state: IntentState::Pending,
            chain_tx_hash: None,
            swap_tx_hash: None,
            settlement_tx_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_status(&self) -> PaymentStatus {
        PaymentStatus {
            id: self.id,
            state: self.state,
            chain_tx_hash: self.chain_tx_hash,
            swap_tx_hash: self.swap_tx_hash,
            settlement_tx_hash: self.settlement_tx_hash,
            failure_reason: self.failure_reason.clone(),
        }
    }
}

/// Caller-facing view of an intent, returned by the status and confirm
/// endpoints. Hash fields are omitted from JSON until they exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    pub id: IntentId,
    pub state: IntentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<TxHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        use IntentState::*;
        assert!(Pending.can_advance_to(Verifying));
        assert!(Verifying.can_advance_to(Swapping));
        assert!(Verifying.can_advance_to(Settling));
        assert!(Swapping.can_advance_to(Settling));
        assert!(Settling.can_advance_to(Settled));
    }

    #[test]
    fn every_active_state_may_fail() {
        use IntentState::*;
        for state in [Pending, Verifying, Swapping, Settling] {
            assert!(state.can_advance_to(Failed), "{state} should be failable");
        }
    }

    #[test]
    fn terminal_states_are_immutable() {
        use IntentState::*;
        for state in [Settled, Failed] {
            for next in [Pending, Verifying, Swapping, Settling, Settled, Failed] {
                assert!(!state.can_advance_to(next));
            }
        }
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        use IntentState::*;
        assert!(!Verifying.can_advance_to(Pending));
        assert!(!Pending.can_advance_to(Settling));
        assert!(!Pending.can_advance_to(Settled));
        assert!(!Swapping.can_advance_to(Verifying));
        assert!(!Settling.can_advance_to(Swapping));
    }

    #[test]
    fn state_strings_round_trip() {
        use IntentState::*;
        for state in [Pending, Verifying, Swapping, Settling, Settled, Failed] {
            assert_eq!(state.to_string().parse::<IntentState>().unwrap(), state);
        }
        assert!("unknown".parse::<IntentState>().is_err());
    }

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&IntentState::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&IntentState::Settled).unwrap(),
            "\"settled\""
        );
    }

    #[test]
    fn chain_ref_is_deterministic_and_distinct() {
        let a = IntentId::new();
        let b = IntentId::new();
        assert_eq!(a.chain_ref(), a.chain_ref());
        assert_ne!(a.chain_ref(), b.chain_ref());
    }

    #[test]
    fn intent_id_round_trips_through_display() {
        let id = IntentId::new();
        assert_eq!(id.to_string().parse::<IntentId>().unwrap(), id);
    }

    #[test]
    fn status_omits_absent_fields() {
        let request = NewPayment {
            payer_address: Address::repeat_byte(0x11),
            token: "USDC".into(),
            amount: "1000000".into(),
            settlement_token: "USDC".into(),
        };
        let intent = PaymentIntent::new(&request, 1_000_000);
        let json = serde_json::to_value(intent.to_status()).unwrap();
        assert_eq!(json["state"], "pending");
        assert!(json.get("chainTxHash").is_none());
        assert!(json.get("failureReason").is_none());
    }
}
