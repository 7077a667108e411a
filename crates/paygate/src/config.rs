use std::time::Duration;

use alloy::primitives::Address;

/// Chain-level settings shared by every on-chain component.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Payment gateway contract holding custodial funds.
    pub gateway_address: Address,
    /// Auto-swap contract used when funding and settlement tokens differ.
    pub swap_router_address: Address,
    /// Blocks behind the tip before a transaction counts as final.
    pub finality_confirmations: u64,
    /// Worst acceptable swap execution price, in basis points.
    pub max_slippage_bps: u64,
}

/// Deadlines and retry budgets for confirmation work.
///
/// Funding retries are bounded by a wall-clock window measured from intent
/// creation so the bound holds across restarts. Settlement retries are
/// bounded per confirm call; the reconciliation sweep provides further
/// attempts for intents that stay unfinished.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How long an intent may sit unfunded before failing with
    /// `funding-timeout`.
    pub funding_window: Duration,
    /// Settlement submissions attempted per confirm call.
    pub settle_max_attempts: u32,
    /// Initial backoff between settlement attempts. Doubles per retry.
    pub settle_backoff: Duration,
    /// Ceiling on waiting for a settlement transaction to reach finality.
    pub finality_timeout: Duration,
    /// Ceiling on handing a transaction to the node.
    pub submit_timeout: Duration,
    /// Ceiling on waiting for an inclusion receipt.
    pub receipt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            funding_window: Duration::from_secs(600),
            settle_max_attempts: 3,
            settle_backoff: Duration::from_secs(2),
            finality_timeout: Duration::from_secs(90),
            submit_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(60),
        }
    }
}
