use std::fmt;
use std::time::Duration;

use alloy::primitives::TxHash;
use alloy::providers::Provider;

use crate::error::PaymentError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where a submitted transaction currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The node has never seen this hash.
    NotFound,
    /// Known to the node but not yet included in a block.
    Pending,
    /// Included but not yet buried under enough confirmations.
    Included,
    /// Included with at least the configured confirmation depth.
    Finalized,
    /// Included and reverted.
    Reverted,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::NotFound => "not-found",
            TxStatus::Pending => "pending",
            TxStatus::Included => "included",
            TxStatus::Finalized => "finalized",
            TxStatus::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

/// Read-side chain access shared by the gateway and swap components.
///
/// Wraps a provider with the finality rule so callers ask "is this final"
/// instead of counting blocks themselves.
#[derive(Debug, Clone)]
pub struct ChainClient<P> {
    provider: P,
    finality_confirmations: u64,
    poll_interval: Duration,
}

impl<P: Provider> ChainClient<P> {
    pub fn new(provider: P, finality_confirmations: u64) -> Self {
        Self {
            provider,
            finality_confirmations: finality_confirmations.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the cadence of finality polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn latest_block(&self) -> Result<u64, PaymentError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| PaymentError::Chain(format!("failed to fetch latest block: {e}")))
    }

    /// Classify a transaction hash against the current chain view.
    pub async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, PaymentError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| PaymentError::Chain(format!("receipt lookup failed: {e}")))?;

        let Some(receipt) = receipt else {
            let known = self
                .provider
                .get_transaction_by_hash(hash)
                .await
                .map_err(|e| PaymentError::Chain(format!("transaction lookup failed: {e}")))?;
            return Ok(if known.is_some() {
                TxStatus::Pending
            } else {
                TxStatus::NotFound
            });
        };

        if !receipt.status() {
            return Ok(TxStatus::Reverted);
        }

        let Some(included_in) = receipt.block_number else {
            return Ok(TxStatus::Included);
        };
        let tip = self.latest_block().await?;
        let confirmations = tip.saturating_sub(included_in).saturating_add(1);
        Ok(if confirmations >= self.finality_confirmations {
            TxStatus::Finalized
        } else {
            TxStatus::Included
        })
    }

    /// Poll until the transaction is finalized or reverted, bounded by
    /// `timeout`. Returns only those two statuses.
    pub async fn wait_for_finality(
        &self,
        hash: TxHash,
        timeout: Duration,
    ) -> Result<TxStatus, PaymentError> {
        let wait = async {
            loop {
                match self.transaction_status(hash).await {
                    Ok(TxStatus::Finalized) => return Ok(TxStatus::Finalized),
                    Ok(TxStatus::Reverted) => return Ok(TxStatus::Reverted),
                    // A receipt can briefly vanish during a reorg; keep
                    // polling until the deadline decides.
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(tx = %hash, error = %e, "finality poll failed, retrying");
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PaymentError::Timeout("transaction finality"))?
    }
}
