use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use alloy::sol;
use async_trait::async_trait;

use crate::chain::ChainClient;
use crate::config::RetryPolicy;
use crate::error::PaymentError;
use crate::intent::PaymentIntent;
use crate::registry::TokenRegistry;

sol! {
    struct SwapRecord {
        bool executed;
        uint256 amountOut;
    }

    #[sol(rpc)]
    interface IAutoSwap {
        function swapExact(bytes32 paymentRef, address tokenIn, address tokenOut, uint256 amountIn, uint256 maxSlippageBps) external returns (uint256 amountOut);
        function swapOf(bytes32 paymentRef) external view returns (SwapRecord memory record);
    }
}

/// Seam over token conversion. The production implementation drives the
/// auto-swap contract; tests substitute scripted fakes.
#[async_trait]
pub trait SwapRouter: Send + Sync {
    /// A swap is needed exactly when funding and settlement tokens differ.
    fn needs_swap(&self, intent: &PaymentIntent) -> bool {
        !intent
            .token
            .trim()
            .eq_ignore_ascii_case(intent.settlement_token.trim())
    }

    /// Convert the funded amount into the settlement token. Returns the
    /// swap transaction hash once it is included.
    async fn swap(&self, intent: &PaymentIntent) -> Result<TxHash, PaymentError>;

    /// Whether a swap for this intent already executed on-chain. Used to
    /// resume safely instead of swapping twice.
    async fn swap_executed(&self, intent: &PaymentIntent) -> Result<bool, PaymentError>;
}

/// Swap router backed by the on-chain auto-swap contract.
///
/// The contract executes at most one swap per payment reference and
/// enforces the slippage ceiling against its own price oracle, so a
/// duplicate submission reverts rather than trading twice.
#[derive(Debug, Clone)]
pub struct AutoSwapRouter<P> {
    chain: Arc<ChainClient<P>>,
    address: Address,
    registry: Arc<TokenRegistry>,
    max_slippage_bps: u64,
    policy: RetryPolicy,
}

impl<P> AutoSwapRouter<P> {
    pub fn new(
        chain: Arc<ChainClient<P>>,
        address: Address,
        registry: Arc<TokenRegistry>,
        max_slippage_bps: u64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            address,
            registry,
            max_slippage_bps,
            policy,
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> SwapRouter for AutoSwapRouter<P> {
    async fn swap(&self, intent: &PaymentIntent) -> Result<TxHash, PaymentError> {
        let token_in = self.registry.resolve(&intent.token)?;
        let token_out = self.registry.resolve(&intent.settlement_token)?;
        let payment_ref = intent.id.chain_ref();

        let contract = IAutoSwap::new(self.address, self.chain.provider());
        let call = contract.swapExact(
            payment_ref,
            token_in,
            token_out,
            U256::from(intent.amount),
            U256::from(self.max_slippage_bps),
        );
        let pending = tokio::time::timeout(self.policy.submit_timeout, call.send())
            .await
            .map_err(|_| PaymentError::Timeout("swap submission"))?
            .map_err(|e| PaymentError::Swap(format!("swap rejected: {e}")))?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(
            id = %intent.id,
            tx = %tx_hash,
            token_in = %intent.token,
            token_out = %intent.settlement_token,
            "swap submitted"
        );

        let receipt = tokio::time::timeout(self.policy.receipt_timeout, pending.get_receipt())
            .await
            .map_err(|_| PaymentError::Timeout("swap receipt"))?
            .map_err(|e| PaymentError::Swap(format!("swap receipt failed: {e}")))?;
        if !receipt.status() {
            return Err(PaymentError::Swap("swap transaction reverted".into()));
        }
        Ok(receipt.transaction_hash)
    }

    async fn swap_executed(&self, intent: &PaymentIntent) -> Result<bool, PaymentError> {
        let contract = IAutoSwap::new(self.address, self.chain.provider());
        let record = contract
            .swapOf(intent.id.chain_ref())
            .call()
            .await
            .map_err(|e| PaymentError::Chain(format!("swapOf query failed: {e}")))?;
        Ok(record.executed)
    }
}
