use std::sync::Arc;

use alloy::primitives::{Address, TxHash, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;

use crate::chain::{ChainClient, TxStatus};
use crate::config::RetryPolicy;
use crate::error::PaymentError;
use crate::intent::PaymentIntent;
use crate::registry::TokenRegistry;

sol! {
    struct FundingRecord {
        address payer;
        address token;
        uint256 amount;
    }

    #[sol(rpc)]
    interface IPaymentGateway {
        event FundsReceived(bytes32 indexed paymentRef, address indexed payer, address token, uint256 amount);

        function fundingOf(bytes32 paymentRef) external view returns (FundingRecord memory record);
        function isSettled(bytes32 paymentRef) external view returns (bool settled);
        function settle(bytes32 paymentRef, address token, uint256 amount) external;
    }
}

/// Proof that a payer funded the gateway for a specific intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingEvidence {
    pub payer: Address,
    pub token: Address,
    /// Amount actually deposited. May exceed the intent amount.
    pub amount: U256,
    /// The depositing transaction, when the event could be located.
    pub tx_hash: Option<TxHash>,
}

/// Seam over the settlement gateway. The production implementation talks to
/// the gateway contract; tests substitute scripted fakes.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Check whether the gateway holds matching funds for this intent.
    ///
    /// Returns [`PaymentError::FundingNotFound`] when nothing is recorded
    /// yet and [`PaymentError::FundingMismatch`] when the recorded deposit
    /// disagrees with the intent on payer, token, or amount.
    async fn verify_funding(&self, intent: &PaymentIntent)
        -> Result<FundingEvidence, PaymentError>;

    /// Release funds to the merchant. Returns the settlement transaction
    /// hash once it is final.
    async fn settle(
        &self,
        intent: &PaymentIntent,
        evidence: &FundingEvidence,
    ) -> Result<TxHash, PaymentError>;

    /// Whether the gateway already recorded a settlement for this intent.
    /// Used to resume safely after a crash or a lost receipt.
    async fn settlement_recorded(&self, intent: &PaymentIntent) -> Result<bool, PaymentError>;
}

/// Gateway adapter backed by the on-chain payment gateway contract.
///
/// Every operation is keyed by the intent's `chain_ref`, so repeated calls
/// observe and extend the same contract-side record instead of creating
/// duplicates.
#[derive(Debug, Clone)]
pub struct OnchainGateway<P> {
    chain: Arc<ChainClient<P>>,
    address: Address,
    registry: Arc<TokenRegistry>,
    policy: RetryPolicy,
}

impl<P> OnchainGateway<P> {
    pub fn new(
        chain: Arc<ChainClient<P>>,
        address: Address,
        registry: Arc<TokenRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            chain,
            address,
            registry,
            policy,
        }
    }
}

impl<P: Provider> OnchainGateway<P> {
    /// Locate the funding transaction via the FundsReceived event.
    /// Best-effort: an unindexed node or pruned logs just mean no hash.
    async fn funding_tx_hash(&self, payment_ref: B256) -> Option<TxHash> {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(IPaymentGateway::FundsReceived::SIGNATURE_HASH)
            .topic1(payment_ref)
            .from_block(0u64);
        match self.chain.provider().get_logs(&filter).await {
            Ok(logs) => logs.iter().find_map(|log| log.transaction_hash),
            Err(e) => {
                tracing::debug!(error = %e, "funding event lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> GatewayAdapter for OnchainGateway<P> {
    async fn verify_funding(
        &self,
        intent: &PaymentIntent,
    ) -> Result<FundingEvidence, PaymentError> {
        let expected_token = self.registry.resolve(&intent.token)?;
        let payment_ref = intent.id.chain_ref();

        let contract = IPaymentGateway::new(self.address, self.chain.provider());
        let record = contract
            .fundingOf(payment_ref)
            .call()
            .await
            .map_err(|e| PaymentError::Chain(format!("fundingOf query failed: {e}")))?;

        if record.amount.is_zero() {
            return Err(PaymentError::FundingNotFound);
        }
        if record.token != expected_token {
            return Err(PaymentError::FundingMismatch(format!(
                "funded with token {} instead of {}",
                record.token, intent.token
            )));
        }
        if record.payer != intent.payer_address {
            return Err(PaymentError::FundingMismatch(format!(
                "funded by {} instead of {}",
                record.payer, intent.payer_address
            )));
        }
        if record.amount < U256::from(intent.amount) {
            return Err(PaymentError::FundingMismatch(format!(
                "funded {} of {} required",
                record.amount, intent.amount
            )));
        }

        let tx_hash = self.funding_tx_hash(payment_ref).await;
        Ok(FundingEvidence {
            payer: record.payer,
            token: record.token,
            amount: record.amount,
            tx_hash,
        })
    }

    async fn settle(
        &self,
        intent: &PaymentIntent,
        evidence: &FundingEvidence,
    ) -> Result<TxHash, PaymentError> {
        let payment_ref = intent.id.chain_ref();
        let contract = IPaymentGateway::new(self.address, self.chain.provider());

        // The contract checks token and amount against its funding record
        // before releasing, so a settle against the wrong ref reverts.
        let call = contract.settle(payment_ref, evidence.token, evidence.amount);
        let pending = tokio::time::timeout(self.policy.submit_timeout, call.send())
            .await
            .map_err(|_| PaymentError::Timeout("settle submission"))?
            .map_err(|e| PaymentError::Submission(format!("settle rejected: {e}")))?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(id = %intent.id, tx = %tx_hash, "settlement submitted");

        let receipt = tokio::time::timeout(self.policy.receipt_timeout, pending.get_receipt())
            .await
            .map_err(|_| PaymentError::Timeout("settle receipt"))?
            .map_err(|e| PaymentError::Settlement(format!("settle receipt failed: {e}")))?;
        if !receipt.status() {
            return Err(PaymentError::Settlement("settle transaction reverted".into()));
        }

        match self
            .chain
            .wait_for_finality(receipt.transaction_hash, self.policy.finality_timeout)
            .await?
        {
            TxStatus::Finalized => Ok(receipt.transaction_hash),
            _ => Err(PaymentError::Settlement(
                "settle transaction reverted after inclusion".into(),
            )),
        }
    }

    async fn settlement_recorded(&self, intent: &PaymentIntent) -> Result<bool, PaymentError> {
        let contract = IPaymentGateway::new(self.address, self.chain.provider());
        contract
            .isSettled(intent.id.chain_ref())
            .call()
            .await
            .map_err(|e| PaymentError::Chain(format!("isSettled query failed: {e}")))
    }
}
