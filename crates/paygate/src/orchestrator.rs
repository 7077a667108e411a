//! Drives payment intents through their lifecycle:
//!
//! ```text
//! pending -> verifying -> [swapping ->] settling -> settled
//!     \___________\____________\____________\-----> failed
//! ```
//!
//! Each confirm call advances the intent as far as it can safely go in one
//! pass. Every transition is committed through the store's compare-and-swap,
//! which makes it safe to run multiple server processes against one
//! database: exactly one caller wins each transition, losers observe the
//! winner's state and return it without erroring.
//!
//! Within a process, a per-intent async lock keeps two confirm calls for
//! the same id from interleaving chain work. Across processes the on-chain
//! contracts are the backstop: swaps and settlements are keyed by the
//! intent's payment reference and execute at most once, so a duplicate
//! submission reverts and the loser resolves it by probing contract state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::RetryPolicy;
use crate::error::{reason, PaymentError};
use crate::gateway::GatewayAdapter;
use crate::intent::{IntentId, IntentState, NewPayment, PaymentIntent, PaymentStatus};
use crate::registry::TokenRegistry;
use crate::store::{SettlementStore, StateChanges};
use crate::swap::SwapRouter;

const SWEEP_BATCH: u32 = 256;

/// Observer for terminal transitions. Called exactly once per committed
/// transition into `settled` or `failed`, including those driven by the
/// reconciliation sweep.
pub trait SettlementNotifier: Send + Sync {
    fn settlement_finished(&self, intent: &PaymentIntent);
}

/// Default notifier that does nothing.
pub struct NoopNotifier;

impl SettlementNotifier for NoopNotifier {
    fn settlement_finished(&self, _intent: &PaymentIntent) {}
}

/// Outcome of one state-machine step.
enum Step {
    /// Transition committed; keep driving from the updated intent.
    Next(PaymentIntent),
    /// Nothing to do right now (waiting on funding or a transient outage).
    Hold(PaymentIntent),
    /// Another process committed first; report its state and stop.
    Yield(PaymentIntent),
}

pub struct Orchestrator {
    store: Arc<SettlementStore>,
    gateway: Arc<dyn GatewayAdapter>,
    swap: Arc<dyn SwapRouter>,
    registry: Arc<TokenRegistry>,
    policy: RetryPolicy,
    notifier: Arc<dyn SettlementNotifier>,
    intent_locks: DashMap<IntentId, Arc<Mutex<()>>>,
}

impl Orchestrator {
    /// Cap on tracked per-intent locks. Idle entries are dropped by the
    /// reconciliation task, so hitting this means a flood of distinct ids.
    const MAX_INTENT_LOCKS: usize = 100_000;

    pub fn new(
        store: Arc<SettlementStore>,
        gateway: Arc<dyn GatewayAdapter>,
        swap: Arc<dyn SwapRouter>,
        registry: Arc<TokenRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            swap,
            registry,
            policy,
            notifier: Arc::new(NoopNotifier),
            intent_locks: DashMap::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SettlementNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Validate and persist a new intent in the `pending` state.
    ///
    /// Rejects unknown tokens and non-positive amounts before anything is
    /// written, so a rejected request leaves no trace.
    pub fn create(&self, request: &NewPayment) -> Result<PaymentIntent, PaymentError> {
        let amount: u128 = request
            .amount
            .trim()
            .parse()
            .map_err(|_| PaymentError::Validation(format!("invalid amount: {}", request.amount)))?;
        if amount == 0 {
            return Err(PaymentError::Validation("amount must be positive".into()));
        }
        self.registry.resolve(&request.token)?;
        self.registry.resolve(&request.settlement_token)?;

        let intent = PaymentIntent::new(request, amount);
        self.store.insert(&intent)?;
        tracing::info!(
            id = %intent.id,
            payer = %intent.payer_address,
            token = %intent.token,
            amount = %intent.amount,
            settlement_token = %intent.settlement_token,
            "payment intent created"
        );
        Ok(intent)
    }

    /// Current state of an intent, without driving it forward.
    pub fn status(&self, id: &IntentId) -> Result<PaymentStatus, PaymentError> {
        let intent = self.store.get(id)?.ok_or(PaymentError::NotFound(*id))?;
        Ok(intent.to_status())
    }

    /// Drive an intent as far toward `settled` as currently possible and
    /// return the resulting state.
    ///
    /// Safe to call any number of times, from any number of callers: work
    /// already done is observed through the store and the contracts, never
    /// redone. Terminal states are reported as-is.
    pub async fn confirm(&self, id: &IntentId) -> Result<PaymentStatus, PaymentError> {
        // Existence check before taking a lock slot, so confirm spam on
        // random ids cannot grow the lock map.
        self.store.get(id)?.ok_or(PaymentError::NotFound(*id))?;

        let lock = self.intent_lock(*id)?;
        let _guard = lock.lock().await;

        let mut intent = self.store.get(id)?.ok_or(PaymentError::NotFound(*id))?;
        loop {
            let step = match intent.state {
                IntentState::Pending => self.step_pending(&intent).await?,
                IntentState::Verifying => self.step_verifying(&intent)?,
                IntentState::Swapping => self.step_swapping(&intent).await?,
                IntentState::Settling => self.step_settling(&intent).await?,
                IntentState::Settled | IntentState::Failed => return Ok(intent.to_status()),
            };
            match step {
                Step::Next(updated) => intent = updated,
                Step::Hold(current) | Step::Yield(current) => return Ok(current.to_status()),
            }
        }
    }

    /// Spawn the background reconciliation task: re-drives unfinished
    /// intents and trims idle locks on each tick. The first tick fires
    /// immediately, which resumes interrupted work after a restart.
    pub fn start_reconciliation(self: &Arc<Self>, interval: Duration) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                orchestrator.sweep().await;
                orchestrator.drop_idle_locks();
            }
        });
    }

    /// One reconciliation pass over unfinished intents, oldest first.
    pub async fn sweep(&self) {
        let batch = match self.store.list_unfinished(SWEEP_BATCH) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "reconciliation query failed");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }
        tracing::debug!(count = batch.len(), "reconciling unfinished payments");
        for intent in batch {
            if let Err(e) = self.confirm(&intent.id).await {
                tracing::warn!(id = %intent.id, error = %e, "reconciliation attempt failed");
            }
        }
    }

    // ---- state machine steps ------------------------------------------

    /// pending: look for funding at the gateway.
    async fn step_pending(&self, intent: &PaymentIntent) -> Result<Step, PaymentError> {
        match self.gateway.verify_funding(intent).await {
            Ok(evidence) => self.commit(
                intent,
                IntentState::Verifying,
                StateChanges {
                    chain_tx_hash: evidence.tx_hash,
                    ..Default::default()
                },
            ),
            Err(PaymentError::FundingNotFound) => {
                if self.funding_window_elapsed(intent) {
                    tracing::warn!(id = %intent.id, "funding window elapsed");
                    self.fail(intent, reason::FUNDING_TIMEOUT)
                } else {
                    Ok(Step::Hold(intent.clone()))
                }
            }
            Err(e @ PaymentError::FundingMismatch(_)) => {
                tracing::warn!(id = %intent.id, error = %e, "funding does not match intent");
                self.fail(intent, reason::FUNDING_MISMATCH)
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(id = %intent.id, error = %e, "funding check unavailable, will retry");
                Ok(Step::Hold(intent.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// verifying: decide whether a swap is needed.
    fn step_verifying(&self, intent: &PaymentIntent) -> Result<Step, PaymentError> {
        let next = if self.swap.needs_swap(intent) {
            IntentState::Swapping
        } else {
            IntentState::Settling
        };
        self.commit(intent, next, StateChanges::default())
    }

    /// swapping: convert the funded token into the settlement token.
    ///
    /// The swap contract executes at most once per payment reference, so
    /// the step first probes for a swap that already landed (crash resume,
    /// or a concurrent process that won the submission).
    async fn step_swapping(&self, intent: &PaymentIntent) -> Result<Step, PaymentError> {
        match self.swap.swap_executed(intent).await {
            Ok(true) => return self.commit(intent, IntentState::Settling, StateChanges::default()),
            Ok(false) => {}
            Err(e) if e.is_retryable() => return Ok(Step::Hold(intent.clone())),
            Err(e) => return Err(e),
        }

        match self.swap.swap(intent).await {
            Ok(tx_hash) => self.commit(
                intent,
                IntentState::Settling,
                StateChanges {
                    swap_tx_hash: Some(tx_hash),
                    ..Default::default()
                },
            ),
            Err(e) => {
                // A revert can mean someone else's swap beat ours in.
                if let Ok(true) = self.swap.swap_executed(intent).await {
                    return self.commit(intent, IntentState::Settling, StateChanges::default());
                }
                match e {
                    PaymentError::Swap(_)
                    | PaymentError::Signing(_)
                    | PaymentError::Submission(_) => {
                        tracing::warn!(id = %intent.id, error = %e, "swap failed");
                        self.fail(intent, e.failure_reason().unwrap_or(reason::SWAP_FAILED))
                    }
                    e if e.is_retryable() => Ok(Step::Hold(intent.clone())),
                    e => Err(e),
                }
            }
        }
    }

    /// settling: release funds to the merchant, with bounded retries.
    async fn step_settling(&self, intent: &PaymentIntent) -> Result<Step, PaymentError> {
        // Resume path: a previous attempt may have settled on-chain without
        // the result ever reaching the store.
        match self.gateway.settlement_recorded(intent).await {
            Ok(true) => return self.commit(intent, IntentState::Settled, StateChanges::default()),
            Ok(false) => {}
            Err(e) if e.is_retryable() => return Ok(Step::Hold(intent.clone())),
            Err(e) => return Err(e),
        }

        // Re-verify right before releasing funds.
        let evidence = match self.gateway.verify_funding(intent).await {
            Ok(evidence) => evidence,
            Err(PaymentError::FundingNotFound) => {
                // Funds were verified earlier; a gateway that stops
                // reporting them is transiently inconsistent, not failed.
                tracing::warn!(id = %intent.id, "funding no longer visible while settling");
                return Ok(Step::Hold(intent.clone()));
            }
            Err(e @ PaymentError::FundingMismatch(_)) => {
                tracing::warn!(id = %intent.id, error = %e, "funding mismatch surfaced while settling");
                return self.fail(intent, reason::FUNDING_MISMATCH);
            }
            Err(e) if e.is_retryable() => return Ok(Step::Hold(intent.clone())),
            Err(e) => return Err(e),
        };

        let attempts = self.policy.settle_max_attempts.max(1);
        let mut backoff = self.policy.settle_backoff;
        for attempt in 1..=attempts {
            match self.gateway.settle(intent, &evidence).await {
                Ok(tx_hash) => {
                    return self.commit(
                        intent,
                        IntentState::Settled,
                        StateChanges {
                            settlement_tx_hash: Some(tx_hash),
                            ..Default::default()
                        },
                    );
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        id = %intent.id,
                        attempt,
                        error = %e,
                        "settlement attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    // A revert can mean a concurrent settle won; trust the
                    // contract over the error.
                    if let Ok(true) = self.gateway.settlement_recorded(intent).await {
                        return self.commit(intent, IntentState::Settled, StateChanges::default());
                    }
                    tracing::error!(id = %intent.id, error = %e, "settlement failed");
                    return self.fail(intent, e.failure_reason().unwrap_or(reason::SETTLEMENT_FAILED));
                }
            }
        }
        // The loop always returns; attempts is at least 1.
        Err(PaymentError::Settlement("settlement retries exhausted".into()))
    }

    // ---- plumbing -----------------------------------------------------

    fn commit(
        &self,
        intent: &PaymentIntent,
        to: IntentState,
        changes: StateChanges,
    ) -> Result<Step, PaymentError> {
        match self.store.advance(&intent.id, intent.state, to, &changes) {
            Ok(updated) => {
                tracing::info!(
                    id = %updated.id,
                    from = %intent.state,
                    to = %updated.state,
                    "payment state advanced"
                );
                if updated.state.is_terminal() {
                    self.notifier.settlement_finished(&updated);
                }
                Ok(Step::Next(updated))
            }
            Err(PaymentError::Conflict) => {
                let current = self
                    .store
                    .get(&intent.id)?
                    .ok_or(PaymentError::NotFound(intent.id))?;
                tracing::debug!(
                    id = %intent.id,
                    expected = %intent.state,
                    current = %current.state,
                    "lost a state transition race, yielding"
                );
                Ok(Step::Yield(current))
            }
            Err(e) => Err(e),
        }
    }

    fn fail(&self, intent: &PaymentIntent, reason: &str) -> Result<Step, PaymentError> {
        self.commit(
            intent,
            IntentState::Failed,
            StateChanges {
                failure_reason: Some(reason.to_string()),
                ..Default::default()
            },
        )
    }

    fn funding_window_elapsed(&self, intent: &PaymentIntent) -> bool {
        let age = chrono::Utc::now().timestamp().saturating_sub(intent.created_at);
        age >= self.policy.funding_window.as_secs() as i64
    }

    fn intent_lock(&self, id: IntentId) -> Result<Arc<Mutex<()>>, PaymentError> {
        if self.intent_locks.len() >= Self::MAX_INTENT_LOCKS && !self.intent_locks.contains_key(&id)
        {
            tracing::warn!(
                count = self.intent_locks.len(),
                "intent lock map full, rejecting confirmation"
            );
            return Err(PaymentError::Overloaded);
        }
        Ok(self
            .intent_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Drop locks nobody holds. A lock is kept while any caller still has
    /// a clone (strong count above the map's own) or currently holds it.
    fn drop_idle_locks(&self) {
        let before = self.intent_locks.len();
        self.intent_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        let removed = before.saturating_sub(self.intent_locks.len());
        if removed > 0 {
            tracing::debug!(removed, "dropped idle intent locks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FundingEvidence;
    use alloy::primitives::{Address, TxHash, B256, U256};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const USDC: &str = "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238";
    const WETH: &str = "0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14";

    #[derive(Clone, Copy)]
    enum FundingOutcome {
        Funded,
        NotFound,
        Mismatch,
        Unreachable,
    }

    struct StubGateway {
        funding: StdMutex<FundingOutcome>,
        settle_failures: AtomicUsize,
        settle_submissions: AtomicUsize,
        recorded: AtomicBool,
    }

    impl StubGateway {
        fn new(funding: FundingOutcome) -> Arc<Self> {
            Arc::new(Self {
                funding: StdMutex::new(funding),
                settle_failures: AtomicUsize::new(0),
                settle_submissions: AtomicUsize::new(0),
                recorded: AtomicBool::new(false),
            })
        }

        fn set_funding(&self, outcome: FundingOutcome) {
            *self.funding.lock().unwrap() = outcome;
        }

        fn fail_settles(&self, times: usize) {
            self.settle_failures.store(times, Ordering::SeqCst);
        }

        fn submissions(&self) -> usize {
            self.settle_submissions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GatewayAdapter for StubGateway {
        async fn verify_funding(
            &self,
            intent: &PaymentIntent,
        ) -> Result<FundingEvidence, PaymentError> {
            match *self.funding.lock().unwrap() {
                FundingOutcome::Funded => Ok(FundingEvidence {
                    payer: intent.payer_address,
                    token: USDC.parse().unwrap(),
                    amount: U256::from(intent.amount),
                    tx_hash: Some(B256::repeat_byte(0xf0)),
                }),
                FundingOutcome::NotFound => Err(PaymentError::FundingNotFound),
                FundingOutcome::Mismatch => Err(PaymentError::FundingMismatch(
                    "funded by a different payer".into(),
                )),
                FundingOutcome::Unreachable => {
                    Err(PaymentError::Chain("rpc unreachable".into()))
                }
            }
        }

        async fn settle(
            &self,
            _intent: &PaymentIntent,
            _evidence: &FundingEvidence,
        ) -> Result<TxHash, PaymentError> {
            self.settle_submissions.fetch_add(1, Ordering::SeqCst);
            if self
                .settle_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PaymentError::Settlement("node unavailable".into()));
            }
            // Mirrors the contract: only the first settle per ref succeeds.
            if self.recorded.swap(true, Ordering::SeqCst) {
                return Err(PaymentError::Settlement("already settled".into()));
            }
            Ok(B256::repeat_byte(0x5e))
        }

        async fn settlement_recorded(
            &self,
            _intent: &PaymentIntent,
        ) -> Result<bool, PaymentError> {
            Ok(self.recorded.load(Ordering::SeqCst))
        }
    }

    struct StubSwap {
        executed: AtomicBool,
        submissions: AtomicUsize,
        fail: AtomicBool,
    }

    impl StubSwap {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executed: AtomicBool::new(false),
                submissions: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn submissions(&self) -> usize {
            self.submissions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SwapRouter for StubSwap {
        async fn swap(&self, _intent: &PaymentIntent) -> Result<TxHash, PaymentError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PaymentError::Swap("price outside slippage ceiling".into()));
            }
            if self.executed.swap(true, Ordering::SeqCst) {
                return Err(PaymentError::Swap("swap already executed".into()));
            }
            Ok(B256::repeat_byte(0x5a))
        }

        async fn swap_executed(&self, _intent: &PaymentIntent) -> Result<bool, PaymentError> {
            Ok(self.executed.load(Ordering::SeqCst))
        }
    }

    struct CountingNotifier {
        settled: AtomicUsize,
        failed: AtomicUsize,
    }

    impl CountingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                settled: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            })
        }
    }

    impl SettlementNotifier for CountingNotifier {
        fn settlement_finished(&self, intent: &PaymentIntent) {
            if intent.state == IntentState::Settled {
                self.settled.fetch_add(1, Ordering::SeqCst);
            } else {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn registry() -> Arc<TokenRegistry> {
        Arc::new(TokenRegistry::parse(&format!("USDC={USDC},WETH={WETH}")).unwrap())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            settle_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn orchestrator_with(
        store: Arc<SettlementStore>,
        gateway: Arc<StubGateway>,
        swap: Arc<StubSwap>,
        policy: RetryPolicy,
    ) -> Orchestrator {
        Orchestrator::new(store, gateway, swap, registry(), policy)
    }

    fn orchestrator(
        gateway: Arc<StubGateway>,
        swap: Arc<StubSwap>,
        policy: RetryPolicy,
    ) -> Orchestrator {
        let store = Arc::new(SettlementStore::open(":memory:").unwrap());
        orchestrator_with(store, gateway, swap, policy)
    }

    fn payment(token: &str, settlement_token: &str) -> NewPayment {
        NewPayment {
            payer_address: Address::repeat_byte(0x42),
            token: token.into(),
            amount: "1000000".into(),
            settlement_token: settlement_token.into(),
        }
    }

    #[test]
    fn create_validates_before_writing() {
        let orch = orchestrator(
            StubGateway::new(FundingOutcome::Funded),
            StubSwap::new(),
            fast_policy(),
        );

        let err = orch.create(&payment("DOGE", "USDC")).unwrap_err();
        assert!(matches!(err, PaymentError::UnknownToken(_)));

        let mut zero = payment("USDC", "USDC");
        zero.amount = "0".into();
        assert!(matches!(
            orch.create(&zero).unwrap_err(),
            PaymentError::Validation(_)
        ));

        let mut garbage = payment("USDC", "USDC");
        garbage.amount = "-12".into();
        assert!(matches!(
            orch.create(&garbage).unwrap_err(),
            PaymentError::Validation(_)
        ));

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        assert_eq!(intent.state, IntentState::Pending);
        assert_eq!(orch.status(&intent.id).unwrap().state, IntentState::Pending);
    }

    #[tokio::test]
    async fn confirm_settles_without_swap() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let swap = StubSwap::new();
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Settled);
        assert_eq!(status.chain_tx_hash, Some(B256::repeat_byte(0xf0)));
        assert_eq!(status.settlement_tx_hash, Some(B256::repeat_byte(0x5e)));
        assert_eq!(status.swap_tx_hash, None);
        assert_eq!(swap.submissions(), 0);
        assert_eq!(gateway.submissions(), 1);
    }

    #[tokio::test]
    async fn confirm_swaps_when_tokens_differ() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let swap = StubSwap::new();
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("WETH", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Settled);
        assert_eq!(status.swap_tx_hash, Some(B256::repeat_byte(0x5a)));
        assert_eq!(swap.submissions(), 1);
        assert_eq!(gateway.submissions(), 1);
    }

    #[tokio::test]
    async fn unfunded_intent_stays_pending_inside_window() {
        let gateway = StubGateway::new(FundingOutcome::NotFound);
        let swap = StubSwap::new();
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Pending);
        assert_eq!(gateway.submissions(), 0);

        // Funding arrives later; the next confirm picks it up.
        gateway.set_funding(FundingOutcome::Funded);
        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Settled);
    }

    #[tokio::test]
    async fn funding_window_elapsed_fails_with_timeout_reason() {
        let gateway = StubGateway::new(FundingOutcome::NotFound);
        let policy = RetryPolicy {
            funding_window: Duration::ZERO,
            ..fast_policy()
        };
        let orch = orchestrator(gateway, StubSwap::new(), policy);

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some(reason::FUNDING_TIMEOUT));
    }

    #[tokio::test]
    async fn funded_intent_settles_even_after_window() {
        // The window bounds waiting for funding, not funding that arrived.
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let policy = RetryPolicy {
            funding_window: Duration::ZERO,
            ..fast_policy()
        };
        let orch = orchestrator(gateway, StubSwap::new(), policy);

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Settled);
    }

    #[tokio::test]
    async fn funding_mismatch_is_terminal() {
        let gateway = StubGateway::new(FundingOutcome::Mismatch);
        let swap = StubSwap::new();
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Failed);
        assert_eq!(
            status.failure_reason.as_deref(),
            Some(reason::FUNDING_MISMATCH)
        );
        assert_eq!(gateway.submissions(), 0);

        // Terminal states never move again, even if funding looks right now.
        gateway.set_funding(FundingOutcome::Funded);
        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Failed);
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn transient_chain_outage_holds_at_pending() {
        let gateway = StubGateway::new(FundingOutcome::Unreachable);
        let orch = orchestrator(Arc::clone(&gateway), StubSwap::new(), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Pending);

        gateway.set_funding(FundingOutcome::Funded);
        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Settled);
    }

    #[tokio::test]
    async fn swap_failure_is_terminal_and_skips_settlement() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let swap = StubSwap::new();
        swap.fail.store(true, Ordering::SeqCst);
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("WETH", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some(reason::SWAP_FAILED));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn settlement_retries_transient_failures() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        gateway.fail_settles(2);
        let orch = orchestrator(Arc::clone(&gateway), StubSwap::new(), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Settled);
        assert_eq!(gateway.submissions(), 3);
    }

    #[tokio::test]
    async fn settlement_retry_budget_exhaustion_fails() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        gateway.fail_settles(10);
        let orch = orchestrator(Arc::clone(&gateway), StubSwap::new(), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        let status = orch.confirm(&intent.id).await.unwrap();

        assert_eq!(status.state, IntentState::Failed);
        assert_eq!(
            status.failure_reason.as_deref(),
            Some(reason::SETTLEMENT_FAILED)
        );
        assert_eq!(gateway.submissions(), 3);
    }

    #[tokio::test]
    async fn repeated_confirm_never_resubmits() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let swap = StubSwap::new();
        let orch = orchestrator(Arc::clone(&gateway), Arc::clone(&swap), fast_policy());

        let intent = orch.create(&payment("WETH", "USDC")).unwrap();
        for _ in 0..3 {
            let status = orch.confirm(&intent.id).await.unwrap();
            assert_eq!(status.state, IntentState::Settled);
        }
        assert_eq!(swap.submissions(), 1);
        assert_eq!(gateway.submissions(), 1);
    }

    #[tokio::test]
    async fn resumes_after_crash_between_swap_and_commit() {
        // Simulate a process that claimed the swap, submitted it, and died
        // before committing: state is swapping, the chain says executed.
        let store = Arc::new(SettlementStore::open(":memory:").unwrap());
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let swap = StubSwap::new();
        swap.executed.store(true, Ordering::SeqCst);
        let orch = orchestrator_with(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&swap),
            fast_policy(),
        );

        let intent = orch.create(&payment("WETH", "USDC")).unwrap();
        store
            .advance(
                &intent.id,
                IntentState::Pending,
                IntentState::Verifying,
                &StateChanges::default(),
            )
            .unwrap();
        store
            .advance(
                &intent.id,
                IntentState::Verifying,
                IntentState::Swapping,
                &StateChanges::default(),
            )
            .unwrap();

        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Settled);
        // The landed swap was observed, not redone.
        assert_eq!(swap.submissions(), 0);
    }

    #[tokio::test]
    async fn resumes_after_crash_between_settle_and_commit() {
        let store = Arc::new(SettlementStore::open(":memory:").unwrap());
        let gateway = StubGateway::new(FundingOutcome::Funded);
        gateway.recorded.store(true, Ordering::SeqCst);
        let orch = orchestrator_with(
            Arc::clone(&store),
            Arc::clone(&gateway),
            StubSwap::new(),
            fast_policy(),
        );

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        store
            .advance(
                &intent.id,
                IntentState::Pending,
                IntentState::Verifying,
                &StateChanges::default(),
            )
            .unwrap();
        store
            .advance(
                &intent.id,
                IntentState::Verifying,
                IntentState::Settling,
                &StateChanges::default(),
            )
            .unwrap();

        let status = orch.confirm(&intent.id).await.unwrap();
        assert_eq!(status.state, IntentState::Settled);
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn confirm_unknown_id_is_not_found() {
        let orch = orchestrator(
            StubGateway::new(FundingOutcome::Funded),
            StubSwap::new(),
            fast_policy(),
        );
        let err = orch.confirm(&IntentId::new()).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
        assert!(orch.intent_locks.is_empty());
    }

    #[tokio::test]
    async fn notifier_fires_once_per_terminal_transition() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let notifier = CountingNotifier::new();
        let store = Arc::new(SettlementStore::open(":memory:").unwrap());
        let orch = orchestrator_with(store, gateway, StubSwap::new(), fast_policy())
            .with_notifier(Arc::clone(&notifier) as Arc<dyn SettlementNotifier>);

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        orch.confirm(&intent.id).await.unwrap();
        orch.confirm(&intent.id).await.unwrap();

        assert_eq!(notifier.settled.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sweep_drives_unfinished_intents_to_completion() {
        let gateway = StubGateway::new(FundingOutcome::Funded);
        let orch = orchestrator(Arc::clone(&gateway), StubSwap::new(), fast_policy());

        let a = orch.create(&payment("USDC", "USDC")).unwrap();
        let b = orch.create(&payment("USDC", "USDC")).unwrap();

        orch.sweep().await;

        assert_eq!(orch.status(&a.id).unwrap().state, IntentState::Settled);
        assert_eq!(orch.status(&b.id).unwrap().state, IntentState::Settled);
    }

    #[tokio::test]
    async fn idle_locks_are_dropped() {
        let gateway = StubGateway::new(FundingOutcome::NotFound);
        let orch = orchestrator(gateway, StubSwap::new(), fast_policy());

        let intent = orch.create(&payment("USDC", "USDC")).unwrap();
        orch.confirm(&intent.id).await.unwrap();
        assert_eq!(orch.intent_locks.len(), 1);

        orch.drop_idle_locks();
        assert!(orch.intent_locks.is_empty());
    }
}
