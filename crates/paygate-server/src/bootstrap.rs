//! Wire the configured components into shared application state.

use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use paygate::{
    AutoSwapRouter, ChainClient, OnchainGateway, OperatorSigner, Orchestrator, PaymentError,
    SettlementStore,
};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::webhook::{self, WebhookNotifier};

/// Build the shared [`AppState`] from configuration.
///
/// Parses the operator key into an in-memory signer, connects the wallet
/// provider, opens the SQLite intent store, and assembles the orchestrator
/// with the webhook notifier. The raw key is consumed here and exists only
/// inside the provider's wallet afterwards.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>, PaymentError> {
    let signer = OperatorSigner::from_hex(&config.operator_key)?;
    let operator_address = signer.address();
    tracing::info!("Operator address: {operator_address}");

    if !config.webhook_urls.is_empty() {
        tracing::info!("Webhook URLs configured: {}", config.webhook_urls.len());
        webhook::validate_webhook_urls(&config.webhook_urls)
            .map_err(|e| PaymentError::Validation(format!("invalid webhook URL: {e}")))?;
    }

    let rpc_url = config
        .chain
        .rpc_url
        .parse()
        .map_err(|_| PaymentError::Chain("invalid RPC URL".to_string()))?;
    let provider = ProviderBuilder::new()
        .wallet(signer.into_wallet())
        .connect_http(rpc_url);

    let chain = Arc::new(ChainClient::new(
        provider,
        config.chain.finality_confirmations,
    ));
    tracing::info!(
        "Chain {} via {} ({} confirmations to finality)",
        config.chain.chain_id,
        config.chain.rpc_url,
        config.chain.finality_confirmations
    );

    let store = Arc::new(SettlementStore::open(&config.db_path)?);
    tracing::info!("Intent store: SQLite at {}", config.db_path);

    let registry = Arc::new(config.tokens.clone());
    tracing::info!("Accepted tokens: {}", registry.symbols().join(", "));

    let gateway = Arc::new(OnchainGateway::new(
        Arc::clone(&chain),
        config.chain.gateway_address,
        Arc::clone(&registry),
        config.retry.clone(),
    ));
    let swap = Arc::new(AutoSwapRouter::new(
        Arc::clone(&chain),
        config.chain.swap_router_address,
        Arc::clone(&registry),
        config.chain.max_slippage_bps,
        config.retry.clone(),
    ));
    let notifier = Arc::new(WebhookNotifier::new(
        config.webhook_urls.clone(),
        config.webhook_secret.clone(),
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(store, gateway, swap, registry, config.retry.clone())
            .with_notifier(notifier),
    );

    Ok(Arc::new(AppState {
        orchestrator,
        chain,
        metrics_token: config
            .metrics_token
            .as_ref()
            .map(|t| t.as_bytes().to_vec()),
    }))
}
