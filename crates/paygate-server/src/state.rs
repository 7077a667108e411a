use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::providers::{
    fillers::{
        BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
    },
    Identity, RootProvider,
};
use paygate::{ChainClient, Orchestrator};

/// Concrete provider type from `ProviderBuilder::new().wallet(...).connect_http(...)`.
pub type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

/// Shared application state for the settlement server.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub chain: Arc<ChainClient<WalletProvider>>,
    /// Bearer token for the /metrics endpoint (None = public opt-in only).
    pub metrics_token: Option<Vec<u8>>,
}
