//! Payment settlement orchestration for on-chain commerce.
//!
//! A payer funds a custodial gateway contract; this crate verifies that
//! funding, converts the token when the merchant wants a different one,
//! and releases settlement, tracking each payment as a durable intent:
//!
//! `pending -> verifying -> [swapping ->] settling -> settled | failed`
//!
//! # Pieces
//!
//! - [`Orchestrator`] — drives intents through the lifecycle
//! - [`SettlementStore`] — SQLite persistence with compare-and-swap transitions
//! - [`GatewayAdapter`] / [`OnchainGateway`] — funding verification and settlement
//! - [`SwapRouter`] / [`AutoSwapRouter`] — token conversion
//! - [`ChainClient`] — transaction status and finality tracking
//! - [`OperatorSigner`] — the operator key, parsed once, never persisted
//!
//! # Wiring it up
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alloy::providers::ProviderBuilder;
//! use paygate::{
//!     AutoSwapRouter, ChainClient, OnchainGateway, OperatorSigner, Orchestrator,
//!     RetryPolicy, SettlementStore, TokenRegistry,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let signer = OperatorSigner::from_hex("0xYOUR_KEY").unwrap();
//! let provider = ProviderBuilder::new()
//!     .wallet(signer.into_wallet())
//!     .connect_http("http://localhost:8545".parse().unwrap());
//!
//! let chain = Arc::new(ChainClient::new(provider, 3));
//! let registry = Arc::new(
//!     TokenRegistry::parse("USDC=0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238").unwrap(),
//! );
//! let store = Arc::new(SettlementStore::open("./paygate.db").unwrap());
//! let policy = RetryPolicy::default();
//!
//! let gateway = Arc::new(OnchainGateway::new(
//!     Arc::clone(&chain),
//!     "0xGATEWAY".parse().unwrap(),
//!     Arc::clone(&registry),
//!     policy.clone(),
//! ));
//! let swap = Arc::new(AutoSwapRouter::new(
//!     Arc::clone(&chain),
//!     "0xROUTER".parse().unwrap(),
//!     Arc::clone(&registry),
//!     50,
//!     policy.clone(),
//! ));
//!
//! let orchestrator = Arc::new(Orchestrator::new(store, gateway, swap, registry, policy));
//! let intent = orchestrator
//!     .create(&paygate::NewPayment {
//!         payer_address: "0xPAYER".parse().unwrap(),
//!         token: "USDC".into(),
//!         amount: "1000000".into(),
//!         settlement_token: "USDC".into(),
//!     })
//!     .unwrap();
//! let status = orchestrator.confirm(&intent.id).await.unwrap();
//! println!("{}: {}", intent.id, status.state);
//! # }
//! ```

// Core model and persistence
pub mod config;
pub mod error;
pub mod intent;
pub mod registry;
pub mod store;

// Chain access and adapters
pub mod chain;
pub mod gateway;
pub mod signer;
pub mod swap;

// Lifecycle driver
pub mod orchestrator;

// Re-exports
pub use chain::{ChainClient, TxStatus};
pub use config::{ChainSettings, RetryPolicy};
pub use error::PaymentError;
pub use gateway::{FundingEvidence, GatewayAdapter, OnchainGateway};
pub use intent::{IntentId, IntentState, NewPayment, PaymentIntent, PaymentStatus};
pub use orchestrator::{NoopNotifier, Orchestrator, SettlementNotifier};
pub use registry::TokenRegistry;
pub use signer::OperatorSigner;
pub use store::{SettlementStore, StateChanges};
pub use swap::{AutoSwapRouter, SwapRouter};
