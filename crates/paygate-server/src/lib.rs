//! paygate server — HTTP surface over the settlement orchestrator.
//!
//! Accepts payment requests, confirms funding, and drives settlement
//! on-chain. Settlement logic lives in the core [`paygate`] crate; this
//! crate provides the HTTP server, configuration, metrics, and webhook
//! notifications.
//!
//! # Modules
//!
//! - [`routes`] — HTTP endpoints (payments, confirm, status, health, metrics)
//! - [`config`] — Environment-driven [`ServerConfig`](config::ServerConfig)
//! - [`bootstrap`] — Wires signer, provider, store, and orchestrator together
//! - [`webhook`] — Terminal payment notifications with HMAC signatures
//! - [`metrics`] — Prometheus metrics for payment operations

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod security;
pub mod state;
pub mod webhook;
