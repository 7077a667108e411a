use std::env;
use std::time::Duration;

use alloy::primitives::Address;
use paygate::{ChainSettings, RetryPolicy, TokenRegistry};
use url::Url;

const DEFAULT_PORT: u16 = 4080;
const DEFAULT_DB_PATH: &str = "./paygate.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
const DEFAULT_FINALITY_CONFIRMATIONS: u64 = 3;
const DEFAULT_MAX_SLIPPAGE_BPS: u64 = 50;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,
    /// SQLite database path
    pub db_path: String,
    /// Operator private key (hex). Parsed into a signer at startup and
    /// never persisted or logged.
    pub operator_key: String,
    /// Chain endpoints and contract addresses
    pub chain: ChainSettings,
    /// Tokens accepted for funding and settlement
    pub tokens: TokenRegistry,
    /// Deadlines and retry budgets for confirmation work
    pub retry: RetryPolicy,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Webhook URLs for terminal payment notifications
    pub webhook_urls: Vec<String>,
    /// HMAC secret for signing webhook payloads (None = unsigned)
    pub webhook_secret: Option<Vec<u8>>,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
    /// How often the reconciliation sweep re-drives unfinished intents
    pub sweep_interval: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("operator_key", &"[REDACTED]")
            .field("chain", &self.chain)
            .field("tokens", &self.tokens)
            .field("retry", &self.retry)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("webhook_urls", &self.webhook_urls)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Required: operator signing key
        let operator_key = env::var("OPERATOR_PRIVATE_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingRequired("OPERATOR_PRIVATE_KEY"))?;

        // Required: RPC endpoint
        let rpc_url = env::var("RPC_URL").map_err(|_| ConfigError::MissingRequired("RPC_URL"))?;
        Url::parse(&rpc_url).map_err(|_| ConfigError::InvalidUrl(rpc_url.clone()))?;

        // Required: chain id
        let chain_id_str =
            env::var("CHAIN_ID").map_err(|_| ConfigError::MissingRequired("CHAIN_ID"))?;
        let chain_id: u64 = chain_id_str
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("CHAIN_ID"))?;

        // Required: contract addresses
        let gateway_address = parse_address("GATEWAY_ADDRESS")?;
        let swap_router_address = parse_address("SWAP_ROUTER_ADDRESS")?;

        // Required: accepted tokens, "SYM=0xaddr,SYM=0xaddr"
        let registry_str = env::var("TOKEN_REGISTRY")
            .map_err(|_| ConfigError::MissingRequired("TOKEN_REGISTRY"))?;
        let tokens = TokenRegistry::parse(&registry_str)
            .map_err(|e| ConfigError::InvalidRegistry(e.to_string()))?;

        // Optional: database path
        let db_path = env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        // Optional: port
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        // Optional: finality depth and slippage ceiling
        let finality_confirmations = env::var("FINALITY_CONFIRMATIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FINALITY_CONFIRMATIONS);
        let max_slippage_bps = env::var("MAX_SLIPPAGE_BPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_SLIPPAGE_BPS);

        // Optional: retry policy overrides
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            funding_window: env_duration_secs("FUNDING_WINDOW_SECS", defaults.funding_window),
            settle_max_attempts: env::var("SETTLE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.settle_max_attempts),
            settle_backoff: env::var("SETTLE_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_backoff),
            finality_timeout: env_duration_secs("FINALITY_TIMEOUT_SECS", defaults.finality_timeout),
            ..defaults
        };

        // Optional: allowed origins
        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| parse_list(&s))
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        // Optional: rate limit
        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        // Optional: webhook targets and signing secret
        let webhook_urls: Vec<String> = env::var("WEBHOOK_URLS")
            .map(|s| parse_list(&s))
            .unwrap_or_default();
        let webhook_secret = env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes());

        // Optional: metrics token
        let metrics_token = env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty());

        // Optional: sweep interval
        let sweep_interval = env_duration_secs(
            "SWEEP_INTERVAL_SECS",
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        if let Some(ref secret) = webhook_secret {
            if secret.len() < 32 {
                tracing::warn!(
                    "WEBHOOK_SECRET is too short ({} bytes, minimum 32) — \
                     use `openssl rand -hex 32` to generate a secure secret",
                    secret.len()
                );
            }
        } else if !webhook_urls.is_empty() {
            tracing::warn!(
                "WEBHOOK_SECRET not set — webhook payloads will be sent unsigned"
            );
        }

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set — /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            port,
            db_path,
            operator_key,
            chain: ChainSettings {
                chain_id,
                rpc_url,
                gateway_address,
                swap_router_address,
                finality_confirmations,
                max_slippage_bps,
            },
            tokens,
            retry,
            allowed_origins,
            rate_limit_rpm,
            webhook_urls,
            webhook_secret,
            metrics_token,
            sweep_interval,
        })
    }
}

fn parse_address(var: &'static str) -> Result<Address, ConfigError> {
    let raw = env::var(var).map_err(|_| ConfigError::MissingRequired(var))?;
    raw.parse()
        .map_err(|_| ConfigError::InvalidAddress(format!("{var}={raw}")))
}

fn env_duration_secs(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),

    #[error("invalid token registry: {0}")]
    InvalidRegistry(String),
}
