use std::time::{Duration, SystemTime, UNIX_EPOCH};

use paygate::{IntentState, PaymentIntent, SettlementNotifier};
use serde::Serialize;

use crate::metrics::{SETTLEMENTS, WEBHOOK_DELIVERIES};
use crate::security::compute_hmac;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub event: String,
    pub id: String,
    pub state: IntentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub timestamp: u64,
}

impl PaymentEvent {
    fn from_intent(intent: &PaymentIntent) -> Self {
        let event = match intent.state {
            IntentState::Settled => "payment.settled",
            _ => "payment.failed",
        };
        Self {
            event: event.to_string(),
            id: intent.id.to_string(),
            state: intent.state,
            settlement_tx_hash: intent.settlement_tx_hash.map(|h| format!("{h:#x}")),
            failure_reason: intent.failure_reason.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Shared HTTP client for webhook delivery. Connection pooling across
/// deliveries; the per-request timeout is set when firing.
pub fn webhook_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Validate that all webhook URLs parse and use HTTPS. Called at startup.
pub fn validate_webhook_urls(urls: &[String]) -> Result<(), url::ParseError> {
    for raw in urls {
        let parsed = url::Url::parse(raw)?;
        if parsed.scheme() != "https" {
            tracing::warn!(
                url = %raw,
                "webhook URL does not use HTTPS — payloads will be sent in cleartext"
            );
        }
    }
    Ok(())
}

/// Fire-and-forget POST to each webhook URL.
/// If `hmac_secret` is provided, includes an `X-Paygate-Signature` HMAC header.
pub fn fire_webhooks(
    client: &reqwest::Client,
    urls: &[String],
    event: PaymentEvent,
    hmac_secret: Option<&[u8]>,
) {
    let body_bytes = match serde_json::to_vec(&event) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body_bytes.clone();
        let hmac_sig = hmac_secret.map(|secret| compute_hmac(secret, &body));

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json")
                .timeout(Duration::from_secs(5));

            if let Some(ref sig) = hmac_sig {
                req = req.header("X-Paygate-Signature", sig.as_str());
            }

            let result = req.body(body).send().await;
            match result {
                Ok(resp) => {
                    WEBHOOK_DELIVERIES.with_label_values(&["delivered"]).inc();
                    tracing::debug!(url = %url, status = %resp.status(), "webhook delivered")
                }
                Err(e) => {
                    WEBHOOK_DELIVERIES.with_label_values(&["failed"]).inc();
                    tracing::warn!(url = %url, error = %e, "webhook delivery failed")
                }
            }
        });
    }
}

/// Notifier that posts terminal payment events to the configured webhooks.
///
/// Wired into the orchestrator, so events also fire for transitions driven
/// by the reconciliation sweep, not just by confirm calls.
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    secret: Option<Vec<u8>>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, secret: Option<Vec<u8>>) -> Self {
        Self {
            client: webhook_client(),
            urls,
            secret,
        }
    }
}

impl SettlementNotifier for WebhookNotifier {
    fn settlement_finished(&self, intent: &PaymentIntent) {
        SETTLEMENTS.with_label_values(&[intent.state.as_str()]).inc();
        if self.urls.is_empty() {
            return;
        }
        let event = PaymentEvent::from_intent(intent);
        fire_webhooks(&self.client, &self.urls, event, self.secret.as_deref());
    }
}
