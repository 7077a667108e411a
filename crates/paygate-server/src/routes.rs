use actix_web::{get, post, web, HttpRequest, HttpResponse};
use paygate::{IntentId, IntentState, NewPayment, PaymentError};

use crate::error::ApiError;
use crate::metrics;
use crate::security::constant_time_eq;
use crate::state::AppState;

fn parse_intent_id(raw: &str) -> Result<IntentId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::from(PaymentError::Validation(
            "payment id must be a UUID".to_string(),
        ))
    })
}

#[post("/payments")]
pub async fn create_payment(
    state: web::Data<AppState>,
    body: web::Json<NewPayment>,
) -> Result<HttpResponse, ApiError> {
    let intent = state.orchestrator.create(&body)?;
    metrics::PAYMENTS_CREATED.inc();
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": intent.id })))
}

/// Drive a payment toward settlement. Safe to call repeatedly: each call
/// advances from whatever state the payment is in, and terminal payments
/// just report their state.
#[post("/payments/{id}/confirm")]
pub async fn confirm_payment(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_intent_id(&path)?;
    let start = std::time::Instant::now();

    match state.orchestrator.confirm(&id).await {
        Ok(status) => {
            let elapsed = start.elapsed().as_secs_f64();
            let result = match status.state {
                IntentState::Settled => "settled",
                IntentState::Failed => "failed",
                _ => "in-progress",
            };
            metrics::CONFIRM_REQUESTS.with_label_values(&[result]).inc();
            metrics::CONFIRM_LATENCY
                .with_label_values(&[result])
                .observe(elapsed);

            match status.state {
                IntentState::Settled => tracing::info!(
                    id = %id,
                    tx = ?status.settlement_tx_hash,
                    "payment settled"
                ),
                IntentState::Failed => tracing::warn!(
                    id = %id,
                    reason = status.failure_reason.as_deref().unwrap_or("unknown"),
                    "payment failed"
                ),
                _ => {}
            }
            Ok(HttpResponse::Ok().json(status))
        }
        Err(e) => {
            let elapsed = start.elapsed().as_secs_f64();
            metrics::CONFIRM_REQUESTS.with_label_values(&["error"]).inc();
            metrics::CONFIRM_LATENCY
                .with_label_values(&["error"])
                .observe(elapsed);
            Err(ApiError::from(e))
        }
    }
}

#[get("/payments/{id}")]
pub async fn payment_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_intent_id(&path)?;
    let status = state.orchestrator.status(&id)?;
    Ok(HttpResponse::Ok().json(status))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.chain.latest_block().await {
        Ok(block) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "paygate-server",
            "latestBlock": block.to_string(),
        })),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "degraded",
            "service": "paygate-server",
            "error": "RPC unreachable",
        })),
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            // No token configured: metrics stay protected unless
            // PAYGATE_PUBLIC_METRICS=true explicitly opts in.
            let public_metrics = std::env::var("PAYGATE_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if !public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or PAYGATE_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}
