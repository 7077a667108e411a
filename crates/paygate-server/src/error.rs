use std::fmt;

use actix_web::{HttpResponse, ResponseError};
use paygate::PaymentError;

/// Route-level wrapper mapping engine errors onto HTTP responses.
///
/// Client mistakes carry their message through; chain and store failures
/// are logged server-side and surface only a generic reason code.
#[derive(Debug)]
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        Self(e)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match &self.0 {
            PaymentError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid_request",
                "message": msg
            })),
            PaymentError::UnknownToken(symbol) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "unknown_token",
                    "message": format!("Token '{}' is not accepted", symbol)
                }))
            }
            PaymentError::NotFound(id) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "payment_not_found",
                "message": format!("Payment '{}' not found", id)
            })),
            PaymentError::Overloaded => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "overloaded",
                    "message": "Too many payments in flight, retry shortly"
                }))
            }
            PaymentError::Chain(msg) => {
                tracing::error!("Chain error: {}", msg);
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": "chain_unreachable",
                    "message": "Failed to reach the RPC node"
                }))
            }
            other => {
                tracing::error!("Internal error: {}", other);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
