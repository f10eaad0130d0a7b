//! HTTP API for faucet service

use crate::error::FaucetError;
use crate::paywall::{require_payment, Paywall};
use crate::service::{ClaimResult, FaucetService};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Claim request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    /// Any JSON value; only strings can be valid addresses
    pub wallet_address: Option<Value>,
}

impl ClaimRequest {
    /// Address text handed to the service. Absent and falsy values read as
    /// empty; other non-strings keep their JSON text and fail validation.
    pub fn wallet_address(self) -> String {
        match self.wallet_address {
            Some(Value::String(address)) => address,
            None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Successful claim response
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub result: ClaimResult,
}

/// All routes: faucet, health, metrics and the paid demo endpoint
pub fn router(service: Arc<FaucetService>, paywall: Arc<Paywall>) -> Router {
    let paid = Router::new()
        .route("/api/pay", post(pay_handler))
        .layer(middleware::from_fn_with_state(paywall, require_payment));

    Router::new()
        .route("/", get(root_handler))
        .route("/claim", post(claim_handler))
        .route("/health", get(health_handler))
        .route("/api/faucet", post(claim_handler).get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service)
        .merge(paid)
        .layer(TraceLayer::new_for_http())
}

/// Claim handler
pub async fn claim_handler(
    State(service): State<Arc<FaucetService>>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    // An unreadable body is treated like a missing address.
    let wallet_address = match payload {
        Ok(Json(request)) => request.wallet_address(),
        Err(rejection) => {
            debug!("Unreadable claim body: {}", rejection);
            String::new()
        }
    };

    match service.claim(&wallet_address).await {
        Ok(result) => Json(ClaimResponse {
            success: true,
            message: format!("Successfully sent {} ETH to your wallet", result.amount),
            result,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Health check handler
pub async fn health_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.health().await {
        Ok(health) => Json(health).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            let message = match e {
                FaucetError::Unconfigured => "Faucet not configured".to_string(),
                other => other.to_string(),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "error": message,
                })),
            )
                .into_response()
        }
    }
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> Response {
    match service.metrics().gather() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Paid demo endpoint, only reachable through the paywall
pub async fn pay_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Hello from the x402 demo API!",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "x402 Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Testnet faucet and x402 payment-gated demo API",
        "endpoints": {
            "POST /claim": "Claim testnet ETH once per address",
            "GET /health": "Faucet health and balance",
            "POST /api/pay": "x402 payment-gated demo endpoint",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
