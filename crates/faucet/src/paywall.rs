//! x402 payment gate for paid endpoints
//!
//! Requests without an `X-PAYMENT` header get `402 Payment Required` with the
//! accepted payment requirements. A payment header is handed to the
//! facilitator for verification before the inner handler runs, and settled
//! through the facilitator only when the handler succeeds. Payment payloads
//! are opaque here; signature checks and settlement belong to the
//! facilitator.

use crate::config::{Network, PaywallConfig};
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header::HOST, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const X402_VERSION: u8 = 1;

/// Request header carrying the base64 payment payload
pub const X_PAYMENT: &str = "x-payment";

/// Response header carrying the base64 settlement result
pub const X_PAYMENT_RESPONSE: &str = "x-payment-response";

/// USDC on Base Sepolia
pub const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

const USDC_DECIMALS: u32 = 6;

#[derive(Error, Debug)]
pub enum PaywallError {
    #[error("X-PAYMENT header is required")]
    MissingPayment,

    #[error("Malformed X-PAYMENT header: {0}")]
    MalformedPayment(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Facilitator error: {0}")]
    Facilitator(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),
}

/// What a client must pay to access a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Atomic units of `asset`
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Service that verifies and settles payments on our behalf
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, PaywallError>;

    async fn settle(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaywallError>;
}

/// Facilitator reached over HTTP (`<base>/verify`, `<base>/settle`)
pub struct HttpFacilitator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFacilitator {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<T, PaywallError> {
        let body = json!({
            "x402Version": X402_VERSION,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| PaywallError::Facilitator(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PaywallError::Facilitator(format!("{} returned {}: {}", endpoint, status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| PaywallError::Facilitator(format!("Invalid {} response: {}", endpoint, e)))
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, PaywallError> {
        self.post("verify", payload, requirements).await
    }

    async fn settle(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaywallError> {
        self.post("settle", payload, requirements).await
    }
}

/// Price list and facilitator for gated routes
pub struct Paywall {
    network: String,
    pay_to: String,
    max_amount_required: String,
    description: String,
    max_timeout_secs: u64,
    facilitator: Arc<dyn Facilitator>,
}

impl Paywall {
    pub fn new(
        config: &PaywallConfig,
        network: &Network,
        facilitator: Arc<dyn Facilitator>,
    ) -> Result<Self, PaywallError> {
        let atomic = usd_to_atomic(&config.price_usd, USDC_DECIMALS)
            .ok_or_else(|| PaywallError::InvalidPrice(config.price_usd.clone()))?;

        Ok(Self {
            network: network.slug.to_string(),
            pay_to: config.pay_to.clone(),
            max_amount_required: atomic.to_string(),
            description: config.description.clone(),
            max_timeout_secs: config.max_timeout_secs,
            facilitator,
        })
    }

    /// Requirements advertised for `resource`
    pub fn requirements(&self, resource: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: self.network.clone(),
            max_amount_required: self.max_amount_required.clone(),
            resource: resource.to_string(),
            description: self.description.clone(),
            mime_type: "application/json".to_string(),
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_secs,
            asset: USDC_BASE_SEPOLIA.to_string(),
            extra: json!({ "name": "USDC", "version": "2" }),
        }
    }

    fn payment_required(&self, error: &PaywallError, requirements: &PaymentRequirements) -> Response {
        let body = Json(json!({
            "x402Version": X402_VERSION,
            "error": error.to_string(),
            "accepts": [requirements],
        }));
        (StatusCode::PAYMENT_REQUIRED, body).into_response()
    }

    async fn verify(
        &self,
        header: Option<&HeaderValue>,
        requirements: &PaymentRequirements,
    ) -> Result<Value, PaywallError> {
        let header = header
            .ok_or(PaywallError::MissingPayment)?
            .to_str()
            .map_err(|e| PaywallError::MalformedPayment(e.to_string()))?;
        let payload = decode_payment(header)?;

        let verdict = self.facilitator.verify(&payload, requirements).await?;
        if !verdict.is_valid {
            return Err(PaywallError::Rejected(
                verdict
                    .invalid_reason
                    .unwrap_or_else(|| "Payment verification failed".to_string()),
            ));
        }

        debug!("Payment verified for payer {:?}", verdict.payer);
        Ok(payload)
    }

    async fn settle(&self, payload: &Value, requirements: &PaymentRequirements) -> Result<String, PaywallError> {
        let settlement = self.facilitator.settle(payload, requirements).await?;
        if !settlement.success {
            return Err(PaywallError::Rejected(
                settlement
                    .error_reason
                    .unwrap_or_else(|| "Payment settlement failed".to_string()),
            ));
        }

        info!(
            "Payment settled: tx={:?} payer={:?}",
            settlement.transaction, settlement.payer
        );
        let encoded = serde_json::to_vec(&settlement)
            .map_err(|e| PaywallError::Facilitator(e.to_string()))?;
        Ok(STANDARD.encode(encoded))
    }
}

/// Middleware guarding a route with the paywall
pub async fn require_payment(
    State(paywall): State<Arc<Paywall>>,
    request: Request,
    next: Next,
) -> Response {
    let requirements = paywall.requirements(&resource_url(&request));
    let header = request.headers().get(X_PAYMENT).cloned();

    let payload = match paywall.verify(header.as_ref(), &requirements).await {
        Ok(payload) => payload,
        Err(e) => {
            if !matches!(e, PaywallError::MissingPayment) {
                warn!("Payment rejected: {}", e);
            }
            return paywall.payment_required(&e, &requirements);
        }
    };

    let mut response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    match paywall.settle(&payload, &requirements).await {
        Ok(encoded) => match HeaderValue::from_str(&encoded) {
            Ok(value) => {
                response.headers_mut().insert(X_PAYMENT_RESPONSE, value);
                response
            }
            Err(e) => paywall.payment_required(&PaywallError::Facilitator(e.to_string()), &requirements),
        },
        Err(e) => {
            warn!("Payment settlement failed: {}", e);
            paywall.payment_required(&e, &requirements)
        }
    }
}

fn resource_url(request: &Request) -> String {
    let path = request.uri().path();
    match request.headers().get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{}{}", host, path),
        None => path.to_string(),
    }
}

fn decode_payment(header: &str) -> Result<Value, PaywallError> {
    let bytes = STANDARD
        .decode(header.trim())
        .map_err(|e| PaywallError::MalformedPayment(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| PaywallError::MalformedPayment(e.to_string()))
}

/// Convert a USD price like `"0.01"` or `"$0.01"` to atomic units of a
/// stablecoin with `decimals` decimals
pub fn usd_to_atomic(price: &str, decimals: u32) -> Option<u128> {
    let price = price.trim().trim_start_matches('$');
    let (whole, fraction) = match price.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (price, ""),
    };

    if fraction.len() > decimals as usize {
        return None;
    }
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let scale = 10u128.checked_pow(decimals)?;
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: u128 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse().ok()?
    };

    whole.checked_mul(scale)?.checked_add(fraction)
}
