//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Wallet address is required")]
    MissingAddress,

    #[error("Invalid wallet address format")]
    InvalidAddress,

    #[error("This address has already received funds from the faucet")]
    AlreadyClaimed,

    #[error("Faucet has insufficient balance. Please contact the administrator.")]
    FaucetDepleted,

    #[error("{0}")]
    DispatchFailure(String),

    #[error("{tx_hash} was not confirmed within {waited_ms}ms")]
    ConfirmationTimeout { tx_hash: String, waited_ms: u64 },

    #[error("{0} was reverted")]
    TransactionFailed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("Faucet not configured. Missing PRIVATE_KEY.")]
    Unconfigured,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::MissingAddress
            | FaucetError::InvalidAddress
            | FaucetError::AlreadyClaimed => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text of the `error` field in a failed claim response
    pub fn client_message(&self) -> String {
        match self {
            FaucetError::MissingAddress
            | FaucetError::InvalidAddress
            | FaucetError::AlreadyClaimed
            | FaucetError::FaucetDepleted
            | FaucetError::Unconfigured => self.to_string(),
            _ => format!("Failed to send transaction: {}", self),
        }
    }

    /// Short label used for the `outcome` metric dimension
    pub fn outcome(&self) -> &'static str {
        match self {
            FaucetError::MissingAddress => "missing_address",
            FaucetError::InvalidAddress => "invalid_address",
            FaucetError::AlreadyClaimed => "already_claimed",
            FaucetError::FaucetDepleted => "depleted",
            FaucetError::DispatchFailure(_) => "dispatch_failure",
            FaucetError::ConfirmationTimeout { .. } => "confirmation_timeout",
            FaucetError::TransactionFailed(_) => "transaction_failed",
            FaucetError::Cancelled => "cancelled",
            FaucetError::Unconfigured => "unconfigured",
            FaucetError::Rpc(_) => "rpc_error",
            FaucetError::Storage(_) => "storage_error",
            FaucetError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.client_message(),
        }));

        (self.status_code(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
