//! Faucet configuration

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Target chain of the faucet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    /// Human-facing network name
    pub name: &'static str,
    /// x402 network identifier
    pub slug: &'static str,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Public RPC endpoint used when none is configured
    pub default_rpc_url: &'static str,
    /// Block explorer base URL
    pub explorer_url: &'static str,
}

impl Network {
    /// Explorer page for a transaction
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, tx_hash)
    }
}

/// Base Sepolia testnet
pub const BASE_SEPOLIA: Network = Network {
    name: "Base Sepolia",
    slug: "base-sepolia",
    chain_id: 84532,
    default_rpc_url: "https://sepolia.base.org",
    explorer_url: "https://sepolia.basescan.org",
};

/// Network the faucet disburses on
pub const NETWORK: Network = BASE_SEPOLIA;

/// Fixed disbursement per claim: 0.01 ETH
pub const DISBURSEMENT_WEI: u128 = 10_000_000_000_000_000;

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Confirmations required before a claim is recorded
pub const REQUIRED_CONFIRMATIONS: u64 = 1;

/// Funding credential of the faucet
#[derive(Clone, Default)]
pub enum SignerConfig {
    /// Hex-encoded secp256k1 private key, `0x` prefix optional
    Configured(String),
    /// No credential at startup: every claim fails until one is supplied
    #[default]
    Unconfigured,
}

impl SignerConfig {
    fn from_optional(key: Option<String>) -> Self {
        match key {
            Some(key) if !key.trim().is_empty() => SignerConfig::Configured(key.trim().to_string()),
            _ => SignerConfig::Unconfigured,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, SignerConfig::Configured(_))
    }
}

// Never print the key itself.
impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerConfig::Configured(_) => f.write_str("Configured(<redacted>)"),
            SignerConfig::Unconfigured => f.write_str("Unconfigured"),
        }
    }
}

/// x402 payment gate configuration for `/api/pay`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaywallConfig {
    /// Address receiving payments
    pub pay_to: String,

    /// Price per request in USD, e.g. "0.01"
    pub price_usd: String,

    /// Facilitator base URL (`/verify` and `/settle` are appended)
    pub facilitator_url: String,

    /// Resource description advertised in payment requirements
    pub description: String,

    /// Seconds a signed payment stays valid
    pub max_timeout_secs: u64,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self {
            pay_to: "0xd5148b96d3f6f3234721c72ec8a57a4b07a45ca7".to_string(),
            price_usd: "0.01".to_string(),
            facilitator_url: "https://x402.org/facilitator".to_string(),
            description: "Access to protected content".to_string(),
            max_timeout_secs: 60,
        }
    }
}

/// Faucet service configuration
#[derive(Debug, Clone)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// RPC endpoint for blockchain
    pub rpc_url: String,

    /// Funding account credential
    pub signer: SignerConfig,

    /// Claim registry path; `None` keeps claims in memory only
    pub db_path: Option<PathBuf>,

    /// Upper bound on waiting for a confirmation (seconds)
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Timeout of a single RPC request (seconds)
    pub rpc_timeout_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Payment gate for the demo API
    pub paywall: PaywallConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: NETWORK.default_rpc_url.to_string(),
            signer: SignerConfig::Unconfigured,
            db_path: None,
            confirmation_timeout_secs: 60,
            poll_interval_ms: 1000,
            rpc_timeout_secs: 30,
            cors_enabled: true,
            paywall: PaywallConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.signer =
            SignerConfig::from_optional(lookup("PRIVATE_KEY").or_else(|| lookup("FAUCET_PRIVATE_KEY")));

        if let Some(rpc_url) = lookup("RPC_URL") {
            config.rpc_url = rpc_url;
        }

        if let Some(addr) = lookup("FAUCET_SERVER_ADDR") {
            config.server_addr = addr;
        }

        if let Some(db_path) = lookup("FAUCET_DB_PATH") {
            config.db_path = Some(PathBuf::from(db_path));
        }

        if let Some(timeout) = lookup("FAUCET_CONFIRMATION_TIMEOUT").and_then(|v| parse_positive(&v)) {
            config.confirmation_timeout_secs = timeout;
        }

        if let Some(interval) = lookup("FAUCET_POLL_INTERVAL_MS").and_then(|v| parse_positive(&v)) {
            config.poll_interval_ms = interval;
        }

        if let Some(enabled) = lookup("FAUCET_CORS_ENABLED") {
            config.cors_enabled = enabled.to_lowercase() == "true";
        }

        if let Some(pay_to) = lookup("X402_PAY_TO") {
            config.paywall.pay_to = pay_to;
        }

        if let Some(url) = lookup("X402_FACILITATOR_URL") {
            config.paywall.facilitator_url = url;
        }

        if let Some(price) = lookup("X402_PRICE_USD") {
            config.paywall.price_usd = price;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    /// Replace the funding credential (CLI override)
    pub fn set_private_key(&mut self, key: String) {
        self.signer = SignerConfig::from_optional(Some(key));
    }

    /// Get confirmation timeout
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Get receipt poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get RPC request timeout
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Zero or unparsable durations keep the default
fn parse_positive(value: &str) -> Option<u64> {
    value.trim().parse().ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_unconfigured() {
        let config = FaucetConfig::from_lookup(lookup_from(&[]));
        assert!(!config.signer.is_configured());
        assert_eq!(config.rpc_url, "https://sepolia.base.org");
        assert!(config.db_path.is_none());
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = FaucetConfig::from_lookup(lookup_from(&[
            ("PRIVATE_KEY", "0x01"),
            ("RPC_URL", "http://localhost:8545"),
            ("FAUCET_DB_PATH", "/tmp/claims"),
            ("FAUCET_CONFIRMATION_TIMEOUT", "5"),
            ("FAUCET_CORS_ENABLED", "false"),
            ("X402_PAY_TO", "0x0000000000000000000000000000000000000001"),
        ]));
        assert!(config.signer.is_configured());
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/claims")));
        assert_eq!(config.confirmation_timeout_secs, 5);
        assert!(!config.cors_enabled);
        assert_eq!(config.paywall.pay_to, "0x0000000000000000000000000000000000000001");
    }

    #[test]
    fn test_zero_durations_keep_defaults() {
        let config = FaucetConfig::from_lookup(lookup_from(&[
            ("FAUCET_CONFIRMATION_TIMEOUT", "0"),
            ("FAUCET_POLL_INTERVAL_MS", "0"),
        ]));
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));

        let config = FaucetConfig::from_lookup(lookup_from(&[
            ("FAUCET_CONFIRMATION_TIMEOUT", "abc"),
            ("FAUCET_POLL_INTERVAL_MS", "250"),
        ]));
        assert_eq!(config.confirmation_timeout_secs, 60);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_blank_key_is_unconfigured() {
        let config = FaucetConfig::from_lookup(lookup_from(&[("PRIVATE_KEY", "  ")]));
        assert!(!config.signer.is_configured());
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = SignerConfig::Configured("0xdeadbeef".to_string());
        assert_eq!(format!("{:?}", signer), "Configured(<redacted>)");
    }

    #[test]
    fn test_explorer_url() {
        assert_eq!(
            NETWORK.explorer_tx_url("0xabc"),
            "https://sepolia.basescan.org/tx/0xabc"
        );
    }
}
