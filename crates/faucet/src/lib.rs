//! Testnet faucet for the x402 demo client
//!
//! Dispenses a fixed amount of Base Sepolia ETH once per address and serves
//! the x402 payment-gated demo endpoint:
//! - Atomic one-claim-per-address registry (in memory or sled)
//! - Serialized, nonce-managed transfer submission
//! - Bounded, cancellable confirmation wait
//! - Prometheus metrics

pub mod address;
pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod paywall;
pub mod registry;
pub mod service;
pub mod units;

pub use address::RecipientAddress;
pub use chain::{ChainClient, JsonRpcChainClient, TxReceipt};
pub use config::{FaucetConfig, PaywallConfig, SignerConfig};
pub use error::{FaucetError, FaucetResult};
pub use paywall::{Facilitator, HttpFacilitator, Paywall};
pub use registry::{ClaimRecord, ClaimRegistry, MemoryClaimRegistry, SledClaimRegistry};
pub use service::{ClaimResult, ClaimSettings, ClaimStage, FaucetHealth, FaucetService};
