//! Faucet service core logic

use crate::address::RecipientAddress;
use crate::chain::{ChainClient, TxReceipt};
use crate::config::{FaucetConfig, Network, DISBURSEMENT_WEI, NETWORK, REQUIRED_CONFIRMATIONS};
use crate::error::{FaucetError, FaucetResult};
use crate::metrics::FaucetMetrics;
use crate::registry::{ClaimRecord, ClaimRegistry};
use crate::units::format_ether;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Stages a claim passes through; a failure at any stage is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    Validating,
    CheckingEligibility,
    CheckingBalance,
    Dispatching,
    Confirming,
    Recorded,
}

fn enter(stage: ClaimStage) {
    debug!(?stage, "Claim stage");
}

/// Disbursement parameters
#[derive(Debug, Clone)]
pub struct ClaimSettings {
    /// Wei sent per claim
    pub amount_wei: u128,
    /// Confirmations to wait for
    pub confirmations: u64,
    /// Upper bound on the confirmation wait
    pub confirmation_timeout: Duration,
    /// Receipt polling interval
    pub poll_interval: Duration,
    /// Network transfers are sent on
    pub network: Network,
}

impl ClaimSettings {
    pub fn from_config(config: &FaucetConfig) -> Self {
        Self {
            confirmation_timeout: config.confirmation_timeout(),
            poll_interval: config.poll_interval(),
            ..Self::default()
        }
    }
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            amount_wei: DISBURSEMENT_WEI,
            confirmations: REQUIRED_CONFIRMATIONS,
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            network: NETWORK,
        }
    }
}

/// Confirmed disbursement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub transaction_hash: String,
    /// Amount in ether, e.g. "0.01"
    pub amount: String,
    /// Address as submitted
    pub recipient: String,
    pub explorer_url: String,
}

/// Faucet health readout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetHealth {
    pub status: String,
    pub faucet_address: String,
    /// Balance in ether
    pub balance: String,
    pub network: String,
    pub funded_addresses: usize,
}

/// Faucet service
pub struct FaucetService {
    /// `None` when no funding credential was configured
    chain: Option<Arc<dyn ChainClient>>,
    registry: Arc<dyn ClaimRegistry>,
    settings: ClaimSettings,
    metrics: FaucetMetrics,
    shutdown: watch::Receiver<bool>,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        chain: Option<Arc<dyn ChainClient>>,
        registry: Arc<dyn ClaimRegistry>,
        settings: ClaimSettings,
    ) -> FaucetResult<Self> {
        let metrics = FaucetMetrics::new()
            .map_err(|e| FaucetError::Internal(format!("Failed to create metrics: {}", e)))?;

        if chain.is_none() {
            error!("Faucet not configured: no PRIVATE_KEY, every claim will be rejected");
        }

        // Sender dropped: never cancels unless `with_shutdown` is used.
        let (_, shutdown) = watch::channel(false);

        Ok(Self {
            chain,
            registry,
            settings,
            metrics,
            shutdown,
        })
    }

    /// Cancel in-flight confirmation waits once `shutdown` turns `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    pub fn network(&self) -> &Network {
        &self.settings.network
    }

    /// Dispense the fixed amount to `wallet_address`, at most once per address
    pub async fn claim(&self, wallet_address: &str) -> FaucetResult<ClaimResult> {
        self.claim_with(
            wallet_address,
            self.settings.confirmation_timeout,
            self.shutdown.clone(),
        )
        .await
    }

    /// [`claim`](Self::claim) with an explicit confirmation timeout and
    /// cancellation signal
    pub async fn claim_with(
        &self,
        wallet_address: &str,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> FaucetResult<ClaimResult> {
        let span = info_span!("claim", address = %wallet_address.to_ascii_lowercase());
        let started = Instant::now();

        let result = self
            .run_claim(wallet_address, timeout, cancel)
            .instrument(span)
            .await;

        match &result {
            Ok(claim) => {
                let funded = self.registry.claimed_count().await.unwrap_or_default();
                self.metrics
                    .record_success(self.settings.amount_wei, started.elapsed(), funded);
                info!(
                    "Sent {} ETH to {} - TX: {}",
                    claim.amount, claim.recipient, claim.transaction_hash
                );
            }
            Err(e) => {
                self.metrics.record_failure(e.outcome());
                match e {
                    FaucetError::MissingAddress
                    | FaucetError::InvalidAddress
                    | FaucetError::AlreadyClaimed => debug!("Claim rejected: {}", e),
                    _ => warn!("Claim failed: {}", e),
                }
            }
        }

        result
    }

    async fn run_claim(
        &self,
        wallet_address: &str,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> FaucetResult<ClaimResult> {
        enter(ClaimStage::Validating);
        let chain = self.chain.as_ref().ok_or(FaucetError::Unconfigured)?;
        let recipient = RecipientAddress::parse(wallet_address)?;
        let key = recipient.normalized();

        enter(ClaimStage::CheckingEligibility);
        if !self.registry.reserve(&key).await? {
            return Err(FaucetError::AlreadyClaimed);
        }

        match self.disburse(chain.as_ref(), &recipient, &key, timeout, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Err(release_err) = self.registry.release(&key).await {
                    error!("Failed to release reservation for {}: {}", key, release_err);
                }
                Err(e)
            }
        }
    }

    /// Everything after the reservation. Any error here releases the slot.
    async fn disburse(
        &self,
        chain: &dyn ChainClient,
        recipient: &RecipientAddress,
        key: &str,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> FaucetResult<ClaimResult> {
        enter(ClaimStage::CheckingBalance);
        let balance = chain.balance().await?;
        if balance < self.settings.amount_wei {
            warn!("Faucet balance low: {} wei", balance);
            return Err(FaucetError::FaucetDepleted);
        }

        enter(ClaimStage::Dispatching);
        let tx_hash = chain
            .send_transfer(recipient, self.settings.amount_wei)
            .await
            .map_err(|e| match e {
                FaucetError::Rpc(msg) => FaucetError::DispatchFailure(msg),
                other => other,
            })?;

        enter(ClaimStage::Confirming);
        let receipt = match self.wait_for_confirmation(chain, &tx_hash, timeout, cancel).await {
            Ok(receipt) => receipt,
            Err(e) => {
                // An unconfirmed transfer may have left the pool; later
                // transfers must not build on its nonce.
                if matches!(e, FaucetError::ConfirmationTimeout { .. } | FaucetError::Cancelled) {
                    chain.resync_nonce().await;
                }
                return Err(e);
            }
        };
        debug!("Transaction {} confirmed in block {}", tx_hash, receipt.block_number);

        let record = ClaimRecord::new(key.to_string(), self.settings.amount_wei, tx_hash.clone());
        if let Err(e) = self.registry.commit(record).await {
            error!("Transfer {} confirmed but claim was not recorded: {}", tx_hash, e);
            return Err(e);
        }
        enter(ClaimStage::Recorded);

        Ok(ClaimResult {
            explorer_url: self.settings.network.explorer_tx_url(&tx_hash),
            transaction_hash: tx_hash,
            amount: format_ether(self.settings.amount_wei),
            recipient: recipient.as_str().to_string(),
        })
    }

    /// Poll for the receipt until it has the required confirmations, the
    /// timeout elapses, or `cancel` fires. Transient RPC errors keep polling.
    async fn wait_for_confirmation(
        &self,
        chain: &dyn ChainClient,
        tx_hash: &str,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> FaucetResult<TxReceipt> {
        let required = self.settings.confirmations.max(1);
        let poll_interval = self.settings.poll_interval;

        let poll = async {
            loop {
                match confirmed_receipt(chain, tx_hash, required).await {
                    Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                    Ok(Some(_)) => return Err(FaucetError::TransactionFailed(tx_hash.to_string())),
                    Ok(None) => {}
                    Err(FaucetError::Rpc(msg)) => warn!("Receipt poll for {} failed: {}", tx_hash, msg),
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, poll) => match result {
                Ok(receipt) => receipt,
                Err(_) => Err(FaucetError::ConfirmationTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            _ = cancelled(cancel) => Err(FaucetError::Cancelled),
        }
    }

    /// Service status, funding address, balance, and number of funded addresses
    pub async fn health(&self) -> FaucetResult<FaucetHealth> {
        let chain = self.chain.as_ref().ok_or(FaucetError::Unconfigured)?;

        let balance = chain.balance().await?;
        let funded_addresses = self.registry.claimed_count().await?;
        self.metrics.funded_addresses.set(funded_addresses as i64);

        Ok(FaucetHealth {
            status: "healthy".to_string(),
            faucet_address: chain.faucet_address().to_string(),
            balance: format_ether(balance),
            network: self.settings.network.name.to_string(),
            funded_addresses,
        })
    }
}

/// Receipt once it is included with `required` confirmations. Reverted
/// receipts are returned as soon as they are seen.
async fn confirmed_receipt(
    chain: &dyn ChainClient,
    tx_hash: &str,
    required: u64,
) -> FaucetResult<Option<TxReceipt>> {
    let receipt = match chain.receipt(tx_hash).await? {
        Some(receipt) => receipt,
        None => return Ok(None),
    };

    if !receipt.success {
        return Ok(Some(receipt));
    }

    let head = chain.block_number().await?;
    let confirmations = head.saturating_sub(receipt.block_number) + 1;
    if confirmations >= required {
        Ok(Some(receipt))
    } else {
        Ok(None)
    }
}

/// Resolves once the signal reads `true`; never if its sender is gone first
async fn cancelled(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
