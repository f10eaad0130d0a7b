#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use x402_faucet::paywall::{PaymentRequirements, PaywallError, SettleResponse, VerifyResponse};
use x402_faucet::{
    ChainClient, ClaimRegistry, ClaimSettings, Facilitator, FaucetError, FaucetResult,
    FaucetService, RecipientAddress, TxReceipt,
};

pub const FAUCET_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
pub const ONE_ETH: u128 = 1_000_000_000_000_000_000;
pub const DISBURSEMENT: u128 = 10_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Confirm,
    Revert,
    NeverMined,
}

/// In-process chain: balances move on send, receipts follow `behavior`
pub struct MockChain {
    balance: Mutex<u128>,
    transfers: Mutex<Vec<(String, u128)>>,
    receipts: Mutex<HashMap<String, u64>>,
    head: AtomicU64,
    fail_sends: AtomicBool,
    resyncs: AtomicUsize,
    behavior: ReceiptBehavior,
    send_delay: Duration,
}

impl MockChain {
    pub fn new(balance: u128) -> Self {
        Self {
            balance: Mutex::new(balance),
            transfers: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            head: AtomicU64::new(100),
            fail_sends: AtomicBool::new(false),
            resyncs: AtomicUsize::new(0),
            behavior: ReceiptBehavior::Confirm,
            send_delay: Duration::ZERO,
        }
    }

    pub fn with_behavior(mut self, behavior: ReceiptBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn current_balance(&self) -> u128 {
        *self.balance.lock().unwrap()
    }

    pub fn transfers(&self) -> Vec<(String, u128)> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn resync_count(&self) -> usize {
        self.resyncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn faucet_address(&self) -> &str {
        FAUCET_ADDRESS
    }

    async fn balance(&self) -> FaucetResult<u128> {
        Ok(self.current_balance())
    }

    async fn send_transfer(&self, to: &RecipientAddress, value: u128) -> FaucetResult<String> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(FaucetError::Rpc("replacement transaction underpriced".to_string()));
        }

        let mut transfers = self.transfers.lock().unwrap();
        *self.balance.lock().unwrap() -= value;
        transfers.push((to.normalized(), value));

        let tx_hash = format!("0x{:064x}", transfers.len());
        let block = self.head.fetch_add(1, Ordering::SeqCst) + 1;
        self.receipts.lock().unwrap().insert(tx_hash.clone(), block);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: &str) -> FaucetResult<Option<TxReceipt>> {
        let block = match self.receipts.lock().unwrap().get(tx_hash) {
            Some(block) => *block,
            None => return Ok(None),
        };

        Ok(match self.behavior {
            ReceiptBehavior::Confirm => Some(TxReceipt { block_number: block, success: true }),
            ReceiptBehavior::Revert => Some(TxReceipt { block_number: block, success: false }),
            ReceiptBehavior::NeverMined => None,
        })
    }

    async fn block_number(&self) -> FaucetResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn resync_nonce(&self) {
        self.resyncs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Facilitator that accepts every payment
pub struct AcceptingFacilitator;

#[async_trait]
impl Facilitator for AcceptingFacilitator {
    async fn verify(&self, _: &Value, _: &PaymentRequirements) -> Result<VerifyResponse, PaywallError> {
        Ok(VerifyResponse {
            is_valid: true,
            invalid_reason: None,
            payer: None,
        })
    }

    async fn settle(&self, _: &Value, _: &PaymentRequirements) -> Result<SettleResponse, PaywallError> {
        Ok(SettleResponse {
            success: true,
            error_reason: None,
            transaction: Some("0xsettled".to_string()),
            network: Some("base-sepolia".to_string()),
            payer: None,
        })
    }
}

pub fn fast_settings() -> ClaimSettings {
    ClaimSettings {
        confirmation_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..ClaimSettings::default()
    }
}

pub fn service_with(chain: Option<Arc<MockChain>>, registry: Arc<dyn ClaimRegistry>) -> FaucetService {
    let chain = chain.map(|chain| chain as Arc<dyn ChainClient>);
    FaucetService::new(chain, registry, fast_settings()).unwrap()
}
