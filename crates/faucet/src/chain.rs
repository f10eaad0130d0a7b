//! Chain access for the faucet: balance, transfers, receipts

use crate::address::RecipientAddress;
use crate::config::{FaucetConfig, SignerConfig, TRANSFER_GAS_LIMIT};
use crate::error::{FaucetError, FaucetResult};
use crate::units::{parse_quantity, trim_be_bytes};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, SigningKey};
use rlp::RlpStream;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of an included transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Block the transaction was included in
    pub block_number: u64,
    /// `false` if execution reverted
    pub success: bool,
}

/// What the faucet needs from the chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Funding account address (`0x`-prefixed, lowercase)
    fn faucet_address(&self) -> &str;

    /// Funding account balance in wei
    async fn balance(&self) -> FaucetResult<u128>;

    /// Sign and submit a value transfer, returning the transaction hash
    async fn send_transfer(&self, to: &RecipientAddress, value: u128) -> FaucetResult<String>;

    /// Receipt of a transaction, `None` while still pending
    async fn receipt(&self, tx_hash: &str) -> FaucetResult<Option<TxReceipt>>;

    /// Latest block height
    async fn block_number(&self) -> FaucetResult<u64>;

    /// Forget any locally tracked nonce; the next transfer re-reads it from
    /// the node
    async fn resync_nonce(&self) {}
}

/// JSON-RPC client for an EVM chain holding the faucet's signing key
pub struct JsonRpcChainClient {
    rpc_url: String,
    client: reqwest::Client,
    signing_key: SigningKey,
    address_hex: String,
    chain_id: u64,
    /// Next nonce to use; `None` until read from the node. Held for the
    /// whole sign-and-submit step so submissions are serialized.
    next_nonce: Mutex<Option<u64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

impl JsonRpcChainClient {
    /// Build a client from configuration. `Ok(None)` when no credential is
    /// configured; a credential that does not parse is an error.
    pub fn from_config(config: &FaucetConfig, chain_id: u64) -> FaucetResult<Option<Self>> {
        match &config.signer {
            SignerConfig::Unconfigured => Ok(None),
            SignerConfig::Configured(key) => {
                let client = reqwest::Client::builder()
                    .timeout(config.rpc_timeout())
                    .build()
                    .map_err(|e| FaucetError::Internal(format!("Failed to build HTTP client: {}", e)))?;
                Self::new(config.rpc_url.clone(), key, chain_id, client).map(Some)
            }
        }
    }

    pub fn new(
        rpc_url: String,
        private_key: &str,
        chain_id: u64,
        client: reqwest::Client,
    ) -> FaucetResult<Self> {
        let signing_key = parse_signing_key(private_key)?;
        let address_hex = format!("0x{}", hex::encode(derive_address(&signing_key)));

        info!("Faucet address: {}", address_hex);

        Ok(Self {
            rpc_url,
            client,
            signing_key,
            address_hex,
            chain_id,
            next_nonce: Mutex::new(None),
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> FaucetResult<serde_json::Value> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::Rpc(format!("Request failed: {}", e)))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FaucetError::Rpc(format!("Invalid response: {}", e)))?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FaucetError::Rpc(message));
        }

        Ok(json
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn call_quantity(&self, method: &str, params: serde_json::Value) -> FaucetResult<u128> {
        let result = self.call(method, params).await?;
        let value = result
            .as_str()
            .ok_or_else(|| FaucetError::Rpc(format!("{} returned a non-string result", method)))?;
        parse_quantity(value)
    }

    async fn transaction_count(&self) -> FaucetResult<u64> {
        let count = self
            .call_quantity(
                "eth_getTransactionCount",
                serde_json::json!([self.address_hex, "pending"]),
            )
            .await?;
        u64::try_from(count).map_err(|_| FaucetError::Rpc(format!("Nonce out of range: {}", count)))
    }

    async fn gas_price(&self) -> FaucetResult<u128> {
        self.call_quantity("eth_gasPrice", serde_json::json!([])).await
    }

    async fn submit(&self, nonce: u64, gas_price: u128, to: &[u8; 20], value: u128) -> FaucetResult<String> {
        let raw = sign_legacy_transfer(
            &self.signing_key,
            self.chain_id,
            nonce,
            gas_price,
            to,
            value,
        )?;
        let local_hash = format!("0x{}", hex::encode(keccak_hash::keccak(&raw).0));

        let result = self
            .call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await?;

        match result.as_str() {
            Some(hash) if !hash.is_empty() => Ok(hash.to_string()),
            _ => Ok(local_hash),
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    fn faucet_address(&self) -> &str {
        &self.address_hex
    }

    async fn balance(&self) -> FaucetResult<u128> {
        self.call_quantity("eth_getBalance", serde_json::json!([self.address_hex, "latest"]))
            .await
    }

    async fn send_transfer(&self, to: &RecipientAddress, value: u128) -> FaucetResult<String> {
        let mut next_nonce = self.next_nonce.lock().await;

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self.transaction_count().await?,
        };
        let gas_price = self.gas_price().await?;

        debug!("Submitting transfer to {} with nonce {}", to, nonce);

        match self.submit(nonce, gas_price, to.as_bytes(), value).await {
            Ok(tx_hash) => {
                *next_nonce = Some(nonce + 1);
                info!("Transaction sent: {}", tx_hash);
                Ok(tx_hash)
            }
            Err(e) => {
                // Re-read the nonce from the node next time.
                *next_nonce = None;
                warn!("Transaction submission failed: {}", e);
                Err(e)
            }
        }
    }

    async fn receipt(&self, tx_hash: &str) -> FaucetResult<Option<TxReceipt>> {
        let result = self
            .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let receipt: RpcReceipt = serde_json::from_value(result)
            .map_err(|e| FaucetError::Rpc(format!("Invalid receipt: {}", e)))?;

        let block_number = match receipt.block_number {
            Some(number) => parse_quantity(&number)? as u64,
            None => return Ok(None),
        };
        let success = match receipt.status {
            Some(status) => parse_quantity(&status)? == 1,
            None => true,
        };

        Ok(Some(TxReceipt {
            block_number,
            success,
        }))
    }

    async fn block_number(&self) -> FaucetResult<u64> {
        let number = self.call_quantity("eth_blockNumber", serde_json::json!([])).await?;
        Ok(number as u64)
    }

    async fn resync_nonce(&self) {
        if let Some(nonce) = self.next_nonce.lock().await.take() {
            debug!("Discarded cached nonce {}", nonce);
        }
    }
}

/// Decode a hex private key, `0x` prefix optional
pub fn parse_signing_key(private_key: &str) -> FaucetResult<SigningKey> {
    let private_key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
    let private_key_bytes = hex::decode(private_key_hex)
        .map_err(|e| FaucetError::Internal(format!("Invalid private key: {}", e)))?;

    if private_key_bytes.len() != 32 {
        return Err(FaucetError::Internal(format!(
            "Invalid private key: expected 32 bytes, got {}",
            private_key_bytes.len()
        )));
    }

    SigningKey::from_slice(&private_key_bytes)
        .map_err(|e| FaucetError::Internal(format!("Invalid signing key: {}", e)))
}

/// Ethereum address of a key: last 20 bytes of keccak256(uncompressed pubkey)
pub fn derive_address(signing_key: &SigningKey) -> [u8; 20] {
    let public_key = signing_key.verifying_key();
    let pub_key_bytes = public_key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&pub_key_bytes.as_bytes()[1..]); // Skip 0x04 tag
    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&hash.0[12..]);
    addr_bytes
}

/// Encode and sign an EIP-155 legacy value transfer
pub fn sign_legacy_transfer(
    signing_key: &SigningKey,
    chain_id: u64,
    nonce: u64,
    gas_price: u128,
    to: &[u8; 20],
    value: u128,
) -> FaucetResult<Vec<u8>> {
    let mut stream = RlpStream::new_list(9);
    append_transfer_fields(&mut stream, nonce, gas_price, to, value);
    stream.append(&chain_id);
    stream.append_empty_data();
    stream.append_empty_data();

    let sighash = keccak_hash::keccak(stream.out());

    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&sighash.0)
        .map_err(|e| FaucetError::Internal(format!("Signing failed: {}", e)))?;

    // Nodes reject high-S signatures; flipping S flips the parity bit.
    let (signature, recovery_id) = match signature.normalize_s() {
        Some(normalized) => (
            normalized,
            RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
        ),
        None => (signature, recovery_id),
    };

    let v = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());
    let r: [u8; 32] = signature.r().to_bytes().into();
    let s: [u8; 32] = signature.s().to_bytes().into();

    let mut signed = RlpStream::new_list(9);
    append_transfer_fields(&mut signed, nonce, gas_price, to, value);
    signed.append(&v);
    signed.append(&trim_leading_zeros(&r));
    signed.append(&trim_leading_zeros(&s));

    Ok(signed.out().to_vec())
}

fn append_transfer_fields(stream: &mut RlpStream, nonce: u64, gas_price: u128, to: &[u8; 20], value: u128) {
    stream.append(&nonce);
    stream.append(&trim_be_bytes(gas_price));
    stream.append(&TRANSFER_GAS_LIMIT);
    stream.append(&to.to_vec());
    stream.append(&trim_be_bytes(value));
    stream.append_empty_data(); // data
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
