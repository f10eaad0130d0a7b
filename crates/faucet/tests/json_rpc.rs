mod common;

use axum::{extract::State, routing::post, Json, Router};
use common::*;
use rlp::Rlp;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use x402_faucet::{
    ChainClient, FaucetError, FaucetService, JsonRpcChainClient, MemoryClaimRegistry,
    RecipientAddress, TxReceipt,
};

// Well-known development key (anvil/hardhat account #0)
const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Scripted JSON-RPC node: fixed pending nonce, never mines unless a
/// receipt is set
struct RpcNode {
    pending_nonce: u64,
    failing_sends: AtomicUsize,
    receipt: Mutex<Value>,
    calls: Mutex<Vec<String>>,
    sent_nonces: Mutex<Vec<u64>>,
}

impl RpcNode {
    fn new(pending_nonce: u64) -> Arc<Self> {
        Arc::new(Self {
            pending_nonce,
            failing_sends: AtomicUsize::new(0),
            receipt: Mutex::new(Value::Null),
            calls: Mutex::new(Vec::new()),
            sent_nonces: Mutex::new(Vec::new()),
        })
    }

    fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }

    fn sent_nonces(&self) -> Vec<u64> {
        self.sent_nonces.lock().unwrap().clone()
    }

    fn set_receipt(&self, receipt: Value) {
        *self.receipt.lock().unwrap() = receipt;
    }
}

async fn handle_rpc(State(node): State<Arc<RpcNode>>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    node.calls.lock().unwrap().push(method.clone());
    let id = request["id"].clone();

    let result = match method.as_str() {
        "eth_getTransactionCount" => json!(format!("0x{:x}", node.pending_nonce)),
        "eth_gasPrice" => json!("0x3b9aca00"),
        "eth_getBalance" => json!("0xde0b6b3a7640000"),
        "eth_blockNumber" => json!("0x64"),
        "eth_getTransactionReceipt" => node.receipt.lock().unwrap().clone(),
        "eth_sendRawTransaction" => {
            let fail = node
                .failing_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32000, "message": "replacement transaction underpriced" }
                }));
            }

            let raw = request["params"][0].as_str().unwrap().trim_start_matches("0x");
            let raw = hex::decode(raw).unwrap();
            let nonce: u64 = Rlp::new(&raw).val_at(0).unwrap();
            node.sent_nonces.lock().unwrap().push(nonce);
            json!(format!("0x{:064x}", nonce))
        }
        _ => Value::Null,
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn spawn_node(node: Arc<RpcNode>) -> String {
    let app = Router::new().route("/", post(handle_rpc)).with_state(node);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn client_for(node: &Arc<RpcNode>) -> JsonRpcChainClient {
    let url = spawn_node(node.clone()).await;
    JsonRpcChainClient::new(url, DEV_KEY, 84532, reqwest::Client::new()).unwrap()
}

fn recipient() -> RecipientAddress {
    RecipientAddress::parse(RECIPIENT).unwrap()
}

#[tokio::test]
async fn test_reads_account_state() {
    let node = RpcNode::new(0);
    let client = client_for(&node).await;

    assert_eq!(client.faucet_address(), FAUCET_ADDRESS);
    assert_eq!(client.balance().await.unwrap(), ONE_ETH);
    assert_eq!(client.block_number().await.unwrap(), 100);
}

#[tokio::test]
async fn test_nonce_read_from_pending_then_advanced() {
    let node = RpcNode::new(5);
    let client = client_for(&node).await;

    let first = client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();
    let second = client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();

    assert_eq!(first, format!("0x{:064x}", 5));
    assert_eq!(second, format!("0x{:064x}", 6));
    assert_eq!(node.sent_nonces(), vec![5, 6]);
    assert_eq!(node.calls_to("eth_getTransactionCount"), 1);
}

#[tokio::test]
async fn test_failed_submit_discards_nonce() {
    let node = RpcNode::new(5);
    let client = client_for(&node).await;

    client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();

    node.failing_sends.store(1, Ordering::SeqCst);
    let err = client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap_err();
    match err {
        FaucetError::Rpc(message) => assert_eq!(message, "replacement transaction underpriced"),
        other => panic!("unexpected error: {:?}", other),
    }

    client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();
    assert_eq!(node.sent_nonces(), vec![5, 5]);
    assert_eq!(node.calls_to("eth_getTransactionCount"), 2);
}

#[tokio::test]
async fn test_resync_rereads_pending_nonce() {
    let node = RpcNode::new(5);
    let client = client_for(&node).await;

    client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();
    client.resync_nonce().await;
    client.send_transfer(&recipient(), DISBURSEMENT).await.unwrap();

    assert_eq!(node.sent_nonces(), vec![5, 5]);
}

#[tokio::test]
async fn test_unconfirmed_claims_do_not_stack_nonces() {
    let node = RpcNode::new(5);
    let client = client_for(&node).await;
    let service = FaucetService::new(
        Some(Arc::new(client) as Arc<dyn ChainClient>),
        Arc::new(MemoryClaimRegistry::new()),
        fast_settings(),
    )
    .unwrap();

    for i in 1..=3u8 {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let address = format!("0x{:040x}", i);
        let err = service
            .claim_with(&address, Duration::from_millis(100), cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::ConfirmationTimeout { waited_ms: 100, .. }));
    }

    // The node never advanced past 5, so neither may the client.
    assert_eq!(node.sent_nonces(), vec![5, 5, 5]);
}

#[tokio::test]
async fn test_receipt_parsing() {
    let node = RpcNode::new(0);
    let client = client_for(&node).await;
    let hash = format!("0x{:064x}", 1);

    assert_eq!(client.receipt(&hash).await.unwrap(), None);

    node.set_receipt(json!({ "blockNumber": "0x10", "status": "0x1" }));
    assert_eq!(
        client.receipt(&hash).await.unwrap(),
        Some(TxReceipt { block_number: 16, success: true })
    );

    node.set_receipt(json!({ "blockNumber": "0x10", "status": "0x0" }));
    assert_eq!(
        client.receipt(&hash).await.unwrap(),
        Some(TxReceipt { block_number: 16, success: false })
    );

    // Receipts without a block are still pending.
    node.set_receipt(json!({ "blockNumber": null, "status": null }));
    assert_eq!(client.receipt(&hash).await.unwrap(), None);
}
