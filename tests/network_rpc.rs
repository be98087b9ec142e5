//! Session-key submission against a mock JSON-RPC node

use a3s_agentbus::{
    AgentBusError, NetworkConfig, RpcTransactionSender, SessionKeyData, SessionKeyStore,
    TransactionSender, UnsignedTransaction,
};
use alloy_primitives::{keccak256, U256};
use alloy_rlp::{Decodable, Header};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const WALLET: &str = "0xAbC0000000000000000000000000000000000001";
const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

#[derive(Clone, Default)]
struct Node {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    fail_estimate: bool,
    reject_send: bool,
}

impl Node {
    fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    fn params_of(&self, method: &str) -> Value {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .unwrap()
    }
}

fn rpc_error(message: &str) -> Json<Value> {
    Json(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": message}}))
}

async fn rpc(State(node): State<Node>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();
    node.calls.lock().unwrap().push((method.clone(), params.clone()));

    let result = match method.as_str() {
        "eth_getTransactionCount" => json!("0x7"),
        "eth_gasPrice" => json!("0x3b9aca00"),
        "eth_estimateGas" if node.fail_estimate => return rpc_error("execution reverted"),
        "eth_estimateGas" => json!("0x5208"),
        "eth_sendRawTransaction" if node.reject_send => return rpc_error("nonce too low"),
        "eth_sendRawTransaction" => {
            let raw = params[0].as_str().unwrap_or_default();
            let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap_or_default();
            json!(format!("0x{}", hex::encode(keccak256(&bytes))))
        }
        _ => return rpc_error("method not found"),
    };
    Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
}

async fn spawn_node(node: Node) -> String {
    let app = Router::new().route("/", post(rpc)).with_state(node);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn sender_for(chain_id: u64, url: &str) -> RpcTransactionSender {
    RpcTransactionSender::from_config(&NetworkConfig {
        rpc_urls: [(chain_id, url.to_string())].into_iter().collect(),
        request_timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

fn session() -> SessionKeyData {
    SessionKeyStore::new()
        .create_session_key(WALLET, vec!["*".to_string()], 1)
        .unwrap()
}

fn transfer(chain_id: u64) -> UnsignedTransaction {
    UnsignedTransaction {
        to: RECIPIENT.to_string(),
        value: "1000".to_string(),
        data: "0x".to_string(),
        chain_id,
        ..Default::default()
    }
}

/// chain id, nonce, priority fee, max fee, gas limit of a raw type-2 transaction
fn decode_head(raw: &str) -> (u64, u64, U256, U256, u64) {
    let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
    assert_eq!(bytes[0], 0x02);
    let mut buf = &bytes[1..];
    let header = Header::decode(&mut buf).unwrap();
    assert!(header.list);
    (
        u64::decode(&mut buf).unwrap(),
        u64::decode(&mut buf).unwrap(),
        U256::decode(&mut buf).unwrap(),
        U256::decode(&mut buf).unwrap(),
        u64::decode(&mut buf).unwrap(),
    )
}

#[tokio::test]
async fn test_resolves_missing_fields_and_submits() {
    let node = Node::default();
    let url = spawn_node(node.clone()).await;
    let session = session();

    let hash = sender_for(8453, &url)
        .send_transaction(&session, &transfer(8453))
        .await
        .unwrap();

    assert_eq!(
        node.methods(),
        vec![
            "eth_getTransactionCount",
            "eth_estimateGas",
            "eth_gasPrice",
            "eth_sendRawTransaction"
        ]
    );
    assert_eq!(
        node.params_of("eth_getTransactionCount"),
        json!([session.address, "pending"])
    );
    assert_eq!(node.params_of("eth_estimateGas")[0]["value"], "0x3e8");

    let raw = node.params_of("eth_sendRawTransaction")[0]
        .as_str()
        .unwrap()
        .to_string();
    assert!(raw.starts_with("0x02"));
    let raw_bytes = hex::decode(&raw[2..]).unwrap();
    assert_eq!(hash, format!("0x{}", hex::encode(keccak256(&raw_bytes))));

    let (chain_id, nonce, priority, max_fee, gas) = decode_head(&raw);
    assert_eq!(chain_id, 8453);
    assert_eq!(nonce, 7);
    assert_eq!(priority, U256::from(1_000_000_000u64));
    // 2 * gasPrice + tip
    assert_eq!(max_fee, U256::from(3_000_000_000u64));
    assert_eq!(gas, 21_000);
}

#[tokio::test]
async fn test_explicit_fields_skip_lookups() {
    let node = Node::default();
    let url = spawn_node(node.clone()).await;

    let tx = UnsignedTransaction {
        gas: Some("50000".to_string()),
        nonce: Some(42),
        max_fee_per_gas: Some("0x77359400".to_string()),
        max_priority_fee_per_gas: Some("0x3b9aca00".to_string()),
        ..transfer(1)
    };
    sender_for(1, &url).send_transaction(&session(), &tx).await.unwrap();

    assert_eq!(node.methods(), vec!["eth_sendRawTransaction"]);
    let raw = node.params_of("eth_sendRawTransaction")[0]
        .as_str()
        .unwrap()
        .to_string();
    let (_, nonce, _, max_fee, gas) = decode_head(&raw);
    assert_eq!(nonce, 42);
    assert_eq!(max_fee, U256::from(2_000_000_000u64));
    assert_eq!(gas, 50_000);
}

#[tokio::test]
async fn test_failed_estimate_uses_fallback_gas() {
    let node = Node {
        fail_estimate: true,
        ..Default::default()
    };
    let url = spawn_node(node.clone()).await;

    sender_for(1, &url)
        .send_transaction(&session(), &transfer(1))
        .await
        .unwrap();

    let raw = node.params_of("eth_sendRawTransaction")[0]
        .as_str()
        .unwrap()
        .to_string();
    let (_, _, _, _, gas) = decode_head(&raw);
    assert_eq!(gas, NetworkConfig::default().fallback_gas_limit);
}

#[tokio::test]
async fn test_rejected_submission_is_rpc_error() {
    let node = Node {
        reject_send: true,
        ..Default::default()
    };
    let url = spawn_node(node).await;

    let err = sender_for(1, &url)
        .send_transaction(&session(), &transfer(1))
        .await
        .unwrap_err();
    match err {
        AgentBusError::Rpc { method, reason } => {
            assert_eq!(method, "eth_sendRawTransaction");
            assert!(reason.contains("nonce too low"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unconfigured_chain_is_rejected_before_any_call() {
    let node = Node::default();
    let url = spawn_node(node.clone()).await;

    let err = sender_for(1, &url)
        .send_transaction(&session(), &transfer(137))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentBusError::Config(_)));
    assert!(node.methods().is_empty());
}
