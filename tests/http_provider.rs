//! HTTP provider client against a loopback server
//!
//! Verifies request shape, the secret-key header, response normalization,
//! status polling, and error mapping of non-2xx answers.

use a3s_agentbus::{
    AgentBusError, HttpTransactionProvider, PollStatus, ProviderConfig, ProviderOutcome,
    ProviderRequest, SecretString, TransactionProvider,
};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const SECRET: &str = "sk-test-123";

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-secret-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == SECRET)
}

async fn execute(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    recorded.bodies.lock().unwrap().push(body.clone());

    let message = body["message"].as_str().unwrap_or_default();
    let answer = if message.contains("hash") {
        json!({"transaction_hash": "0xabc"})
    } else if message.contains("actions") {
        json!({
            "session_id": "s1",
            "request_id": "r1",
            "actions": [{
                "type": "sign_transaction",
                "data": "{\"chainId\":8453,\"to\":\"0x1111111111111111111111111111111111111111\",\"value\":\"0x10\",\"data\":\"0x\"}"
            }]
        })
    } else if message.contains("slow") {
        json!({"request_id": "r-slow"})
    } else if message.contains("explode") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "upstream exploded"})),
        );
    } else {
        json!({"message": "nothing to do"})
    };
    (StatusCode::OK, Json(answer))
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    let question = body["message"].as_str().unwrap_or_default();
    (StatusCode::OK, Json(json!({"content": format!("answer to: {}", question)})))
}

async fn status(Path(request_id): Path<String>) -> Json<Value> {
    match request_id.as_str() {
        "r-done" => Json(json!({"status": "confirmed", "txHash": "0xfeed"})),
        "r-bad" => Json(json!({"status": "failed", "reason": "reverted"})),
        _ => Json(json!({"status": "pending"})),
    }
}

async fn spawn_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/v1/execute", post(execute))
        .route("/v1/chat", post(chat))
        .route("/v1/status/:request_id", get(status))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1", addr), recorded)
}

fn provider(base_url: &str, secret: &str) -> HttpTransactionProvider {
    HttpTransactionProvider::from_config(&ProviderConfig {
        base_url: base_url.to_string(),
        secret_key: Some(SecretString::new(secret)),
        request_timeout_secs: 5,
        chain_ids: vec![8453],
    })
    .unwrap()
}

fn request(message: &str) -> ProviderRequest {
    ProviderRequest::new(message)
        .with_from("0xabc0000000000000000000000000000000000001")
        .with_chain_ids(vec![8453])
        .with_auto_execute(true)
}

#[tokio::test]
async fn test_execute_returns_hash_and_sends_context() {
    let (base, recorded) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let outcome = provider.execute(&request("give me a hash")).await.unwrap();
    assert_eq!(outcome, ProviderOutcome::Hash("0xabc".to_string()));

    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["stream"], false);
    assert_eq!(bodies[0]["context"]["chain_ids"], json!([8453]));
    assert_eq!(bodies[0]["context"]["auto_execute_transactions"], true);
    assert_eq!(
        bodies[0]["context"]["from"],
        "0xabc0000000000000000000000000000000000001"
    );
}

#[tokio::test]
async fn test_execute_actions_are_normalized() {
    let (base, _) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let outcome = provider.execute(&request("return actions")).await.unwrap();
    let ProviderOutcome::Actions { actions, session_id, request_id } = outcome else {
        panic!("expected actions, got {:?}", outcome);
    };
    assert_eq!(session_id.as_deref(), Some("s1"));
    assert_eq!(request_id.as_deref(), Some("r1"));

    let tx = actions[0].to_unsigned(1).unwrap();
    assert_eq!(tx.chain_id, 8453);
    assert_eq!(tx.value, "0x10");
}

#[tokio::test]
async fn test_default_prepare_transaction_uses_actions() {
    let (base, recorded) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let tx = provider
        .prepare_transaction(&request("return actions"))
        .await
        .unwrap();
    assert_eq!(tx.to, "0x1111111111111111111111111111111111111111");

    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(bodies[0]["context"]["auto_execute_transactions"], false);
    assert!(bodies[0]["message"]
        .as_str()
        .unwrap()
        .starts_with("Prepare the transaction data only"));
}

#[tokio::test]
async fn test_prepare_transaction_without_actions_fails() {
    let (base, _) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let err = provider
        .prepare_transaction(&request("plain text please"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("text"));
}

#[tokio::test]
async fn test_pending_and_status_polling() {
    let (base, _) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let outcome = provider.execute(&request("slow one")).await.unwrap();
    assert_eq!(
        outcome,
        ProviderOutcome::Pending {
            request_id: "r-slow".to_string(),
            session_id: None
        }
    );

    assert_eq!(provider.transaction_status("r-slow").await.unwrap(), PollStatus::Pending);
    assert_eq!(
        provider.transaction_status("r-done").await.unwrap(),
        PollStatus::Confirmed("0xfeed".to_string())
    );
    assert_eq!(
        provider.transaction_status("r-bad").await.unwrap(),
        PollStatus::Failed("reverted".to_string())
    );
}

#[tokio::test]
async fn test_chat_returns_text() {
    let (base, _) = spawn_server().await;
    let provider = provider(&base, SECRET);

    let outcome = provider.chat(&ProviderRequest::new("what is gas?")).await.unwrap();
    assert_eq!(
        outcome,
        ProviderOutcome::Text("answer to: what is gas?".to_string())
    );
}

#[tokio::test]
async fn test_non_success_status_is_provider_error() {
    let (base, _) = spawn_server().await;

    let err = provider(&base, "wrong-key")
        .execute(&request("give me a hash"))
        .await
        .unwrap_err();
    match err {
        AgentBusError::Provider { status, reason } => {
            assert_eq!(status, Some(401));
            assert!(reason.contains("bad key"));
        }
        other => panic!("unexpected {:?}", other),
    }

    let err = provider(&base, SECRET)
        .execute(&request("explode"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTP 500"));
}

#[tokio::test]
async fn test_unreachable_provider_is_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = provider(&format!("http://{}", addr), SECRET)
        .execute(&request("give me a hash"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentBusError::Http(_)));
}
