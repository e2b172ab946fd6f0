mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::{submission, token, transaction};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokenpay::application::engine::PaymentEngine;
use tokenpay::config::IssuerHttpConfig;
use tokenpay::domain::issuer::{IssuerIntent, IssuerSession};
use tokenpay::domain::ports::{IssuerClient, LedgerStore, TransactionStore};
use tokenpay::domain::transaction::TransactionStatus;
use tokenpay::error::GatewayError;
use tokenpay::infrastructure::in_memory::InMemoryStore;
use tokenpay::infrastructure::issuer_http::HttpIssuerClient;

#[derive(Clone, Copy)]
enum Behaviour {
    Honest,
    Overloaded,
    Deferring,
    DoubleSpend,
}

#[derive(Clone)]
struct IssuerState {
    behaviour: Behaviour,
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn issuer(State(state): State<IssuerState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.requests.lock().push(body.clone());
    let op = body["fn"].as_str().unwrap_or_default();
    match (state.behaviour, op) {
        (Behaviour::Overloaded, _) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "overloaded"})),
        ),
        (Behaviour::Deferring, "begin") => (
            StatusCode::OK,
            Json(json!({"deferInfo": {"reason": "maintenance", "retryAfter": 30}})),
        ),
        (_, "begin") => (
            StatusCode::OK,
            Json(json!({"status": "ok", "tid": "tid-42", "fee": {"verify": "0"}})),
        ),
        (Behaviour::DoubleSpend, "verify") => (
            StatusCode::OK,
            Json(json!({"status": "ok", "error": ["token already spent"]})),
        ),
        (_, "verify") => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "error": [],
                "coin": body["coin"].clone(),
                "verifyInfo": {"actualValue": "0.02000000"}
            })),
        ),
        (_, "end") => (StatusCode::OK, Json(json!({"status": "ok"}))),
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": ["unknown fn"]}))),
    }
}

/// Serves a fake issuer on an ephemeral port and returns a client bound to it
/// together with the issuing domain to put in tokens.
async fn serve(behaviour: Behaviour) -> (HttpIssuerClient, String, Arc<Mutex<Vec<Value>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = IssuerState {
        behaviour,
        requests: requests.clone(),
    };
    let app = Router::new().route("/issuer", post(issuer)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = HttpIssuerClient::new(IssuerHttpConfig::default().with_scheme("http")).unwrap();
    (client, addr.to_string(), requests)
}

#[tokio::test]
async fn test_payment_over_http_issuer() {
    let (client, domain, requests) = serve(Behaviour::Honest).await;
    let store = Arc::new(InMemoryStore::new());
    let engine = PaymentEngine::new(store.clone(), Arc::new(client));
    let tx = transaction();
    store.insert(tx.clone()).await.unwrap();

    let ack = engine
        .respond(&tx.id, submission(vec![token("XBT", "0.02", &domain)]))
        .await;
    assert_eq!(ack.status, "ok");

    let stored = store.find(&tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Resolved);
    let details = stored.verify_details.unwrap();
    assert_eq!(details.tid, "tid-42");
    assert_eq!(details.actual_value.to_string(), "0.02");
    assert_eq!(store.entries().await.unwrap().len(), 1);

    let requests = requests.lock().clone();
    let ops: Vec<&str> = requests.iter().filter_map(|r| r["fn"].as_str()).collect();
    assert_eq!(ops, vec!["begin", "verify", "end"]);
    assert_eq!(requests[0]["intent"], "verify");
    assert_eq!(requests[1]["tid"], "tid-42");
    assert_eq!(requests[1]["targetValue"], "0.01");
    assert_eq!(requests[1]["issuePolicy"], "single");
    assert_eq!(requests[1]["coin"].as_array().unwrap().len(), 1);
    assert_eq!(requests[2]["tid"], "tid-42");
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let (client, domain, _) = serve(Behaviour::Overloaded).await;
    let result = client.begin(&domain, IssuerIntent::Verify).await;
    assert!(matches!(result, Err(GatewayError::IssuerUnavailable(_))));
}

#[tokio::test]
async fn test_defer_info_is_reported_as_deferral() {
    let (client, domain, _) = serve(Behaviour::Deferring).await;
    let result = client.begin(&domain, IssuerIntent::Verify).await;
    assert!(matches!(result, Err(GatewayError::IssuerDeferred(_))));
}

#[tokio::test]
async fn test_issuer_errors_reject_verification() {
    let (client, domain, _) = serve(Behaviour::DoubleSpend).await;
    let session = client.begin(&domain, IssuerIntent::Verify).await.unwrap();
    assert_eq!(
        session,
        IssuerSession {
            tid: "tid-42".to_string(),
            domain: domain.clone(),
            fee: Some(json!({"verify": "0"})),
        }
    );

    let store = Arc::new(InMemoryStore::new());
    let engine = PaymentEngine::new(store.clone(), Arc::new(client));
    let tx = transaction();
    store.insert(tx.clone()).await.unwrap();
    let result = engine
        .pay(&tx.id, submission(vec![token("XBT", "0.02", &domain)]))
        .await;

    assert!(matches!(result, Err(GatewayError::IssuerRejected(msg)) if msg.contains("already spent")));
    assert_eq!(
        store.find(&tx.id).await.unwrap().unwrap().status,
        TransactionStatus::Initial
    );
}

#[tokio::test]
async fn test_unreachable_issuer_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let domain = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = HttpIssuerClient::new(IssuerHttpConfig::default().with_scheme("http")).unwrap();
    let result = client.begin(&domain, IssuerIntent::Verify).await;
    assert!(matches!(result, Err(GatewayError::IssuerUnavailable(_))));
}
