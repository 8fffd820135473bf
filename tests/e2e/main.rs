//! End-to-end tests for the gateway's HTTP surface, driven directly against
//! the Axum router (no real upstream network calls).

use max_gateway::auth::OAuthManager;
use max_gateway::http::{build_router, AppState};
use max_gateway::storage::TokenStore;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tower::ServiceExt;

static GATEWAY_HOME_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn lock_gateway_home() -> MutexGuard<'static, ()> {
    let mutex = GATEWAY_HOME_LOCK.get_or_init(|| Mutex::new(()));
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct TestEnvGuard {
    _lock: MutexGuard<'static, ()>,
    prev_home: Option<OsString>,
    _temp_home: tempfile::TempDir,
}

impl TestEnvGuard {
    fn new() -> Self {
        let lock = lock_gateway_home();
        let temp_home = tempfile::Builder::new()
            .prefix("max-gateway-e2e-home-")
            .tempdir()
            .expect("create temp home");
        let prev_home = std::env::var_os("GATEWAY_HOME");
        std::env::set_var("GATEWAY_HOME", temp_home.path());

        Self {
            _lock: lock,
            prev_home,
            _temp_home: temp_home,
        }
    }
}

impl Drop for TestEnvGuard {
    fn drop(&mut self) {
        match &self.prev_home {
            Some(prev) => std::env::set_var("GATEWAY_HOME", prev),
            None => std::env::remove_var("GATEWAY_HOME"),
        }
    }
}

fn test_router() -> axum::Router {
    let oauth = Arc::new(OAuthManager::new(TokenStore::load()));
    build_router(AppState::new(oauth))
}

#[tokio::test]
async fn healthz_reports_ok() {
    let _env = TestEnvGuard::new();
    let router = test_router();

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/healthz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn list_models_includes_reasoning_variants() {
    let _env = TestEnvGuard::new();
    let router = test_router();

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/v1/models")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["object"], "list");
    let ids: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"sonnet-4-5"));
    assert!(ids.contains(&"sonnet-4-5-reasoning-high"));
}

#[tokio::test]
async fn auth_status_reports_unauthenticated_with_no_stored_token() {
    let _env = TestEnvGuard::new();
    let router = test_router();

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/auth/status")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["authenticated"], false);
}

#[tokio::test]
async fn chat_completions_rejects_unknown_model() {
    let _env = TestEnvGuard::new();
    let router = test_router();

    let request_body = serde_json::json!({
        "model": "not-a-real-model",
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not-a-real-model"));
}

#[tokio::test]
async fn messages_rejects_missing_model_field() {
    let _env = TestEnvGuard::new();
    let router = test_router();

    let request_body = serde_json::json!({
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": 100,
    });

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}
