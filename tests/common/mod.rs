#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use tenant_console::config::ClientConfig;
use tenant_console::{ApiClient, EventBus, FileTokenStore, TokenStore};

pub const PASSWORD: &str = "secret";

/// Hit counters of the in-process backend
#[derive(Default)]
pub struct Backend {
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub slow_hits: AtomicUsize,
    pub flaky_hits: AtomicUsize,
}

impl Backend {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub backend: Arc<Backend>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Value {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map_or(Value::Null, |v| json!(v))
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "Invalid username or password"})),
        );
    }

    let n = backend.logins.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "access_token": format!("access-login-{}", n),
                "refresh_token": format!("refresh-login-{}", n),
                "expires_in": 3600
            }
        })),
    )
}

async fn logout(State(backend): State<Arc<Backend>>) -> Json<Value> {
    backend.logouts.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true, "data": null}))
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["refresh_token"].as_str().map_or(true, str::is_empty) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "missing refresh token"})));
    }

    let n = backend.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    // Slow enough that concurrent callers overlap with it
    tokio::time::sleep(Duration::from_millis(100)).await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {"access_token": format!("access-refreshed-{}", n), "expires_in": 3600}
        })),
    )
}

async fn echo(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "authorization": header_value(&headers, "authorization"),
            "tenant": header_value(&headers, "x-tenant-id"),
            "csrf": header_value(&headers, "x-csrf-token"),
            "content_type": header_value(&headers, "content-type"),
            "query": query,
        }
    }))
}

async fn slow(State(backend): State<Arc<Backend>>) -> Json<Value> {
    let n = backend.slow_hits.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(200)).await;
    Json(json!({"success": true, "data": {"hit": n}}))
}

async fn flaky(State(backend): State<Arc<Backend>>) -> (StatusCode, Json<Value>) {
    backend.flaky_hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"success": false, "message": "under maintenance"})),
    )
}

async fn create_role(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["name"].as_str().map_or(true, str::is_empty) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"message": "Invalid role", "errors": {"name": ["is required"]}})),
        );
    }
    (StatusCode::CREATED, Json(json!({"success": true, "data": {"id": 7, "name": body["name"]}})))
}

async fn list_menus() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "items": [
                {"id": 1, "name": "System", "parent_id": 0},
                {"id": 2, "name": "Roles", "parent_id": 1},
                {"id": 3, "name": "Menus", "parent_id": 1}
            ],
            "total": 3
        }
    }))
}

fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/v1/echo", get(echo))
        .route("/api/v1/slow", get(slow))
        .route("/api/v1/flaky", get(flaky).post(flaky))
        .route("/api/v1/roles", post(create_role))
        .route("/api/v1/menus", get(list_menus))
        .with_state(backend)
}

/// Backend on an ephemeral port, served from the test's runtime
pub async fn spawn_server() -> Result<TestServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test backend")?;
    let addr = listener.local_addr()?;
    let backend = Arc::new(Backend::default());

    let app = router(Arc::clone(&backend));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestServer {
        addr,
        base_url: format!("http://{}/api", addr),
        backend,
    })
}

pub fn client_config(server: &TestServer) -> ClientConfig {
    let mut config = ClientConfig::development();
    config.api.base_url = server.base_url.clone();
    config.api.timeout_secs = 5;
    config
}

/// Client over a session file in `dir`, with a private event bus
pub fn connect(server: &TestServer, dir: &Path) -> Result<(ApiClient, Arc<FileTokenStore>, EventBus)> {
    let store = Arc::new(FileTokenStore::new(dir.join("session.json")));
    let events = EventBus::new();
    let client = ApiClient::builder(client_config(server))
        .store(Arc::clone(&store) as Arc<dyn TokenStore>)
        .events(events.clone())
        .build()?;
    Ok((client, store, events))
}
