#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request as HttpRequest, StatusCode},
    Router,
};
use ::common::api;
use control_plane::{
    app_state::AppState,
    auth::{AdminIdentity, AGENT_TOKEN_HEADER},
    config::{AgentConfig, IdentityConfig, LimitsConfig},
    jwks::JwksCache,
    metrics::{init_metrics_recorder, record_build_info},
    persistence as db,
    persistence::migrations,
    routes::{build_metrics_router, build_router},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// Bearer tokens the test validator accepts, each mapped to a
/// distinct admin subject.
pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";
pub const TEST_ADMIN_SUBJECT: &str = "auth0|admin-primary";
pub const OTHER_ADMIN_TOKEN: &str = "test-other-admin-token";
pub const OTHER_ADMIN_SUBJECT: &str = "auth0|admin-secondary";

#[derive(Clone)]
pub struct TestAppConfig {
    pub command_batch: u32,
    pub delivery_timeout_secs: u64,
    pub command_pending_ttl_secs: u64,
    pub stale_after_secs: u64,
    pub rate_limit_per_minute: u32,
    pub agent_body_bytes: u64,
    pub admin_body_bytes: u64,
}

impl Default for TestAppConfig {
    fn default() -> Self {
        Self {
            command_batch: 10,
            delivery_timeout_secs: 300,
            command_pending_ttl_secs: 3600,
            stale_after_secs: 300,
            rate_limit_per_minute: 0,
            agent_body_bytes: 512 * 1024,
            admin_body_bytes: 512 * 1024,
        }
    }
}

pub async fn setup_app() -> (Router, db::Db) {
    setup_app_with_config(TestAppConfig::default()).await
}

pub async fn setup_app_with_config(config: TestAppConfig) -> (Router, db::Db) {
    let db = migrations::init_pool("sqlite::memory:")
        .await
        .expect("db init");
    let outcome = migrations::run_migrations(&db).await.expect("migrations");
    let state = make_state(db.clone(), &config, outcome.snapshot);
    let app = build_router(state.clone()).with_state(state);
    (app, db)
}

pub async fn setup_apps() -> (Router, Router, db::Db) {
    let db = migrations::init_pool("sqlite::memory:")
        .await
        .expect("db init");
    let outcome = migrations::run_migrations(&db).await.expect("migrations");
    let state = make_state(db.clone(), &TestAppConfig::default(), outcome.snapshot);
    let app = build_router(state.clone()).with_state(state.clone());
    let metrics_app = build_metrics_router().with_state(state);
    (app, metrics_app, db)
}

pub async fn setup_app_with_state() -> (Router, AppState) {
    let db = migrations::init_pool("sqlite::memory:")
        .await
        .expect("db init");
    let outcome = migrations::run_migrations(&db).await.expect("migrations");
    let state = make_state(db, &TestAppConfig::default(), outcome.snapshot);
    let app = build_router(state.clone()).with_state(state.clone());
    (app, state)
}

pub fn make_state(db: db::Db, config: &TestAppConfig, schema: db::MigrationSnapshot) -> AppState {
    let metrics_handle = init_metrics_recorder();
    record_build_info(&schema);

    let agent_limiter = match config.rate_limit_per_minute {
        0 => None,
        per_minute => Some(Arc::new(tokio::sync::Mutex::new(
            control_plane::rate_limit::AgentRateLimiter::per_minute(per_minute),
        ))),
    };

    AppState {
        db,
        token_pepper: "test-pepper".into(),
        agent: AgentConfig {
            command_batch: config.command_batch,
            delivery_timeout_secs: config.delivery_timeout_secs,
            command_pending_ttl_secs: config.command_pending_ttl_secs,
            stale_after_secs: config.stale_after_secs,
            sweep_interval_secs: 60,
            rate_limit_per_minute: config.rate_limit_per_minute,
        },
        limits: LimitsConfig {
            max_field_len: 255,
            agent_body_bytes: config.agent_body_bytes,
            admin_body_bytes: config.admin_body_bytes,
        },
        // Static validator so tests run without an identity provider.
        admin_token_validator: Arc::new(|_state, token| {
            let identity = match token {
                TEST_ADMIN_TOKEN => Some(AdminIdentity {
                    subject: TEST_ADMIN_SUBJECT.into(),
                    email: Some("admin@example.net".into()),
                }),
                OTHER_ADMIN_TOKEN => Some(AdminIdentity {
                    subject: OTHER_ADMIN_SUBJECT.into(),
                    email: None,
                }),
                _ => None,
            };
            Box::pin(async move { Ok(identity) })
        }),
        jwks: JwksCache::new(IdentityConfig {
            jwks_url: String::new(),
            issuer: None,
            audience: None,
            cache_ttl_secs: 300,
        }),
        agent_limiter,
        metrics_handle,
        schema,
    }
}

// ---------------------------------------------------------------------------
// Request helpers.

pub async fn admin_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    admin_request_as(app, TEST_ADMIN_TOKEN, method, uri, body).await
}

pub async fn admin_request_as(
    app: &Router,
    bearer: &str,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {bearer}"));
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    response_json(response).await
}

/// Status only, for requests whose rejection body is not JSON.
pub async fn admin_request_status(
    app: &Router,
    method: &str,
    uri: &str,
    body: Value,
) -> StatusCode {
    let request = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_ADMIN_TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    response.status()
}

pub async fn agent_request(
    app: &Router,
    secret: &str,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header(AGENT_TOKEN_HEADER, secret);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    response_json(response).await
}

pub async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response is json")
    };
    (status, value)
}

// ---------------------------------------------------------------------------
// Scenario helpers.

/// Register a node via the admin API and return its id.
pub async fn create_node(app: &Router, name: &str) -> Uuid {
    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": name,
            "hostname": format!("{name}.example.net"),
            "ip_address": "203.0.113.77",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create node: {body}");
    parse_id(&body)
}

/// Issue an agent token for a node and return (token_id, secret).
pub async fn issue_token(app: &Router, node_id: Uuid) -> (Uuid, String) {
    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/agent-tokens",
        Some(json!({ "node_id": node_id, "name": "primary" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "issue token: {body}");
    let secret = body["secret"].as_str().expect("secret present").to_string();
    (parse_id(&body), secret)
}

/// Create a service instance on a node and return its id.
pub async fn create_service(app: &Router, node_id: Uuid, name: &str, port: u16) -> Uuid {
    let (status, body) = admin_request(
        app,
        "POST",
        &format!("/api/v1/nodes/{node_id}/services"),
        Some(json!({
            "name": name,
            "service_type": "xray",
            "protocol": "tcp",
            "port": port,
            "config": xray_config(port),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create service: {body}");
    parse_id(&body)
}

/// Minimal xray config that passes renderer validation.
pub fn xray_config(port: u16) -> Value {
    json!({
        "inbounds": [{ "port": port, "protocol": "vless", "tag": "in" }]
    })
}

pub async fn send_heartbeat(app: &Router, secret: &str, payload: Value) -> (StatusCode, Value) {
    agent_request(app, secret, "POST", "/api/v1/agent/heartbeat", Some(payload)).await
}

pub fn minimal_heartbeat() -> Value {
    json!({ "status": "healthy", "version": "1.4.2" })
}

pub fn parse_id(body: &Value) -> Uuid {
    body["id"]
        .as_str()
        .expect("id present")
        .parse()
        .expect("id is a uuid")
}

pub type HeartbeatResponse = api::HeartbeatResponse;
pub type StatusReportsResponse = api::StatusReportsResponse;
