#[path = "support/common.rs"]
mod common;

use axum::http::StatusCode;
use common::{
    admin_request, admin_request_as, admin_request_status, agent_request, create_node,
    create_service, issue_token, minimal_heartbeat, parse_id, response_json, send_heartbeat,
    setup_app, setup_app_with_config, setup_apps, xray_config, TestAppConfig, OTHER_ADMIN_TOKEN,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// System surface.

#[tokio::test]
async fn health_needs_no_auth() {
    let (app, _db) = setup_app().await;
    let (status, body) = admin_request_as(&app, "no-such-token", "GET", "/health", None).await;
    // /health sits outside the admin route layer, so the bogus bearer is ignored.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["schema_version"].is_number());
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let (app, metrics_app, _db) = setup_apps().await;
    create_node(&app, "metrics-probe").await;

    let (status, _) = admin_request(&app, "GET", "/api/v1/nodes", None).await;
    assert_eq!(status, StatusCode::OK);

    let response = tower::ServiceExt::oneshot(
        metrics_app.clone(),
        axum::http::Request::builder()
            .method("GET")
            .uri("/metrics")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("xpanel_info"), "missing build info: {text}");
}

#[tokio::test]
async fn admin_endpoints_reject_missing_and_unknown_bearer_tokens() {
    let (app, _db) = setup_app().await;

    let response = tower::ServiceExt::oneshot(
        app.clone(),
        axum::http::Request::builder()
            .method("GET")
            .uri("/api/v1/nodes")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_INVALID");
    assert!(body["timestamp"].is_string());

    let (status, body) =
        admin_request_as(&app, "not-a-real-token", "GET", "/api/v1/nodes", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_INVALID");
}

// ---------------------------------------------------------------------------
// Node CRUD and ownership.

#[tokio::test]
async fn node_lifecycle_create_get_update_delete() {
    let (app, _db) = setup_app().await;

    let (status, body) = admin_request(
        &app,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": "Edge-FRA-1",
            "description": "Frankfurt edge",
            "hostname": "FRA1.Example.Net",
            "ip_address": "203.0.113.10",
            "ssh_port": 2222,
            "tags": ["eu", "Premium"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["name"], "Edge-FRA-1");
    assert_eq!(body["hostname"], "fra1.example.net");
    assert_eq!(body["ssh_port"], 2222);
    assert_eq!(body["status"], "active");
    assert_eq!(body["tags"], json!(["eu", "premium"]));
    assert!(body["agent_info"].is_null());
    let node_id = parse_id(&body);

    let (status, body) =
        admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "Frankfurt edge");

    // Explicit null clears the description; an absent field keeps it.
    let (status, body) = admin_request(
        &app,
        "PUT",
        &format!("/api/v1/nodes/{node_id}"),
        Some(json!({ "description": null, "ssh_port": 22 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["description"].is_null());
    assert_eq!(body["ssh_port"], 22);
    assert_eq!(body["hostname"], "fra1.example.net");

    let (status, _) =
        admin_request(&app, "DELETE", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) =
        admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn node_names_are_globally_unique() {
    let (app, _db) = setup_app().await;
    create_node(&app, "duplicate-name").await;

    let (status, body) = admin_request(
        &app,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": "duplicate-name",
            "hostname": "other.example.net",
            "ip_address": "203.0.113.11",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NODE_NAME_TAKEN");

    // Uniqueness is global, not per owner.
    let (status, body) = admin_request_as(
        &app,
        OTHER_ADMIN_TOKEN,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": "duplicate-name",
            "hostname": "third.example.net",
            "ip_address": "203.0.113.12",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NODE_NAME_TAKEN");
}

#[tokio::test]
async fn nodes_are_scoped_to_their_owner() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "owned-node").await;

    let (status, body) = admin_request_as(
        &app,
        OTHER_ADMIN_TOKEN,
        "GET",
        &format!("/api/v1/nodes/{node_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_OWNER");

    let (status, body) =
        admin_request_as(&app, OTHER_ADMIN_TOKEN, "GET", "/api/v1/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, body) = admin_request(&app, "GET", "/api/v1/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn node_list_filters_by_tag_and_search() {
    let (app, _db) = setup_app().await;
    let (status, _) = admin_request(
        &app,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": "edge-fra-1",
            "hostname": "fra1.example.net",
            "ip_address": "203.0.113.20",
            "tags": ["eu"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = admin_request(
        &app,
        "POST",
        "/api/v1/nodes",
        Some(json!({
            "name": "edge-sin-1",
            "hostname": "sin1.example.net",
            "ip_address": "203.0.113.21",
            "tags": ["apac"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = admin_request(&app, "GET", "/api/v1/nodes?tag=eu", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "edge-fra-1");

    let (status, body) = admin_request(&app, "GET", "/api/v1/nodes?search=edge-sin", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "edge-sin-1");
}

#[tokio::test]
async fn node_with_services_cannot_be_deleted() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "busy-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;

    let (status, body) =
        admin_request(&app, "DELETE", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NODE_HAS_SERVICES");

    let (status, _) = admin_request(
        &app,
        "DELETE",
        &format!("/api/v1/nodes/{node_id}/services/{service_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
        admin_request(&app, "DELETE", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// ---------------------------------------------------------------------------
// Service instances and configuration versioning.

#[tokio::test]
async fn service_ports_reject_boundaries_and_collisions() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "port-node").await;
    let services_uri = format!("/api/v1/nodes/{node_id}/services");

    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "zero-port",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 0,
            "config": xray_config(1),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    // Port 1 is the lowest valid port.
    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "low-port",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 1,
            "config": xray_config(1),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // 65536 does not fit the wire type.
    let status = admin_request_status(
        &app,
        "POST",
        &services_uri,
        json!({
            "name": "overflow-port",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 65536,
            "config": xray_config(443),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "max-port",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 65535,
            "config": xray_config(65535),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // Same port, same protocol: taken.
    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "max-port-clash",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 65535,
            "config": xray_config(65535),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PORT_IN_USE");

    // Same port, disjoint protocol: allowed.
    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "max-port-udp",
            "service_type": "wireguard",
            "protocol": "udp",
            "port": 65535,
            "config": { "interface": { "private_key": "AAA=", "address": "10.8.0.1/24" } },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // "both" overlaps every protocol on the port.
    let (status, body) = admin_request(
        &app,
        "POST",
        &services_uri,
        Some(json!({
            "name": "max-port-both",
            "service_type": "xray",
            "protocol": "both",
            "port": 65535,
            "config": xray_config(65535),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PORT_IN_USE");
}

#[tokio::test]
async fn invalid_engine_config_is_rejected() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "render-node").await;

    let (status, body) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/nodes/{node_id}/services"),
        Some(json!({
            "name": "no-inbounds",
            "service_type": "xray",
            "protocol": "tcp",
            "port": 8443,
            "config": { "outbounds": [] },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFIG_INVALID");
}

#[tokio::test]
async fn config_version_bumps_only_when_rendered_document_changes() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "version-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let service_uri = format!("/api/v1/nodes/{node_id}/services/{service_id}");

    let (status, body) = admin_request(&app, "GET", &service_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config_version"], 1);

    // Tag churn does not touch the rendered document.
    let (status, body) = admin_request(
        &app,
        "PUT",
        &service_uri,
        Some(json!({ "tags": ["relabelled"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["config_version"], 1);
    assert_eq!(body["tags"], json!(["relabelled"]));

    // A config change re-renders and bumps the version.
    let (status, body) = admin_request(
        &app,
        "PUT",
        &service_uri,
        Some(json!({
            "config": {
                "inbounds": [{ "port": 8443, "protocol": "vmess", "tag": "in" }]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["config_version"], 2);
}

// ---------------------------------------------------------------------------
// Agent tokens.

#[tokio::test]
async fn token_secret_is_shown_exactly_once() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "token-node").await;
    let (token_id, secret) = issue_token(&app, node_id).await;
    assert!(!secret.is_empty());

    let (status, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/agent-tokens/{token_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("secret").is_none(), "secret must not be re-read");
    assert!(body.get("secret_hash").is_none());
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn revoked_token_is_rejected_with_auth_revoked() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "revoke-node").await;
    let (token_id, secret) = issue_token(&app, node_id).await;

    let (status, _) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/agent-tokens/{token_id}/revoke"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "revoked");

    let (status, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_REVOKED");

    // Revocation is idempotent.
    let (status, _) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/agent-tokens/{token_id}/revoke"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_token_is_rejected_with_auth_expired() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "expiry-node").await;

    let (status, body) = admin_request(
        &app,
        "POST",
        "/api/v1/agent-tokens",
        Some(json!({
            "node_id": node_id,
            "name": "short-lived",
            "expires_at": "2020-01-01T00:00:00Z",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let secret = body["secret"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "expired");

    let (status, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_EXPIRED");
}

#[tokio::test]
async fn token_issuance_requires_node_ownership() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "foreign-node").await;

    let (status, body) = admin_request_as(
        &app,
        OTHER_ADMIN_TOKEN,
        "POST",
        "/api/v1/agent-tokens",
        Some(json!({ "node_id": node_id, "name": "intruder" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_OWNER");
}

// ---------------------------------------------------------------------------
// Agent plane: heartbeat, configurations, status reports.

#[tokio::test]
async fn onboarding_heartbeat_populates_agent_info() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "onboard-node").await;
    let (token_id, secret) = issue_token(&app, node_id).await;

    let (status, body) = send_heartbeat(
        &app,
        &secret,
        json!({
            "status": "healthy",
            "version": "1.4.2",
            "uptime_secs": 17,
            "os_info": { "name": "debian", "version": "12", "arch": "x86_64" },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(body["commands"], json!([]));

    let (status, body) =
        admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["agent_info"]["version"], "1.4.2");
    assert_eq!(body["agent_info"]["status"], "connected");
    assert_eq!(body["agent_info"]["token_id"], token_id.to_string());
    assert_eq!(body["os_info"]["name"], "debian");
    assert!(body["last_seen"].is_string());
}

#[tokio::test]
async fn heartbeat_health_drives_node_status_but_preserves_maintenance() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "health-node").await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (status, _) = send_heartbeat(
        &app,
        &secret,
        json!({ "status": "error", "version": "1.4.2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(body["status"], "error");

    // Degraded agents still count as an active node.
    let (status, _) = send_heartbeat(
        &app,
        &secret,
        json!({ "status": "degraded", "version": "1.4.2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(body["status"], "active");

    // An operator-set maintenance flag survives healthy heartbeats.
    let (status, _) = admin_request(
        &app,
        "PUT",
        &format!("/api/v1/nodes/{node_id}"),
        Some(json!({ "status": "maintenance" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = admin_request(&app, "GET", &format!("/api/v1/nodes/{node_id}"), None).await;
    assert_eq!(body["status"], "maintenance");
}

#[tokio::test]
async fn heartbeat_applies_embedded_service_statuses() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "embed-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (status, body) = send_heartbeat(
        &app,
        &secret,
        json!({
            "status": "healthy",
            "version": "1.4.2",
            "services": [{
                "service_id": service_id,
                "status": "running",
                "message": "listening",
                "metrics": { "cpu_percent": 2.5, "connections": 41 },
            }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/services/{service_id}"),
        None,
    )
    .await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["status_message"], "listening");
    assert_eq!(body["metrics"]["connections"], 41);
    assert!(body["last_seen"].is_string());
}

#[tokio::test]
async fn configurations_are_versioned_and_filterable() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "config-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (status, body) = agent_request(
        &app,
        &secret,
        "GET",
        "/api/v1/agent/services/configurations",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["service_id"], service_id.to_string());
    assert_eq!(entries[0]["version"], 1);
    let checksum = entries[0]["checksum"].as_str().unwrap().to_string();
    assert_eq!(checksum.len(), 64);
    // Renderer injects engine defaults into the delivered document.
    assert!(entries[0]["configuration"]["outbounds"].is_array());

    // Unchanged config: same version, same checksum.
    let (_, body) = agent_request(
        &app,
        &secret,
        "GET",
        "/api/v1/agent/services/configurations",
        None,
    )
    .await;
    assert_eq!(body[0]["version"], 1);
    assert_eq!(body[0]["checksum"], checksum.as_str());

    // Filter excludes other engines.
    let (status, body) = agent_request(
        &app,
        &secret,
        "GET",
        "/api/v1/agent/services/configurations?service_types=wireguard,nginx",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, body) = agent_request(
        &app,
        &secret,
        "GET",
        "/api/v1/agent/services/configurations?service_types=bogus",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn command_lifecycle_enqueue_deliver_ack() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "command-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (status, body) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/nodes/{node_id}/commands"),
        Some(json!({
            "command_type": "restart_service",
            "service_id": service_id,
            "timeout_seconds": 60,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["state"], "pending");
    let command_id = parse_id(&body);

    // First heartbeat pops the command.
    let (status, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::OK);
    let commands = body["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command_id"], command_id.to_string());
    assert_eq!(commands[0]["command_type"], "restart_service");
    assert_eq!(commands[0]["timeout_seconds"], 60);

    // Exactly-once delivery: the next heartbeat gets nothing.
    let (_, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(body["commands"], json!([]));

    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/commands"),
        None,
    )
    .await;
    assert_eq!(body[0]["state"], "delivered");

    // The agent acks via a status report.
    let (status, body) = agent_request(
        &app,
        &secret,
        "POST",
        "/api/v1/agent/services/status_reports",
        Some(json!({
            "reports": [{
                "service_id": service_id,
                "status": "running",
                "command_result": { "command_id": command_id, "success": true },
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 0);

    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/commands"),
        None,
    )
    .await;
    assert_eq!(body[0]["state"], "acked");
    assert!(body[0]["completed_at"].is_string());
}

#[tokio::test]
async fn failed_command_result_records_the_error() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "fail-node").await;
    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (_, body) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/nodes/{node_id}/commands"),
        Some(json!({ "command_type": "stop_service", "service_id": service_id })),
    )
    .await;
    let command_id = parse_id(&body);

    let (_, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(body["commands"].as_array().unwrap().len(), 1);

    let (status, body) = agent_request(
        &app,
        &secret,
        "POST",
        "/api/v1/agent/services/status_reports",
        Some(json!({
            "reports": [{
                "service_id": service_id,
                "status": "error",
                "command_result": {
                    "command_id": command_id,
                    "success": false,
                    "error": "unit not found",
                },
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["processed"], 1);

    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/commands"),
        None,
    )
    .await;
    assert_eq!(body[0]["state"], "failed");
    assert_eq!(body[0]["error"], "unit not found");
}

#[tokio::test]
async fn status_reports_skip_services_of_other_nodes() {
    let (app, _db) = setup_app().await;
    let node_a = create_node(&app, "report-node-a").await;
    let node_b = create_node(&app, "report-node-b").await;
    let service_a = create_service(&app, node_a, "proxy-a", 8443).await;
    let service_b = create_service(&app, node_b, "proxy-b", 8443).await;
    let (_token_a, secret_a) = issue_token(&app, node_a).await;

    let (status, body) = agent_request(
        &app,
        &secret_a,
        "POST",
        "/api/v1/agent/services/status_reports",
        Some(json!({
            "reports": [
                { "service_id": service_a, "status": "running" },
                { "service_id": service_b, "status": "running" },
                { "service_id": uuid::Uuid::new_v4(), "status": "running" },
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 2);

    // The foreign service was not touched.
    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_b}/services/{service_b}"),
        None,
    )
    .await;
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn status_report_store_failure_skips_only_that_report() {
    let (app, db) = setup_app().await;
    let node_id = create_node(&app, "partial-batch-node").await;
    let service_a = create_service(&app, node_id, "proxy-a", 8443).await;
    let service_b = create_service(&app, node_id, "proxy-b", 8444).await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    // Breaking the command store makes the first report fail mid-write.
    sqlx::query("DROP TABLE pending_commands")
        .execute(&db)
        .await
        .expect("drop table");

    let (status, body) = agent_request(
        &app,
        &secret,
        "POST",
        "/api/v1/agent/services/status_reports",
        Some(json!({
            "reports": [
                {
                    "service_id": service_a,
                    "status": "running",
                    "command_result": { "command_id": uuid::Uuid::new_v4(), "success": true },
                },
                { "service_id": service_b, "status": "running" },
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["processed"], 1);
    assert_eq!(body["skipped"], 1);

    // The failed report rolled back entirely; the later one still landed.
    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/services/{service_a}"),
        None,
    )
    .await;
    assert_eq!(body["status"], "stopped");
    let (_, body) = admin_request(
        &app,
        "GET",
        &format!("/api/v1/nodes/{node_id}/services/{service_b}"),
        None,
    )
    .await;
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn command_enqueue_validates_target_and_timeout() {
    let (app, _db) = setup_app().await;
    let node_id = create_node(&app, "validate-node").await;
    let commands_uri = format!("/api/v1/nodes/{node_id}/commands");

    // Lifecycle commands need a service target.
    let (status, body) = admin_request(
        &app,
        "POST",
        &commands_uri,
        Some(json!({ "command_type": "restart_service" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    // update_config may target the whole node.
    let (status, body) = admin_request(
        &app,
        "POST",
        &commands_uri,
        Some(json!({ "command_type": "update_config" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let service_id = create_service(&app, node_id, "proxy", 8443).await;
    let (status, body) = admin_request(
        &app,
        "POST",
        &commands_uri,
        Some(json!({
            "command_type": "restart_service",
            "service_id": service_id,
            "timeout_seconds": 0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "VALIDATION_FAILED");

    // A service on another node is not a valid target.
    let other_node = create_node(&app, "validate-node-b").await;
    let (status, body) = admin_request(
        &app,
        "POST",
        &format!("/api/v1/nodes/{other_node}/commands"),
        Some(json!({ "command_type": "restart_service", "service_id": service_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}

#[tokio::test]
async fn agent_rate_limit_returns_429() {
    let (app, _db) = setup_app_with_config(TestAppConfig {
        rate_limit_per_minute: 2,
        ..Default::default()
    })
    .await;
    let node_id = create_node(&app, "limited-node").await;
    let (_token_id, secret) = issue_token(&app, node_id).await;

    let (status, _) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send_heartbeat(&app, &secret, minimal_heartbeat()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
}
