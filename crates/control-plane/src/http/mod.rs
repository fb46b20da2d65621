use crate::{
    app_state::AppState,
    auth::{require_admin_auth, require_agent_auth, AdminIdentity, AgentIdentity},
    error::{ApiResult, AppError},
    metrics::HttpMetricsLayer,
    persistence::{self as db},
    services,
};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    Json, Router,
};
use chrono::{DateTime, Utc};
use common::api::{
    AgentInfo, CommandState, CommandType, HeartbeatRequest, HeartbeatResponse, NodeStatus, OsInfo,
    Protocol, ServiceConfigurationEntry, ServiceMetrics, ServiceStatus, ServiceType,
    StatusReportsRequest, StatusReportsResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};
use uuid::Uuid;

mod agents;
mod error_mapper;
mod nodes;
mod system;
mod tokens;

pub fn build_router(state: AppState) -> Router<AppState> {
    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(HttpMetricsLayer);

    Router::<AppState>::new()
        .merge(system::router())
        .merge(agents::router(state.clone()))
        .merge(nodes::router(state.clone()))
        .merge(tokens::router(state))
        .layer(middleware_stack)
}

pub fn build_metrics_router() -> Router<AppState> {
    system::metrics_router()
}

// ---------------------------------------------------------------------------
// Wire views. Records carry columns (owner subject, secret hashes) the
// API must not leak; views are the explicit allow-list.

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct NodeView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub hostname: String,
    pub ip_address: String,
    pub ssh_port: u16,
    pub status: NodeStatus,
    pub tags: Vec<String>,
    pub os_info: Option<OsInfo>,
    pub agent_info: Option<AgentInfo>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<db::NodeRecord> for NodeView {
    fn from(record: db::NodeRecord) -> Self {
        let agent_info = match (
            record.agent_version,
            record.agent_status,
            record.agent_last_contact,
            record.agent_token_id,
        ) {
            (Some(version), Some(status), Some(last_contact), Some(token_id)) => Some(AgentInfo {
                version,
                status: status.into(),
                last_contact,
                token_id,
            }),
            _ => None,
        };
        NodeView {
            id: record.id,
            name: record.name,
            description: record.description,
            hostname: record.hostname,
            ip_address: record.ip_address,
            ssh_port: record.ssh_port,
            status: record.status.into(),
            tags: record.tags.0,
            os_info: record.os_info.map(|info| info.0),
            agent_info,
            last_seen: record.last_seen,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ServiceView {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub service_type: ServiceType,
    pub protocol: Protocol,
    pub port: u16,
    pub status: ServiceStatus,
    pub config: Value,
    pub config_version: i64,
    pub metrics: Option<ServiceMetrics>,
    pub status_message: Option<String>,
    pub tags: Vec<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<db::ServiceRecord> for ServiceView {
    fn from(record: db::ServiceRecord) -> Self {
        ServiceView {
            id: record.id,
            node_id: record.node_id,
            name: record.name,
            service_type: record.service_type.into(),
            protocol: record.protocol.into(),
            port: record.port as u16,
            status: record.status.into(),
            config: record.config.0,
            config_version: record.config_version,
            metrics: record.metrics.map(|m| m.0),
            status_message: record.status_message,
            tags: record.tags.0,
            last_seen: record.last_seen,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct TokenView {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub status: db::tokens::TokenStatusColumn,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<db::AgentTokenRecord> for TokenView {
    fn from(record: db::AgentTokenRecord) -> Self {
        let status = record.effective_status(Utc::now());
        TokenView {
            id: record.id,
            node_id: record.node_id,
            name: record.name,
            status,
            expires_at: record.expires_at,
            last_used_at: record.last_used_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Returned exactly once, on issue. The secret is not recoverable later.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct IssuedTokenView {
    #[serde(flatten)]
    pub token: TokenView,
    pub secret: String,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CommandView {
    pub id: Uuid,
    pub node_id: Uuid,
    pub service_id: Option<Uuid>,
    pub command_type: CommandType,
    pub state: CommandState,
    pub parameters: Option<Value>,
    pub timeout_seconds: i64,
    pub attempts: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<db::CommandRecord> for CommandView {
    fn from(record: db::CommandRecord) -> Self {
        CommandView {
            id: record.id,
            node_id: record.node_id,
            service_id: record.service_id,
            command_type: record.command_type.into(),
            state: record.state.into(),
            parameters: record.parameters.map(|p| p.0),
            timeout_seconds: record.timeout_seconds,
            attempts: record.attempts,
            delivered_at: record.delivered_at,
            completed_at: record.completed_at,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAPI

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "agent_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    crate::auth::AGENT_TOKEN_HEADER,
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        system::healthz,
        agents::heartbeat,
        agents::service_configurations,
        agents::status_reports,
        nodes::create_node,
        nodes::list_nodes,
        nodes::get_node,
        nodes::update_node,
        nodes::delete_node,
        nodes::create_service,
        nodes::list_services,
        nodes::get_service,
        nodes::update_service,
        nodes::delete_service,
        nodes::enqueue_command,
        nodes::list_commands,
        tokens::issue_token,
        tokens::list_tokens,
        tokens::get_token,
        tokens::update_token,
        tokens::revoke_token,
        tokens::delete_token,
    ),
    components(schemas(
        NodeView,
        ServiceView,
        TokenView,
        IssuedTokenView,
        CommandView,
        services::nodes::CreateNodeRequest,
        services::nodes::UpdateNodeRequest,
        services::instances::CreateServiceRequest,
        services::instances::UpdateServiceRequest,
        services::commands::EnqueueCommandRequest,
        services::tokens::IssueTokenRequest,
        services::tokens::UpdateTokenRequest,
        common::api::HeartbeatRequest,
        common::api::HeartbeatResponse,
        common::api::StatusReportsRequest,
        common::api::StatusReportsResponse,
        common::api::ServiceConfiguration,
        common::api::ServiceConfigurationError,
    )),
    modifiers(&SecuritySchemes),
    tags(
        (name = "system", description = "Health and metrics"),
        (name = "agent", description = "Agent-facing endpoints"),
        (name = "nodes", description = "Node and service administration"),
        (name = "tokens", description = "Agent token administration"),
    )
)]
pub struct ApiDoc;
