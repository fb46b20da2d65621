use super::*;
use tower_http::limit::RequestBodyLimitLayer;

pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.limits.agent_body_bytes;

    Router::<AppState>::new()
        .route(
            "/api/v1/agent/heartbeat",
            axum::routing::post(heartbeat),
        )
        .route(
            "/api/v1/agent/services/configurations",
            axum::routing::get(service_configurations),
        )
        .route(
            "/api/v1/agent/services/status_reports",
            axum::routing::post(status_reports),
        )
        .layer(RequestBodyLimitLayer::new(body_limit as usize))
        .route_layer(middleware::from_fn_with_state(state, require_agent_auth))
}

#[utoipa::path(
    post,
    path = "/api/v1/agent/heartbeat",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat acknowledged, pending commands attached", body = HeartbeatResponse),
        (status = 401, description = "Invalid, revoked or expired agent token"),
    ),
    security(("agent_token" = [])),
    tag = "agent"
)]
pub(crate) async fn heartbeat(
    State(state): State<AppState>,
    Extension(identity): Extension<AgentIdentity>,
    Json(payload): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let response = services::agent::heartbeat(&state, &identity, payload).await?;
    Ok(Json(response))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ConfigurationsQuery {
    /// Comma-separated service type filter.
    pub service_types: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/agent/services/configurations",
    params(("service_types" = Option<String>, Query, description = "Comma-separated service type filter")),
    responses(
        (status = 200, description = "Configuration bundles for the calling node"),
        (status = 401, description = "Invalid, revoked or expired agent token"),
    ),
    security(("agent_token" = [])),
    tag = "agent"
)]
pub(crate) async fn service_configurations(
    State(state): State<AppState>,
    Extension(identity): Extension<AgentIdentity>,
    Query(query): Query<ConfigurationsQuery>,
) -> ApiResult<Json<Vec<ServiceConfigurationEntry>>> {
    let filter = parse_service_types(query.service_types.as_deref())?;
    let entries = services::agent::get_service_configurations(&state, &identity, filter).await?;
    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/api/v1/agent/services/status_reports",
    request_body = StatusReportsRequest,
    responses(
        (status = 200, description = "Batch accepted", body = StatusReportsResponse),
        (status = 401, description = "Invalid, revoked or expired agent token"),
    ),
    security(("agent_token" = [])),
    tag = "agent"
)]
pub(crate) async fn status_reports(
    State(state): State<AppState>,
    Extension(identity): Extension<AgentIdentity>,
    Json(payload): Json<StatusReportsRequest>,
) -> ApiResult<Json<StatusReportsResponse>> {
    let response = services::agent::submit_status_reports(&state, &identity, payload).await?;
    Ok(Json(response))
}

fn parse_service_types(raw: Option<&str>) -> ApiResult<Option<Vec<ServiceType>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut kinds = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let kind = serde_json::from_value::<ServiceType>(Value::String(part.to_string()))
            .map_err(|_| AppError::validation(format!("unknown service type '{part}'")))?;
        kinds.push(kind);
    }
    if kinds.is_empty() {
        return Ok(None);
    }
    Ok(Some(kinds))
}
