use super::*;
use axum::routing::get;

pub fn router() -> Router<AppState> {
    Router::<AppState>::new().route("/health", get(healthz))
}

/// Served from the separate metrics listener.
pub fn metrics_router() -> Router<AppState> {
    Router::<AppState>::new().route("/metrics", get(metrics))
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub schema_version: Option<i64>,
    pub migrations_pending: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is up and serving", body = HealthResponse)),
    tag = "system"
)]
pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::version::VERSION,
        schema_version: state.schema.latest_applied,
        migrations_pending: state.schema.pending.len(),
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
