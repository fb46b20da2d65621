use std::{future::Future, pin::Pin, sync::Arc};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::{
    auth::AdminIdentity,
    config::{AgentConfig, LimitsConfig},
    jwks::JwksCache,
    persistence,
    rate_limit::AgentRateLimiter,
};

/// Shared application state passed into handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: persistence::Db,
    pub token_pepper: String,
    pub agent: AgentConfig,
    pub limits: LimitsConfig,
    /// Pluggable validator for admin bearer tokens (JWKS by default).
    pub admin_token_validator: AdminTokenValidator,
    pub jwks: JwksCache,
    /// Optional limiter for authenticated agent endpoints.
    pub agent_limiter: Option<AgentLimiterRef>,
    pub metrics_handle: PrometheusHandle,
    pub schema: persistence::MigrationSnapshot,
}

/// Callback used to validate admin bearer tokens. Tests swap this for
/// a static validator so no identity provider is needed.
pub type AdminTokenValidator = Arc<
    dyn for<'a> Fn(
            &'a AppState,
            &'a str,
        )
            -> Pin<Box<dyn Future<Output = crate::Result<Option<AdminIdentity>>> + Send + 'a>>
        + Send
        + Sync,
>;

pub type AgentLimiterRef = Arc<tokio::sync::Mutex<AgentRateLimiter>>;

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
