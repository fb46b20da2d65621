use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::{
    extract::MatchedPath,
    http::{Request, Response as HttpResponse},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower::{Layer, Service};

static METRICS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

pub fn init_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .add_global_label("app_version", crate::version::VERSION)
                .install_recorder()
                .expect("metrics recorder already installed")
        })
        .clone()
}

pub fn record_build_info(snapshot: &crate::persistence::MigrationSnapshot) {
    let schema_version = snapshot
        .latest_applied
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string());
    let target_version = snapshot
        .latest_available
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string());

    gauge!(
        "xpanel_info",
        "version" => crate::version::VERSION,
        "git_sha" => crate::version::GIT_SHA,
        "schema_version" => schema_version,
        "schema_target_version" => target_version
    )
    .set(1.0);

    gauge!("xpanel_schema_version").set(snapshot.latest_applied.unwrap_or_default() as f64);
    gauge!("xpanel_schema_target_version")
        .set(snapshot.latest_available.unwrap_or_default() as f64);
    gauge!("xpanel_migrations_pending").set(snapshot.pending.len() as f64);
}

/// Records a request counter and latency histogram per matched route.
#[derive(Clone, Default)]
pub struct HttpMetricsLayer;

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService { inner }
    }
}

#[derive(Clone)]
pub struct HttpMetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = HttpResponse<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().as_str().to_string();
        let path = req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        let request_id = crate::telemetry::request_id_from_request(&req);
        let started = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let status = response.status().as_u16().to_string();
            let elapsed = started.elapsed();
            tracing::debug!(
                request_id = request_id.as_deref().unwrap_or("-"),
                method = %method,
                path = %path,
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "request completed"
            );
            counter!(
                "xpanel_http_requests_total",
                "method" => method.clone(),
                "path" => path.clone(),
                "status" => status
            )
            .increment(1);
            histogram!(
                "xpanel_http_request_duration_seconds",
                "method" => method,
                "path" => path
            )
            .record(elapsed.as_secs_f64());
            Ok(response)
        })
    }
}
