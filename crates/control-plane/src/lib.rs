pub mod app_state;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod jwks;
pub mod metrics;
pub mod openapi;
pub mod persistence;
pub mod rate_limit;
pub mod render;
pub mod routes;
pub mod services;
pub mod tasks;
pub mod telemetry;
pub mod tokens;
pub mod validation;
pub mod version;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::{env, future::Future, net::SocketAddr, sync::Arc};

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app_state::{AgentLimiterRef, AppState};
use crate::jwks::JwksCache;
use crate::metrics::{init_metrics_recorder, record_build_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    Serve,
    MigrationsDryRun,
}

pub fn parse_command() -> Result<CommandMode> {
    let mut args = env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CommandMode::Serve);
    };

    match first.as_str() {
        "serve" => Ok(CommandMode::Serve),
        "migrate" => match args.next().as_deref() {
            Some("--dry-run") => Ok(CommandMode::MigrationsDryRun),
            Some(other) => anyhow::bail!("unknown migrate option: {other}"),
            None => anyhow::bail!("migrate requires --dry-run; migrations apply on startup"),
        },
        other => anyhow::bail!("unknown command: {other}"),
    }
}

pub async fn run(mode: CommandMode) -> Result<()> {
    run_with_shutdown(mode, shutdown_signal()).await
}

pub async fn run_with_shutdown<S>(mode: CommandMode, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app_config = config::load()?;
    let metrics_handle = init_metrics_recorder();

    let db_pool = persistence::migrations::init_pool(&app_config.database.url).await?;

    if mode == CommandMode::MigrationsDryRun {
        let snapshot = persistence::migrations::dry_run_migrations(&db_pool).await?;
        info!(
            current_version = snapshot.latest_applied,
            target_version = snapshot.latest_available,
            pending = snapshot.pending.len(),
            "migration dry-run completed"
        );
        return Ok(());
    }

    if app_config.features.migrations_dry_run_on_start {
        let snapshot = persistence::migrations::dry_run_migrations(&db_pool).await?;
        info!(
            pending = snapshot.pending.len(),
            "pre-flight migration dry-run completed"
        );
    }

    let migration_outcome = persistence::migrations::run_migrations(&db_pool).await?;
    if migration_outcome.applied.is_empty() {
        info!(
            schema_version = migration_outcome.snapshot.latest_applied,
            "database schema is up to date"
        );
    } else {
        for label in &migration_outcome.applied {
            info!(
                version = label.version,
                description = %label.description,
                "applied database migration"
            );
        }
    }
    record_build_info(&migration_outcome.snapshot);

    let agent_limiter: Option<AgentLimiterRef> = match app_config.agent.rate_limit_per_minute {
        0 => None,
        per_minute => Some(Arc::new(tokio::sync::Mutex::new(
            rate_limit::AgentRateLimiter::per_minute(per_minute),
        ))),
    };

    let state = AppState {
        db: db_pool,
        token_pepper: app_config.tokens.pepper.clone(),
        agent: app_config.agent.clone(),
        limits: app_config.limits.clone(),
        admin_token_validator: Arc::new(|state, token| {
            Box::pin(auth::jwks_admin_token_validator(state, token))
        }),
        jwks: JwksCache::new(app_config.identity.clone()),
        agent_limiter,
        metrics_handle,
        schema: migration_outcome.snapshot,
    };

    tokio::spawn(tasks::commands::command_sweep_loop(state.clone()));
    tokio::spawn(tasks::liveness::liveness_loop(state.clone()));

    let api_addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {err}"))?;
    let metrics_addr: SocketAddr =
        format!("{}:{}", app_config.metrics.host, app_config.metrics.port)
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid metrics listen address: {err}"))?;

    let api = routes::build_router(state.clone()).with_state(state.clone());
    let metrics_app = routes::build_metrics_router().with_state(state);

    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    info!(%api_addr, version = version::VERSION, "control plane listening");
    info!(%metrics_addr, "metrics endpoint listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown.await;
        let _ = signal_tx.send(true);
    });

    let mut api_shutdown = shutdown_rx.clone();
    let mut metrics_shutdown = shutdown_rx;

    let mut api_task = tokio::spawn(async move {
        axum::serve(api_listener, api.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });
    let mut metrics_task = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.changed().await;
            })
            .await
    });

    tokio::select! {
        res = &mut api_task => {
            let _ = shutdown_tx.send(true);
            res.map_err(|err| anyhow::anyhow!("api task failed: {err}"))?
                .map_err(|err| anyhow::anyhow!("api server failed: {err}"))?;
            metrics_task
                .await
                .map_err(|err| anyhow::anyhow!("metrics task failed: {err}"))?
                .map_err(|err| anyhow::anyhow!("metrics server failed: {err}"))?;
        }
        res = &mut metrics_task => {
            let _ = shutdown_tx.send(true);
            res.map_err(|err| anyhow::anyhow!("metrics task failed: {err}"))?
                .map_err(|err| anyhow::anyhow!("metrics server failed: {err}"))?;
            api_task
                .await
                .map_err(|err| anyhow::anyhow!("api task failed: {err}"))?
                .map_err(|err| anyhow::anyhow!("api server failed: {err}"))?;
        }
    }

    info!("control plane shut down cleanly");
    Ok(())
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
