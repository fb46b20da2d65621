use chrono::Utc;
use tracing::{debug, warn};

use common::api::{
    AgentConnectionStatus, AgentHealth, CommandPayload, HeartbeatRequest, HeartbeatResponse,
    ServiceConfiguration, ServiceConfigurationEntry, ServiceConfigurationError, ServiceType,
    StatusReportsRequest, StatusReportsResponse,
};

use crate::app_state::AppState;
use crate::auth::AgentIdentity;
use crate::error::ApiResult;
use crate::persistence::{self as db, bundles, commands, nodes, services};
use crate::render::{self, RenderContext};

/// Heartbeat: one transaction covering the node touch, embedded
/// service statuses, and the command pop. Either the whole heartbeat
/// lands or the agent retries it.
pub async fn heartbeat(
    state: &AppState,
    identity: &AgentIdentity,
    req: HeartbeatRequest,
) -> ApiResult<HeartbeatResponse> {
    let now = Utc::now();
    let node_id = identity.node_id;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;

    let node = nodes::get_node_in_tx(&mut tx, node_id)
        .await?
        .ok_or_else(|| crate::error::AppError::not_found("node not found"))?;

    let node_status = map_agent_health(node.status, req.status);
    if req.status == AgentHealth::Degraded {
        warn!(node_id = %node_id, "agent reported degraded health");
    }

    nodes::record_agent_contact(
        &mut tx,
        node_id,
        &db::AgentContact {
            version: req.version.clone(),
            status: agent_connection_status(req.status).into(),
            token_id: identity.token_id,
            os_info: req.os_info.clone(),
            node_status,
            seen_at: now,
        },
    )
    .await?;

    for update in &req.services {
        let applied = services::apply_runtime_update(
            &mut tx,
            node_id,
            update.service_id,
            &db::ServiceRuntimeUpdate {
                status: update.status.into(),
                metrics: update.metrics.clone(),
                message: update.message.clone(),
            },
        )
        .await?;
        if applied == 0 {
            debug!(node_id = %node_id, service_id = %update.service_id,
                "heartbeat referenced unknown service, ignoring");
        }
    }

    let popped =
        commands::pop_pending_commands(&mut tx, node_id, state.agent.command_batch, now).await?;

    tx.commit().await.map_err(anyhow::Error::from)?;

    let commands = popped
        .into_iter()
        .map(|cmd| CommandPayload {
            command_id: cmd.id,
            command_type: cmd.command_type.into(),
            service_id: cmd.service_id,
            parameters: cmd.parameters.map(|p| p.0),
            timeout_seconds: cmd.timeout_seconds as u32,
            created_at: cmd.created_at,
        })
        .collect();

    Ok(HeartbeatResponse {
        status: "acknowledged".to_string(),
        commands,
        timestamp: now,
    })
}

/// healthy → active, degraded → active (logged above), error → error.
/// A node parked in maintenance stays there regardless of agent health.
fn map_agent_health(
    current: db::nodes::NodeStatusColumn,
    health: AgentHealth,
) -> db::nodes::NodeStatusColumn {
    if current == db::nodes::NodeStatusColumn::Maintenance {
        return current;
    }
    match health {
        AgentHealth::Healthy | AgentHealth::Degraded => db::nodes::NodeStatusColumn::Active,
        AgentHealth::Error => db::nodes::NodeStatusColumn::Error,
    }
}

fn agent_connection_status(health: AgentHealth) -> AgentConnectionStatus {
    match health {
        AgentHealth::Healthy | AgentHealth::Degraded => AgentConnectionStatus::Connected,
        AgentHealth::Error => AgentConnectionStatus::Error,
    }
}

/// Serve configuration bundles for every service on the calling node.
/// Bundles are cached; a fresh render is only persisted when the
/// document moved since the cached copy. Services whose config no
/// longer renders come back as error entries instead of bundles.
pub async fn get_service_configurations(
    state: &AppState,
    identity: &AgentIdentity,
    service_types: Option<Vec<ServiceType>>,
) -> ApiResult<Vec<ServiceConfigurationEntry>> {
    let node_id = identity.node_id;
    let all = services::list_services(&state.db, node_id).await?;
    let filtered: Vec<_> = match &service_types {
        Some(kinds) => all
            .into_iter()
            .filter(|svc| kinds.contains(&svc.service_type.into()))
            .collect(),
        None => all,
    };

    let mut entries = Vec::with_capacity(filtered.len());
    for service in filtered {
        let service_type: ServiceType = service.service_type.into();
        let ctx = RenderContext {
            service_name: service.name.clone(),
            port: service.port as u16,
            protocol: service.protocol.into(),
        };
        let rendered = match render::render_for(service_type, &ctx, &service.config.0) {
            Ok(rendered) => rendered,
            Err(err) => {
                entries.push(ServiceConfigurationEntry::Invalid(
                    ServiceConfigurationError {
                        service_id: service.id,
                        error: err.message,
                    },
                ));
                continue;
            }
        };

        let cached = bundles::get_bundle(&state.db, service.id).await?;
        let bundle = match cached {
            Some(bundle) if bundle.checksum == rendered.checksum => bundle,
            _ => {
                let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
                bundles::upsert_bundle(
                    &mut tx,
                    service.id,
                    service.service_type,
                    rendered.doc.clone(),
                    &rendered.checksum,
                    Utc::now(),
                )
                .await?;
                tx.commit().await.map_err(anyhow::Error::from)?;
                bundles::get_bundle(&state.db, service.id)
                    .await?
                    .ok_or_else(|| {
                        crate::error::AppError::internal("bundle row missing after upsert")
                    })?
            }
        };

        entries.push(ServiceConfigurationEntry::Bundle(ServiceConfiguration {
            service_id: service.id,
            service_type,
            configuration: bundle.rendered.0,
            version: bundle.version,
            checksum: bundle.checksum,
            updated_at: bundle.updated_at,
        }));
    }

    Ok(entries)
}

/// Per-item best-effort: a report for a service this node does not own
/// is counted as skipped, and one report failing to store never aborts
/// the rest of the batch.
pub async fn submit_status_reports(
    state: &AppState,
    identity: &AgentIdentity,
    req: StatusReportsRequest,
) -> ApiResult<StatusReportsResponse> {
    let node_id = identity.node_id;
    let mut processed = 0usize;
    let mut skipped = 0usize;

    for report in &req.reports {
        match apply_status_report(state, node_id, report).await {
            Ok(true) => processed += 1,
            Ok(false) => skipped += 1,
            Err(err) => {
                warn!(node_id = %node_id, service_id = %report.service_id, error = %err,
                    "status report failed to store");
                skipped += 1;
            }
        }
    }

    Ok(StatusReportsResponse { processed, skipped })
}

async fn apply_status_report(
    state: &AppState,
    node_id: uuid::Uuid,
    report: &common::api::ServiceStatusReport,
) -> crate::Result<bool> {
    let mut tx = state.db.begin().await?;
    let applied = services::apply_runtime_update(
        &mut tx,
        node_id,
        report.service_id,
        &db::ServiceRuntimeUpdate {
            status: report.status.into(),
            metrics: report.metrics.clone(),
            message: report.message.clone(),
        },
    )
    .await?;

    if applied == 0 {
        return Ok(false);
    }

    if let Some(result) = &report.command_result {
        let transitioned = commands::complete_command(
            &mut tx,
            node_id,
            result.command_id,
            result.success,
            result.error.as_deref(),
        )
        .await?;
        if transitioned == 0 {
            debug!(node_id = %node_id, command_id = %result.command_id,
                "command result referenced command not in delivered state");
        }
    }

    tx.commit().await?;
    Ok(true)
}
