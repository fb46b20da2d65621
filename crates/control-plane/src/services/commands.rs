use serde_json::Value;
use uuid::Uuid;

use common::api::CommandType;

use crate::app_state::AppState;
use crate::auth::AdminIdentity;
use crate::error::{ApiResult, AppError};
use crate::persistence::{self as db, commands, services};
use crate::services::nodes::fetch_owned;
use crate::validation;

const MAX_COMMAND_TIMEOUT_SECS: u32 = 3600;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct EnqueueCommandRequest {
    pub command_type: CommandType,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
}

pub async fn enqueue_command(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    req: EnqueueCommandRequest,
) -> ApiResult<db::CommandRecord> {
    fetch_owned(state, identity, node_id).await?;

    // Service-scoped commands must target a service on the same node.
    if let Some(service_id) = req.service_id {
        let owned = services::get_service(&state.db, service_id)
            .await?
            .filter(|svc| svc.node_id == node_id);
        if owned.is_none() {
            return Err(AppError::not_found("service instance not found"));
        }
    } else if req.command_type != CommandType::UpdateConfig {
        return Err(AppError::validation(
            "service_id is required for service lifecycle commands",
        ));
    }

    if let Some(parameters) = &req.parameters {
        validation::validate_config_document(parameters)?;
    }

    let timeout_seconds = req
        .timeout_seconds
        .unwrap_or(state.agent.delivery_timeout_secs as u32);
    if timeout_seconds == 0 || timeout_seconds > MAX_COMMAND_TIMEOUT_SECS {
        return Err(AppError::validation(format!(
            "timeout_seconds must be between 1 and {MAX_COMMAND_TIMEOUT_SECS}"
        )));
    }

    let record = commands::enqueue_command(
        &state.db,
        db::NewCommand {
            id: Uuid::new_v4(),
            node_id,
            service_id: req.service_id,
            command_type: req.command_type.into(),
            parameters: req.parameters,
            timeout_seconds,
        },
    )
    .await?;

    tracing::info!(node_id = %node_id, command_id = %record.id,
        command_type = ?record.command_type, "command enqueued");
    Ok(record)
}

pub async fn list_commands(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
) -> ApiResult<Vec<db::CommandRecord>> {
    fetch_owned(state, identity, node_id).await?;
    commands::list_commands(&state.db, node_id)
        .await
        .map_err(Into::into)
}
