use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use common::api::{CommandState, CommandType};

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum CommandTypeColumn {
    RestartService,
    StartService,
    StopService,
    UpdateConfig,
}

impl From<CommandType> for CommandTypeColumn {
    fn from(kind: CommandType) -> Self {
        match kind {
            CommandType::RestartService => CommandTypeColumn::RestartService,
            CommandType::StartService => CommandTypeColumn::StartService,
            CommandType::StopService => CommandTypeColumn::StopService,
            CommandType::UpdateConfig => CommandTypeColumn::UpdateConfig,
        }
    }
}

impl From<CommandTypeColumn> for CommandType {
    fn from(kind: CommandTypeColumn) -> Self {
        match kind {
            CommandTypeColumn::RestartService => CommandType::RestartService,
            CommandTypeColumn::StartService => CommandType::StartService,
            CommandTypeColumn::StopService => CommandType::StopService,
            CommandTypeColumn::UpdateConfig => CommandType::UpdateConfig,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CommandStateColumn {
    Pending,
    Delivered,
    Acked,
    Failed,
    Expired,
}

impl From<CommandStateColumn> for CommandState {
    fn from(state: CommandStateColumn) -> Self {
        match state {
            CommandStateColumn::Pending => CommandState::Pending,
            CommandStateColumn::Delivered => CommandState::Delivered,
            CommandStateColumn::Acked => CommandState::Acked,
            CommandStateColumn::Failed => CommandState::Failed,
            CommandStateColumn::Expired => CommandState::Expired,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CommandRecord {
    pub id: Uuid,
    pub node_id: Uuid,
    pub service_id: Option<Uuid>,
    pub command_type: CommandTypeColumn,
    #[sqlx(rename = "parameters_json")]
    pub parameters: Option<Json<Value>>,
    pub state: CommandStateColumn,
    pub timeout_seconds: i64,
    pub attempts: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCommand {
    pub id: Uuid,
    pub node_id: Uuid,
    pub service_id: Option<Uuid>,
    pub command_type: CommandTypeColumn,
    pub parameters: Option<Value>,
    pub timeout_seconds: u32,
}

const COMMAND_COLUMNS: &str = r#"
    id,
    node_id,
    service_id,
    command_type,
    parameters_json,
    state,
    timeout_seconds,
    attempts,
    delivered_at,
    completed_at,
    error,
    created_at,
    updated_at
"#;

pub async fn enqueue_command(pool: &Db, new_command: NewCommand) -> Result<CommandRecord> {
    sqlx::query(
        r#"
        INSERT INTO pending_commands (
            id,
            node_id,
            service_id,
            command_type,
            parameters_json,
            state,
            timeout_seconds,
            created_at,
            updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, datetime('now'), datetime('now'))
        "#,
    )
    .bind(new_command.id)
    .bind(new_command.node_id)
    .bind(new_command.service_id)
    .bind(new_command.command_type)
    .bind(new_command.parameters.map(Json))
    .bind(new_command.timeout_seconds as i64)
    .execute(pool)
    .await?;

    get_command(pool, new_command.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("command insert did not return row"))
}

pub async fn get_command(pool: &Db, id: Uuid) -> Result<Option<CommandRecord>> {
    let record = sqlx::query_as::<_, CommandRecord>(&format!(
        "SELECT {COMMAND_COLUMNS} FROM pending_commands WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_commands(pool: &Db, node_id: Uuid) -> Result<Vec<CommandRecord>> {
    let records = sqlx::query_as::<_, CommandRecord>(&format!(
        "SELECT {COMMAND_COLUMNS} FROM pending_commands WHERE node_id = ?1 ORDER BY created_at ASC"
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Pop up to `batch` pending commands for a node, oldest first, and
/// flip them to delivered. Runs inside the caller's transaction so a
/// popped command is handed out in exactly one heartbeat response.
pub async fn pop_pending_commands(
    tx: &mut Transaction<'_, Sqlite>,
    node_id: Uuid,
    batch: u32,
    delivered_at: DateTime<Utc>,
) -> Result<Vec<CommandRecord>> {
    let picked = sqlx::query_as::<_, CommandRecord>(&format!(
        r#"
        SELECT {COMMAND_COLUMNS}
        FROM pending_commands
        WHERE node_id = ?1 AND state = 'pending'
        ORDER BY created_at ASC
        LIMIT ?2
        "#
    ))
    .bind(node_id)
    .bind(batch as i64)
    .fetch_all(&mut **tx)
    .await?;

    for command in &picked {
        sqlx::query(
            r#"
            UPDATE pending_commands
            SET state = 'delivered',
                attempts = attempts + 1,
                delivered_at = ?2,
                updated_at = datetime('now')
            WHERE id = ?1 AND state = 'pending'
            "#,
        )
        .bind(command.id)
        .bind(delivered_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(picked)
}

/// Record the agent-reported outcome of a delivered command. Only a
/// delivered command owned by `node_id` can be completed, so a stray
/// or repeated ack is a no-op.
pub async fn complete_command(
    tx: &mut Transaction<'_, Sqlite>,
    node_id: Uuid,
    command_id: Uuid,
    success: bool,
    error: Option<&str>,
) -> Result<u64> {
    let state = if success {
        CommandStateColumn::Acked
    } else {
        CommandStateColumn::Failed
    };
    let result = sqlx::query(
        r#"
        UPDATE pending_commands
        SET state = ?3,
            error = ?4,
            completed_at = datetime('now'),
            updated_at = datetime('now')
        WHERE id = ?2 AND node_id = ?1 AND state = 'delivered'
        "#,
    )
    .bind(node_id)
    .bind(command_id)
    .bind(state)
    .bind(error)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Expire delivered commands that were never acknowledged within
/// `timeout_seconds * multiplier` of delivery. Returns the expired ids.
pub async fn expire_overdue_delivered(pool: &Db, multiplier: u32) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE pending_commands
        SET state = 'expired',
            error = COALESCE(error, 'delivery timed out'),
            completed_at = datetime('now'),
            updated_at = datetime('now')
        WHERE state = 'delivered'
          AND delivered_at IS NOT NULL
          AND datetime(delivered_at, '+' || (timeout_seconds * ?1) || ' seconds') < datetime('now')
        RETURNING id
        "#,
    )
    .bind(multiplier as i64)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Expire commands that sat in `pending` past the queue TTL without any
/// agent ever picking them up.
pub async fn expire_stale_pending(pool: &Db, created_before: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE pending_commands
        SET state = 'expired',
            error = COALESCE(error, 'never delivered'),
            completed_at = datetime('now'),
            updated_at = datetime('now')
        WHERE state = 'pending'
          AND julianday(created_at) < julianday(?1)
        RETURNING id
        "#,
    )
    .bind(created_before)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}
