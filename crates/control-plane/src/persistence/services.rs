use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, Transaction};
use uuid::Uuid;

use common::api::{Protocol, ServiceMetrics, ServiceStatus, ServiceType};

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ServiceTypeColumn {
    Xray,
    Singbox,
    Nginx,
    Wireguard,
    Haproxy,
}

impl From<ServiceType> for ServiceTypeColumn {
    fn from(kind: ServiceType) -> Self {
        match kind {
            ServiceType::Xray => ServiceTypeColumn::Xray,
            ServiceType::Singbox => ServiceTypeColumn::Singbox,
            ServiceType::Nginx => ServiceTypeColumn::Nginx,
            ServiceType::Wireguard => ServiceTypeColumn::Wireguard,
            ServiceType::Haproxy => ServiceTypeColumn::Haproxy,
        }
    }
}

impl From<ServiceTypeColumn> for ServiceType {
    fn from(kind: ServiceTypeColumn) -> Self {
        match kind {
            ServiceTypeColumn::Xray => ServiceType::Xray,
            ServiceTypeColumn::Singbox => ServiceType::Singbox,
            ServiceTypeColumn::Nginx => ServiceType::Nginx,
            ServiceTypeColumn::Wireguard => ServiceType::Wireguard,
            ServiceTypeColumn::Haproxy => ServiceType::Haproxy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ProtocolColumn {
    Tcp,
    Udp,
    Both,
}

impl From<Protocol> for ProtocolColumn {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => ProtocolColumn::Tcp,
            Protocol::Udp => ProtocolColumn::Udp,
            Protocol::Both => ProtocolColumn::Both,
        }
    }
}

impl From<ProtocolColumn> for Protocol {
    fn from(protocol: ProtocolColumn) -> Self {
        match protocol {
            ProtocolColumn::Tcp => Protocol::Tcp,
            ProtocolColumn::Udp => Protocol::Udp,
            ProtocolColumn::Both => Protocol::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ServiceStatusColumn {
    Running,
    Stopped,
    Error,
    Starting,
    Stopping,
}

impl From<ServiceStatus> for ServiceStatusColumn {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Running => ServiceStatusColumn::Running,
            ServiceStatus::Stopped => ServiceStatusColumn::Stopped,
            ServiceStatus::Error => ServiceStatusColumn::Error,
            ServiceStatus::Starting => ServiceStatusColumn::Starting,
            ServiceStatus::Stopping => ServiceStatusColumn::Stopping,
        }
    }
}

impl From<ServiceStatusColumn> for ServiceStatus {
    fn from(status: ServiceStatusColumn) -> Self {
        match status {
            ServiceStatusColumn::Running => ServiceStatus::Running,
            ServiceStatusColumn::Stopped => ServiceStatus::Stopped,
            ServiceStatusColumn::Error => ServiceStatus::Error,
            ServiceStatusColumn::Starting => ServiceStatus::Starting,
            ServiceStatusColumn::Stopping => ServiceStatus::Stopping,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub service_type: ServiceTypeColumn,
    pub protocol: ProtocolColumn,
    pub port: i64,
    pub status: ServiceStatusColumn,
    #[sqlx(rename = "config_json")]
    pub config: Json<Value>,
    pub config_version: i64,
    #[sqlx(rename = "metrics_json")]
    pub metrics: Option<Json<ServiceMetrics>>,
    pub status_message: Option<String>,
    #[sqlx(rename = "tags_json")]
    pub tags: Json<Vec<String>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub service_type: ServiceTypeColumn,
    pub protocol: ProtocolColumn,
    pub port: u16,
    pub config: Value,
    pub tags: Vec<String>,
}

/// Partial update from the admin surface. `bump_version` is set by the
/// caller when the rendered output actually changed; config, port and
/// protocol edits can all move the rendered doc.
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub protocol: Option<ProtocolColumn>,
    pub port: Option<u16>,
    pub config: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub bump_version: bool,
}

impl ServiceUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.protocol.is_none()
            && self.port.is_none()
            && self.config.is_none()
            && self.tags.is_none()
    }
}

/// Runtime fields written from agent reports.
#[derive(Debug, Clone)]
pub struct ServiceRuntimeUpdate {
    pub status: ServiceStatusColumn,
    pub metrics: Option<ServiceMetrics>,
    pub message: Option<String>,
}

const SERVICE_COLUMNS: &str = r#"
    id,
    node_id,
    name,
    service_type,
    protocol,
    port,
    status,
    config_json,
    config_version,
    metrics_json,
    status_message,
    tags_json,
    last_seen,
    created_at,
    updated_at
"#;

/// Port collision probe. Two rows collide when the protocols contend
/// for the same slot, with `both` occupying tcp and udp at once.
pub async fn port_in_use(
    tx: &mut Transaction<'_, Sqlite>,
    node_id: Uuid,
    port: u16,
    protocol: ProtocolColumn,
    exclude_service: Option<Uuid>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM service_instances
        WHERE node_id = ?1
          AND port = ?2
          AND (protocol = 'both' OR ?3 = 'both' OR protocol = ?3)
          AND (?4 IS NULL OR id != ?4)
        "#,
    )
    .bind(node_id)
    .bind(port as i64)
    .bind(protocol)
    .bind(exclude_service)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count > 0)
}

pub async fn create_service(
    tx: &mut Transaction<'_, Sqlite>,
    new_service: NewService,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO service_instances (
            id,
            node_id,
            name,
            service_type,
            protocol,
            port,
            status,
            config_json,
            config_version,
            tags_json,
            created_at,
            updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'stopped', ?7, 1, ?8, datetime('now'), datetime('now'))
        "#,
    )
    .bind(new_service.id)
    .bind(new_service.node_id)
    .bind(&new_service.name)
    .bind(new_service.service_type)
    .bind(new_service.protocol)
    .bind(new_service.port as i64)
    .bind(Json(new_service.config))
    .bind(Json(new_service.tags))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn get_service(pool: &Db, id: Uuid) -> Result<Option<ServiceRecord>> {
    let record = sqlx::query_as::<_, ServiceRecord>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM service_instances WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_services(pool: &Db, node_id: Uuid) -> Result<Vec<ServiceRecord>> {
    let records = sqlx::query_as::<_, ServiceRecord>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM service_instances WHERE node_id = ?1 ORDER BY created_at ASC"
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn update_service(
    tx: &mut Transaction<'_, Sqlite>,
    id: Uuid,
    update: ServiceUpdate,
) -> Result<u64> {
    if update.is_empty() {
        return Ok(0);
    }

    let mut qb =
        QueryBuilder::<Sqlite>::new("UPDATE service_instances SET updated_at = datetime('now')");
    if let Some(name) = &update.name {
        qb.push(", name = ");
        qb.push_bind(name);
    }
    if let Some(protocol) = update.protocol {
        qb.push(", protocol = ");
        qb.push_bind(protocol);
    }
    if let Some(port) = update.port {
        qb.push(", port = ");
        qb.push_bind(port as i64);
    }
    if let Some(config) = update.config {
        qb.push(", config_json = ");
        qb.push_bind(Json(config));
    }
    if update.bump_version {
        qb.push(", config_version = config_version + 1");
    }
    if let Some(tags) = update.tags {
        qb.push(", tags_json = ");
        qb.push_bind(Json(tags));
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);

    let result = qb.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

pub async fn delete_service(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<u64> {
    sqlx::query("DELETE FROM configuration_bundles WHERE service_id = ?1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        r#"
        UPDATE pending_commands
        SET state = 'expired', completed_at = datetime('now'), updated_at = datetime('now')
        WHERE service_id = ?1 AND state IN ('pending', 'delivered')
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;
    let result = sqlx::query("DELETE FROM service_instances WHERE id = ?1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

/// Apply an agent-reported runtime status. Returns 0 when the service
/// does not belong to `node_id`.
pub async fn apply_runtime_update(
    tx: &mut Transaction<'_, Sqlite>,
    node_id: Uuid,
    service_id: Uuid,
    update: &ServiceRuntimeUpdate,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE service_instances
        SET status = ?3,
            metrics_json = COALESCE(?4, metrics_json),
            status_message = ?5,
            last_seen = datetime('now'),
            updated_at = datetime('now')
        WHERE id = ?2 AND node_id = ?1
        "#,
    )
    .bind(node_id)
    .bind(service_id)
    .bind(update.status)
    .bind(update.metrics.clone().map(Json))
    .bind(&update.message)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
