use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite, Transaction};
use uuid::Uuid;

use common::api::{AgentConnectionStatus, NodeStatus, OsInfo};

use super::Db;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct NodeRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub hostname: String,
    pub ip_address: String,
    pub ssh_port: u16,
    pub status: NodeStatusColumn,
    pub owner_subject: String,
    #[sqlx(rename = "tags_json")]
    pub tags: Json<Vec<String>>,
    pub agent_version: Option<String>,
    pub agent_status: Option<AgentStatusColumn>,
    pub agent_last_contact: Option<DateTime<Utc>>,
    pub agent_token_id: Option<Uuid>,
    #[sqlx(rename = "os_info_json")]
    pub os_info: Option<Json<OsInfo>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `NodeStatus` with sqlx column bindings attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum NodeStatusColumn {
    Active,
    Inactive,
    Maintenance,
    Error,
}

impl From<NodeStatus> for NodeStatusColumn {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Active => NodeStatusColumn::Active,
            NodeStatus::Inactive => NodeStatusColumn::Inactive,
            NodeStatus::Maintenance => NodeStatusColumn::Maintenance,
            NodeStatus::Error => NodeStatusColumn::Error,
        }
    }
}

impl From<NodeStatusColumn> for NodeStatus {
    fn from(status: NodeStatusColumn) -> Self {
        match status {
            NodeStatusColumn::Active => NodeStatus::Active,
            NodeStatusColumn::Inactive => NodeStatus::Inactive,
            NodeStatusColumn::Maintenance => NodeStatus::Maintenance,
            NodeStatusColumn::Error => NodeStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AgentStatusColumn {
    Connected,
    Disconnected,
    Error,
}

impl From<AgentConnectionStatus> for AgentStatusColumn {
    fn from(status: AgentConnectionStatus) -> Self {
        match status {
            AgentConnectionStatus::Connected => AgentStatusColumn::Connected,
            AgentConnectionStatus::Disconnected => AgentStatusColumn::Disconnected,
            AgentConnectionStatus::Error => AgentStatusColumn::Error,
        }
    }
}

impl From<AgentStatusColumn> for AgentConnectionStatus {
    fn from(status: AgentStatusColumn) -> Self {
        match status {
            AgentStatusColumn::Connected => AgentConnectionStatus::Connected,
            AgentStatusColumn::Disconnected => AgentConnectionStatus::Disconnected,
            AgentStatusColumn::Error => AgentConnectionStatus::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub hostname: String,
    pub ip_address: String,
    pub ssh_port: u16,
    pub owner_subject: String,
    pub tags: Vec<String>,
}

/// Partial update applied by the admin surface. `None` fields keep
/// their current value. Agent bookkeeping columns are out of reach.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub ssh_port: Option<u16>,
    pub status: Option<NodeStatusColumn>,
    pub tags: Option<Vec<String>>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.hostname.is_none()
            && self.ip_address.is_none()
            && self.ssh_port.is_none()
            && self.status.is_none()
            && self.tags.is_none()
    }
}

/// Listing filters; all criteria are ANDed together.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatusColumn>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

/// Agent bookkeeping written on each authenticated heartbeat.
#[derive(Debug, Clone)]
pub struct AgentContact {
    pub version: String,
    pub status: AgentStatusColumn,
    pub token_id: Uuid,
    pub os_info: Option<OsInfo>,
    pub node_status: NodeStatusColumn,
    pub seen_at: DateTime<Utc>,
}

const NODE_COLUMNS: &str = r#"
    id,
    name,
    description,
    hostname,
    ip_address,
    ssh_port,
    status,
    owner_subject,
    tags_json,
    agent_version,
    agent_status,
    agent_last_contact,
    agent_token_id,
    os_info_json,
    last_seen,
    created_at,
    updated_at
"#;

pub async fn create_node(pool: &Db, new_node: NewNode) -> Result<NodeRecord> {
    let id = new_node.id;
    sqlx::query(
        r#"
        INSERT INTO nodes (
            id,
            name,
            description,
            hostname,
            ip_address,
            ssh_port,
            status,
            owner_subject,
            tags_json,
            created_at,
            updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, datetime('now'), datetime('now'))
        "#,
    )
    .bind(id)
    .bind(&new_node.name)
    .bind(&new_node.description)
    .bind(&new_node.hostname)
    .bind(&new_node.ip_address)
    .bind(new_node.ssh_port)
    .bind(&new_node.owner_subject)
    .bind(Json(new_node.tags))
    .execute(pool)
    .await?;

    get_node(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("node insert did not return row"))
}

pub async fn get_node(pool: &Db, id: Uuid) -> Result<Option<NodeRecord>> {
    let record = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn get_node_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: Uuid,
) -> Result<Option<NodeRecord>> {
    let record = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(record)
}

pub async fn list_nodes(
    pool: &Db,
    owner_subject: &str,
    filter: &NodeFilter,
) -> Result<Vec<NodeRecord>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE owner_subject = "
    ));
    qb.push_bind(owner_subject);
    if let Some(status) = filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status);
    }
    if let Some(tag) = &filter.tag {
        // Tags are stored as a JSON array of lowercase strings.
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(tags_json) WHERE json_each.value = ");
        qb.push_bind(tag);
        qb.push(")");
    }
    if let Some(search) = &filter.search {
        let prefix = format!("{}%", search.replace('%', "\\%").replace('_', "\\_"));
        qb.push(" AND (name LIKE ");
        qb.push_bind(prefix.clone());
        qb.push(" ESCAPE '\\' OR hostname LIKE ");
        qb.push_bind(prefix);
        qb.push(" ESCAPE '\\')");
    }
    qb.push(" ORDER BY created_at ASC");

    let records = qb
        .build_query_as::<NodeRecord>()
        .fetch_all(pool)
        .await?;

    Ok(records)
}

pub async fn update_node(pool: &Db, id: Uuid, update: NodeUpdate) -> Result<u64> {
    if update.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE nodes SET updated_at = datetime('now')");
    if let Some(name) = &update.name {
        qb.push(", name = ");
        qb.push_bind(name);
    }
    if let Some(description) = &update.description {
        qb.push(", description = ");
        qb.push_bind(description);
    }
    if let Some(hostname) = &update.hostname {
        qb.push(", hostname = ");
        qb.push_bind(hostname);
    }
    if let Some(ip_address) = &update.ip_address {
        qb.push(", ip_address = ");
        qb.push_bind(ip_address);
    }
    if let Some(ssh_port) = update.ssh_port {
        qb.push(", ssh_port = ");
        qb.push_bind(ssh_port);
    }
    if let Some(status) = update.status {
        qb.push(", status = ");
        qb.push_bind(status);
    }
    if let Some(tags) = update.tags {
        qb.push(", tags_json = ");
        qb.push_bind(Json(tags));
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn delete_node(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<u64> {
    sqlx::query("DELETE FROM pending_commands WHERE node_id = ?1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM agent_tokens WHERE node_id = ?1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    let result = sqlx::query("DELETE FROM nodes WHERE id = ?1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count_services(tx: &mut Transaction<'_, Sqlite>, node_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_instances WHERE node_id = ?1")
        .bind(node_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(count.max(0) as usize)
}

/// Record an agent contact inside an open transaction so the node row,
/// service statuses and command pops land atomically.
pub async fn record_agent_contact(
    tx: &mut Transaction<'_, Sqlite>,
    node_id: Uuid,
    contact: &AgentContact,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET agent_version = ?2,
            agent_status = ?3,
            agent_last_contact = ?4,
            agent_token_id = ?5,
            os_info_json = COALESCE(?6, os_info_json),
            status = ?7,
            last_seen = ?4,
            updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(node_id)
    .bind(&contact.version)
    .bind(contact.status)
    .bind(contact.seen_at)
    .bind(contact.token_id)
    .bind(contact.os_info.clone().map(Json))
    .bind(contact.node_status)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Flip active nodes whose agents went quiet to inactive/disconnected.
/// Returns the ids that were transitioned.
pub async fn mark_stale_nodes_inactive(
    pool: &Db,
    stale_before: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE nodes
        SET status = ?1, agent_status = ?2, updated_at = datetime('now')
        WHERE status = ?3
          AND last_seen IS NOT NULL
          AND julianday(last_seen) < julianday(?4)
        RETURNING id
        "#,
    )
    .bind(NodeStatusColumn::Inactive)
    .bind(AgentStatusColumn::Disconnected)
    .bind(NodeStatusColumn::Active)
    .bind(stale_before)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}
