use chrono::{DateTime, Utc};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Db;
use crate::Result;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TokenStatusColumn {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentTokenRecord {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub secret_hash: String,
    pub status: TokenStatusColumn,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTokenRecord {
    /// Effective status, accounting for a wall-clock expiry that the
    /// stored column may not have caught up with yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> TokenStatusColumn {
        match self.status {
            TokenStatusColumn::Active => match self.expires_at {
                Some(expires_at) if expires_at <= now => TokenStatusColumn::Expired,
                _ => TokenStatusColumn::Active,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAgentToken {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub secret_hash: String,
    pub status: TokenStatusColumn,
    pub expires_at: Option<DateTime<Utc>>,
}

const TOKEN_COLUMNS: &str = r#"
    id,
    node_id,
    name,
    secret_hash,
    status,
    expires_at,
    last_used_at,
    created_at,
    updated_at
"#;

pub async fn create_agent_token(pool: &Db, new_token: NewAgentToken) -> Result<AgentTokenRecord> {
    sqlx::query(
        r#"
        INSERT INTO agent_tokens (
            id,
            node_id,
            name,
            secret_hash,
            status,
            expires_at,
            created_at,
            updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'), datetime('now'))
        "#,
    )
    .bind(new_token.id)
    .bind(new_token.node_id)
    .bind(&new_token.name)
    .bind(&new_token.secret_hash)
    .bind(new_token.status)
    .bind(new_token.expires_at)
    .execute(pool)
    .await?;

    get_agent_token(pool, new_token.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("agent token insert did not return row"))
}

pub async fn get_agent_token(pool: &Db, id: Uuid) -> Result<Option<AgentTokenRecord>> {
    let record = sqlx::query_as::<_, AgentTokenRecord>(&format!(
        "SELECT {TOKEN_COLUMNS} FROM agent_tokens WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn get_agent_token_by_secret_hash(
    pool: &Db,
    secret_hash: &str,
) -> Result<Option<AgentTokenRecord>> {
    let record = sqlx::query_as::<_, AgentTokenRecord>(&format!(
        "SELECT {TOKEN_COLUMNS} FROM agent_tokens WHERE secret_hash = ?1"
    ))
    .bind(secret_hash)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_agent_tokens(pool: &Db, node_id: Uuid) -> Result<Vec<AgentTokenRecord>> {
    let records = sqlx::query_as::<_, AgentTokenRecord>(&format!(
        "SELECT {TOKEN_COLUMNS} FROM agent_tokens WHERE node_id = ?1 ORDER BY created_at DESC"
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn rename_agent_token(pool: &Db, id: Uuid, name: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tokens
        SET name = ?2, updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn revoke_agent_token(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tokens
        SET status = 'revoked', updated_at = datetime('now')
        WHERE id = ?1 AND status = 'active'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_agent_token(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM agent_tokens WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Persist a wall-clock expiry that `effective_status` observed.
pub async fn mark_agent_token_expired(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tokens
        SET status = 'expired', updated_at = datetime('now')
        WHERE id = ?1 AND status = 'active'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn touch_agent_token_last_used(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tokens
        SET last_used_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{migrations, nodes, NewNode};
    use chrono::TimeZone;

    async fn setup_db() -> Db {
        let pool = migrations::init_pool("sqlite::memory:").await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        pool
    }

    fn new_node(name: &str) -> NewNode {
        NewNode {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            hostname: "edge-a.example.net".into(),
            ip_address: "203.0.113.10".into(),
            ssh_port: 22,
            owner_subject: "operator-1".into(),
            tags: Vec::new(),
        }
    }

    fn new_token(node_id: Uuid, name: &str, hash: &str) -> NewAgentToken {
        NewAgentToken {
            id: Uuid::new_v4(),
            node_id,
            name: name.into(),
            secret_hash: hash.into(),
            status: TokenStatusColumn::Active,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn create_agent_token_roundtrip() {
        let db = setup_db().await;
        let node = nodes::create_node(&db, new_node("alpha")).await.unwrap();

        let record = create_agent_token(&db, new_token(node.id, "deploy", "hash-1"))
            .await
            .unwrap();

        assert_eq!(record.node_id, node.id);
        assert_eq!(record.secret_hash, "hash-1");
        assert_eq!(record.status, TokenStatusColumn::Active);
        assert!(record.last_used_at.is_none());

        let by_hash = get_agent_token_by_secret_hash(&db, "hash-1")
            .await
            .unwrap()
            .expect("token");
        assert_eq!(by_hash.id, record.id);
    }

    #[tokio::test]
    async fn revoke_agent_token_is_idempotent() {
        let db = setup_db().await;
        let node = nodes::create_node(&db, new_node("beta")).await.unwrap();
        let record = create_agent_token(&db, new_token(node.id, "deploy", "hash"))
            .await
            .unwrap();

        assert_eq!(revoke_agent_token(&db, record.id).await.unwrap(), 1);
        assert_eq!(revoke_agent_token(&db, record.id).await.unwrap(), 0);

        let updated = get_agent_token(&db, record.id).await.unwrap().expect("token");
        assert_eq!(updated.status, TokenStatusColumn::Revoked);
    }

    #[tokio::test]
    async fn effective_status_catches_wall_clock_expiry() {
        let db = setup_db().await;
        let node = nodes::create_node(&db, new_node("gamma")).await.unwrap();
        let past = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let mut new = new_token(node.id, "deploy", "hash");
        new.expires_at = Some(past);

        let record = create_agent_token(&db, new).await.unwrap();
        assert_eq!(record.status, TokenStatusColumn::Active);
        assert_eq!(
            record.effective_status(Utc::now()),
            TokenStatusColumn::Expired
        );

        assert_eq!(mark_agent_token_expired(&db, record.id).await.unwrap(), 1);
        let updated = get_agent_token(&db, record.id).await.unwrap().expect("token");
        assert_eq!(updated.status, TokenStatusColumn::Expired);
    }

    #[tokio::test]
    async fn touch_last_used_sets_value() {
        let db = setup_db().await;
        let node = nodes::create_node(&db, new_node("delta")).await.unwrap();
        let record = create_agent_token(&db, new_token(node.id, "deploy", "hash"))
            .await
            .unwrap();

        assert_eq!(touch_agent_token_last_used(&db, record.id).await.unwrap(), 1);
        let updated = get_agent_token(&db, record.id).await.unwrap().expect("token");
        assert!(updated.last_used_at.is_some());
    }
}
