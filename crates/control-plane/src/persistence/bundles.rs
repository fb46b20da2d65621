use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use super::services::ServiceTypeColumn;
use super::Db;
use crate::Result;

/// Cached rendered configuration for one service instance.
#[derive(Debug, Clone, FromRow)]
pub struct BundleRecord {
    pub service_id: Uuid,
    pub service_type: ServiceTypeColumn,
    #[sqlx(rename = "rendered_json")]
    pub rendered: Json<Value>,
    pub version: i64,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
}

const BUNDLE_COLUMNS: &str = r#"
    service_id,
    service_type,
    rendered_json,
    version,
    checksum,
    updated_at
"#;

pub async fn get_bundle(pool: &Db, service_id: Uuid) -> Result<Option<BundleRecord>> {
    let record = sqlx::query_as::<_, BundleRecord>(&format!(
        "SELECT {BUNDLE_COLUMNS} FROM configuration_bundles WHERE service_id = ?1"
    ))
    .bind(service_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn get_bundle_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    service_id: Uuid,
) -> Result<Option<BundleRecord>> {
    let record = sqlx::query_as::<_, BundleRecord>(&format!(
        "SELECT {BUNDLE_COLUMNS} FROM configuration_bundles WHERE service_id = ?1"
    ))
    .bind(service_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(record)
}

/// Store a freshly rendered document. The version only advances when
/// the checksum differs from the cached row, so an idempotent config
/// update keeps the version stable.
pub async fn upsert_bundle(
    tx: &mut Transaction<'_, Sqlite>,
    service_id: Uuid,
    service_type: ServiceTypeColumn,
    rendered: Value,
    checksum: &str,
    rendered_at: DateTime<Utc>,
) -> Result<i64> {
    let existing = get_bundle_in_tx(tx, service_id).await?;
    let version = match &existing {
        Some(bundle) if bundle.checksum == checksum => return Ok(bundle.version),
        Some(bundle) => bundle.version + 1,
        None => 1,
    };

    sqlx::query(
        r#"
        INSERT INTO configuration_bundles (
            service_id,
            service_type,
            rendered_json,
            version,
            checksum,
            updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT (service_id) DO UPDATE SET
            service_type = excluded.service_type,
            rendered_json = excluded.rendered_json,
            version = excluded.version,
            checksum = excluded.checksum,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(service_id)
    .bind(service_type)
    .bind(Json(rendered))
    .bind(version)
    .bind(checksum)
    .bind(rendered_at)
    .execute(&mut **tx)
    .await?;

    Ok(version)
}

pub async fn list_bundles_for_node(pool: &Db, node_id: Uuid) -> Result<Vec<BundleRecord>> {
    let records = sqlx::query_as::<_, BundleRecord>(&format!(
        r#"
        SELECT {BUNDLE_COLUMNS}
        FROM configuration_bundles
        WHERE service_id IN (SELECT id FROM service_instances WHERE node_id = ?1)
        ORDER BY service_id ASC
        "#
    ))
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{migrations, nodes, services, NewNode, NewService};
    use serde_json::json;

    async fn setup_db() -> Db {
        let pool = migrations::init_pool("sqlite::memory:").await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn service(db: &Db) -> Uuid {
        let node = nodes::create_node(
            db,
            NewNode {
                id: Uuid::new_v4(),
                name: "alpha".into(),
                description: None,
                hostname: "edge-c.example.net".into(),
                ip_address: "203.0.113.30".into(),
                ssh_port: 22,
                owner_subject: "operator-1".into(),
                tags: Vec::new(),
            },
        )
        .await
        .unwrap();
        let service_id = Uuid::new_v4();
        let mut tx = db.begin().await.unwrap();
        services::create_service(
            &mut tx,
            NewService {
                id: service_id,
                node_id: node.id,
                name: "edge".into(),
                service_type: ServiceTypeColumn::Nginx,
                protocol: services::ProtocolColumn::Tcp,
                port: 8080,
                config: json!({"upstreams": []}),
                tags: Vec::new(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        service_id
    }

    #[tokio::test]
    async fn upsert_bundle_bumps_version_only_on_checksum_change() {
        let db = setup_db().await;
        let service_id = service(&db).await;
        let rendered = json!({"server": {"listen": 8080}});

        let mut tx = db.begin().await.unwrap();
        let v1 = upsert_bundle(
            &mut tx,
            service_id,
            ServiceTypeColumn::Nginx,
            rendered.clone(),
            "abc",
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(v1, 1);

        // Same checksum: no version bump, cached row untouched.
        let mut tx = db.begin().await.unwrap();
        let v_same = upsert_bundle(
            &mut tx,
            service_id,
            ServiceTypeColumn::Nginx,
            rendered.clone(),
            "abc",
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(v_same, 1);

        let mut tx = db.begin().await.unwrap();
        let v2 = upsert_bundle(
            &mut tx,
            service_id,
            ServiceTypeColumn::Nginx,
            json!({"server": {"listen": 9090}}),
            "def",
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(v2, 2);

        let bundle = get_bundle(&db, service_id).await.unwrap().expect("bundle");
        assert_eq!(bundle.version, 2);
        assert_eq!(bundle.checksum, "def");
    }
}
