use uuid::Uuid;

use common::api::NodeStatus;

use crate::app_state::AppState;
use crate::auth::AdminIdentity;
use crate::error::{ApiResult, AppError};
use crate::persistence::{self as db, nodes};
use crate::validation;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct CreateNodeRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub hostname: String,
    pub ip_address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Absent fields keep their stored value; `description: null` clears.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "serde_with_double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

mod serde_with_double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(de).map(Some)
    }

    pub fn serialize<S>(value: &Option<Option<String>>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct ListNodesRequest {
    pub status: Option<NodeStatus>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

/// Fetch a node and enforce ownership: unknown id is NotFound, a node
/// owned by someone else is Forbidden.
pub async fn fetch_owned(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
) -> ApiResult<db::NodeRecord> {
    let node = nodes::get_node(&state.db, node_id)
        .await?
        .ok_or_else(|| AppError::not_found("node not found"))?;
    if node.owner_subject != identity.subject {
        return Err(AppError::forbidden("node belongs to another account"));
    }
    Ok(node)
}

pub async fn create_node(
    state: &AppState,
    identity: &AdminIdentity,
    req: CreateNodeRequest,
) -> ApiResult<db::NodeRecord> {
    let name = validation::normalize_name("name", &req.name, &state.limits)?;
    let hostname = validation::normalize_hostname(&req.hostname, &state.limits)?;
    let ip_address = validation::normalize_ip(&req.ip_address)?;
    let ssh_port = validation::validate_port(req.ssh_port)?;
    let description = validation::normalize_description(req.description, &state.limits)?;
    let tags = validation::normalize_tags(req.tags, &state.limits)?;

    let created = nodes::create_node(
        &state.db,
        db::NewNode {
            id: Uuid::new_v4(),
            name,
            description,
            hostname,
            ip_address,
            ssh_port,
            owner_subject: identity.subject.clone(),
            tags,
        },
    )
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            AppError::conflict("NODE_NAME_TAKEN", "a node with this name already exists")
        } else {
            err.into()
        }
    })?;

    tracing::info!(node_id = %created.id, name = %created.name, "node registered");
    Ok(created)
}

pub async fn get_node(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
) -> ApiResult<db::NodeRecord> {
    fetch_owned(state, identity, node_id).await
}

pub async fn list_nodes(
    state: &AppState,
    identity: &AdminIdentity,
    req: ListNodesRequest,
) -> ApiResult<Vec<db::NodeRecord>> {
    let filter = db::NodeFilter {
        status: req.status.map(Into::into),
        tag: req.tag.map(|t| t.trim().to_ascii_lowercase()),
        search: req.search.filter(|s| !s.trim().is_empty()),
    };
    nodes::list_nodes(&state.db, &identity.subject, &filter)
        .await
        .map_err(Into::into)
}

pub async fn update_node(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    req: UpdateNodeRequest,
) -> ApiResult<db::NodeRecord> {
    fetch_owned(state, identity, node_id).await?;

    let update = db::NodeUpdate {
        name: req
            .name
            .map(|name| validation::normalize_name("name", &name, &state.limits))
            .transpose()?,
        description: match req.description {
            Some(value) => Some(validation::normalize_description(value, &state.limits)?),
            None => None,
        },
        hostname: req
            .hostname
            .map(|hostname| validation::normalize_hostname(&hostname, &state.limits))
            .transpose()?,
        ip_address: req
            .ip_address
            .map(|ip| validation::normalize_ip(&ip))
            .transpose()?,
        ssh_port: req.ssh_port.map(validation::validate_port).transpose()?,
        status: req.status.map(Into::into),
        tags: req
            .tags
            .map(|tags| validation::normalize_tags(Some(tags), &state.limits))
            .transpose()?,
    };

    nodes::update_node(&state.db, node_id, update)
        .await
        .map_err(|err| {
            if crate::error::is_unique_violation(&err) {
                AppError::conflict("NODE_NAME_TAKEN", "a node with this name already exists")
            } else {
                err.into()
            }
        })?;

    fetch_owned(state, identity, node_id).await
}

pub async fn delete_node(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
) -> ApiResult<()> {
    fetch_owned(state, identity, node_id).await?;

    // The service-count guard runs inside the delete transaction so a
    // service created concurrently cannot slip past the 409.
    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    let service_count = nodes::count_services(&mut tx, node_id).await?;
    if service_count > 0 {
        return Err(AppError::conflict(
            "NODE_HAS_SERVICES",
            format!("node still has {service_count} service instance(s)"),
        ));
    }
    nodes::delete_node(&mut tx, node_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(node_id = %node_id, "node deleted");
    Ok(())
}
