use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use common::api::{Protocol, ServiceType};

use crate::app_state::AppState;
use crate::auth::AdminIdentity;
use crate::error::{ApiResult, AppError};
use crate::persistence::{self as db, bundles, services};
use crate::render::{self, RenderContext};
use crate::services::nodes::fetch_owned;
use crate::validation;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct CreateServiceRequest {
    pub name: String,
    pub service_type: ServiceType,
    pub protocol: Protocol,
    pub port: u16,
    pub config: Value,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct UpdateServiceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl UpdateServiceRequest {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.protocol.is_none()
            && self.port.is_none()
            && self.config.is_none()
            && self.tags.is_none()
    }
}

async fn fetch_owned_service(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    service_id: Uuid,
) -> ApiResult<db::ServiceRecord> {
    fetch_owned(state, identity, node_id).await?;
    let service = services::get_service(&state.db, service_id)
        .await?
        .filter(|svc| svc.node_id == node_id)
        .ok_or_else(|| AppError::not_found("service instance not found"))?;
    Ok(service)
}

pub async fn create_service(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    req: CreateServiceRequest,
) -> ApiResult<db::ServiceRecord> {
    fetch_owned(state, identity, node_id).await?;

    let name = validation::normalize_name("name", &req.name, &state.limits)?;
    let port = validation::validate_port(req.port)?;
    let tags = validation::normalize_tags(req.tags, &state.limits)?;
    validation::validate_config_document(&req.config)?;

    let ctx = RenderContext {
        service_name: name.clone(),
        port,
        protocol: req.protocol,
    };
    let rendered = render::render_for(req.service_type, &ctx, &req.config)?;

    let service_id = Uuid::new_v4();
    let protocol: db::services::ProtocolColumn = req.protocol.into();
    let service_type: db::services::ServiceTypeColumn = req.service_type.into();

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if services::port_in_use(&mut tx, node_id, port, protocol, None).await? {
        return Err(AppError::conflict(
            "PORT_IN_USE",
            format!("port {port}/{} is already allocated on this node", protocol_label(req.protocol)),
        ));
    }
    services::create_service(
        &mut tx,
        db::NewService {
            id: service_id,
            node_id,
            name,
            service_type,
            protocol,
            port,
            config: req.config,
            tags,
        },
    )
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            AppError::conflict(
                "SERVICE_NAME_TAKEN",
                "a service with this name already exists on this node",
            )
        } else {
            err.into()
        }
    })?;
    bundles::upsert_bundle(
        &mut tx,
        service_id,
        service_type,
        rendered.doc,
        &rendered.checksum,
        Utc::now(),
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(node_id = %node_id, service_id = %service_id, "service instance created");

    services::get_service(&state.db, service_id)
        .await?
        .ok_or_else(|| AppError::internal("service row missing after insert"))
}

pub async fn get_service(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    service_id: Uuid,
) -> ApiResult<db::ServiceRecord> {
    fetch_owned_service(state, identity, node_id, service_id).await
}

pub async fn list_services(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
) -> ApiResult<Vec<db::ServiceRecord>> {
    fetch_owned(state, identity, node_id).await?;
    services::list_services(&state.db, node_id)
        .await
        .map_err(Into::into)
}

pub async fn update_service(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    service_id: Uuid,
    req: UpdateServiceRequest,
) -> ApiResult<db::ServiceRecord> {
    let current = fetch_owned_service(state, identity, node_id, service_id).await?;
    if req.is_empty() {
        return Ok(current);
    }

    let name = match &req.name {
        Some(name) => validation::normalize_name("name", name, &state.limits)?,
        None => current.name.clone(),
    };
    let protocol = req.protocol.unwrap_or_else(|| current.protocol.into());
    let port = match req.port {
        Some(port) => validation::validate_port(port)?,
        None => current.port as u16,
    };
    let config = match &req.config {
        Some(config) => {
            validation::validate_config_document(config)?;
            config.clone()
        }
        None => current.config.0.clone(),
    };
    let tags = req
        .tags
        .map(|tags| validation::normalize_tags(Some(tags), &state.limits))
        .transpose()?;

    // Re-render with the effective post-update parameters; the bundle
    // version only moves when the rendered doc actually changed.
    let ctx = RenderContext {
        service_name: name.clone(),
        port,
        protocol,
    };
    let service_type: ServiceType = current.service_type.into();
    let rendered = render::render_for(service_type, &ctx, &config)?;

    let protocol_col: db::services::ProtocolColumn = protocol.into();

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    if services::port_in_use(&mut tx, node_id, port, protocol_col, Some(service_id)).await? {
        return Err(AppError::conflict(
            "PORT_IN_USE",
            format!("port {port}/{} is already allocated on this node", protocol_label(protocol)),
        ));
    }

    let existing_bundle = bundles::get_bundle_in_tx(&mut tx, service_id).await?;
    let doc_changed = existing_bundle
        .as_ref()
        .map(|bundle| bundle.checksum != rendered.checksum)
        .unwrap_or(true);

    services::update_service(
        &mut tx,
        service_id,
        db::ServiceUpdate {
            name: req.name.map(|_| name.clone()),
            protocol: req.protocol.map(Into::into),
            port: req.port.map(|_| port),
            config: req.config.map(|_| config.clone()),
            tags,
            bump_version: doc_changed,
        },
    )
    .await
    .map_err(|err| {
        if crate::error::is_unique_violation(&err) {
            AppError::conflict(
                "SERVICE_NAME_TAKEN",
                "a service with this name already exists on this node",
            )
        } else {
            err.into()
        }
    })?;

    if doc_changed {
        bundles::upsert_bundle(
            &mut tx,
            service_id,
            current.service_type,
            rendered.doc,
            &rendered.checksum,
            Utc::now(),
        )
        .await?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;

    fetch_owned_service(state, identity, node_id, service_id).await
}

pub async fn delete_service(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Uuid,
    service_id: Uuid,
) -> ApiResult<()> {
    fetch_owned_service(state, identity, node_id, service_id).await?;

    let mut tx = state.db.begin().await.map_err(anyhow::Error::from)?;
    services::delete_service(&mut tx, service_id).await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(node_id = %node_id, service_id = %service_id, "service instance deleted");
    Ok(())
}

fn protocol_label(protocol: Protocol) -> &'static str {
    protocol.as_str()
}
