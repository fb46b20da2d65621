use super::*;
use tower_http::limit::RequestBodyLimitLayer;

use crate::services::commands::EnqueueCommandRequest;
use crate::services::instances::{CreateServiceRequest, UpdateServiceRequest};
use crate::services::nodes::{CreateNodeRequest, ListNodesRequest, UpdateNodeRequest};

pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.limits.admin_body_bytes;

    Router::<AppState>::new()
        .route(
            "/api/v1/nodes",
            axum::routing::post(create_node).get(list_nodes),
        )
        .route(
            "/api/v1/nodes/{node_id}",
            axum::routing::get(get_node)
                .put(update_node)
                .delete(delete_node),
        )
        .route(
            "/api/v1/nodes/{node_id}/services",
            axum::routing::post(create_service).get(list_services),
        )
        .route(
            "/api/v1/nodes/{node_id}/services/{service_id}",
            axum::routing::get(get_service)
                .put(update_service)
                .delete(delete_service),
        )
        .route(
            "/api/v1/nodes/{node_id}/commands",
            axum::routing::post(enqueue_command).get(list_commands),
        )
        .layer(RequestBodyLimitLayer::new(body_limit as usize))
        .route_layer(middleware::from_fn_with_state(state, require_admin_auth))
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes",
    request_body = CreateNodeRequest,
    responses(
        (status = 201, description = "Node registered", body = NodeView),
        (status = 409, description = "Node name already taken"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn create_node(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Json(payload): Json<CreateNodeRequest>,
) -> ApiResult<impl IntoResponse> {
    let node = services::nodes::create_node(&state, &identity, payload).await?;
    Ok((StatusCode::CREATED, Json(NodeView::from(node))))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    params(
        ("status" = Option<String>, Query, description = "Filter by node status"),
        ("tag" = Option<String>, Query, description = "Filter by tag"),
        ("search" = Option<String>, Query, description = "Prefix match on name or hostname"),
    ),
    responses((status = 200, description = "Nodes owned by the caller", body = [NodeView])),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn list_nodes(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Query(query): Query<ListNodesRequest>,
) -> ApiResult<Json<Vec<NodeView>>> {
    let nodes = services::nodes::list_nodes(&state, &identity, query).await?;
    Ok(Json(nodes.into_iter().map(NodeView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes/{node_id}",
    params(("node_id" = Uuid, Path, description = "Node id")),
    responses(
        (status = 200, description = "Node detail", body = NodeView),
        (status = 404, description = "Unknown node"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn get_node(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<Json<NodeView>> {
    let node = services::nodes::get_node(&state, &identity, node_id).await?;
    Ok(Json(node.into()))
}

#[utoipa::path(
    put,
    path = "/api/v1/nodes/{node_id}",
    params(("node_id" = Uuid, Path, description = "Node id")),
    request_body = UpdateNodeRequest,
    responses(
        (status = 200, description = "Updated node", body = NodeView),
        (status = 409, description = "Node name already taken"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn update_node(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
    Json(payload): Json<UpdateNodeRequest>,
) -> ApiResult<Json<NodeView>> {
    let node = services::nodes::update_node(&state, &identity, node_id, payload).await?;
    Ok(Json(node.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/nodes/{node_id}",
    params(("node_id" = Uuid, Path, description = "Node id")),
    responses(
        (status = 204, description = "Node deleted"),
        (status = 409, description = "Node still has services"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn delete_node(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    services::nodes::delete_node(&state, &identity, node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes/{node_id}/services",
    params(("node_id" = Uuid, Path, description = "Node id")),
    request_body = CreateServiceRequest,
    responses(
        (status = 201, description = "Service instance created", body = ServiceView),
        (status = 400, description = "Config rejected by the renderer"),
        (status = 409, description = "Name or port already taken"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn create_service(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
    Json(payload): Json<CreateServiceRequest>,
) -> ApiResult<impl IntoResponse> {
    let service = services::instances::create_service(&state, &identity, node_id, payload).await?;
    Ok((StatusCode::CREATED, Json(ServiceView::from(service))))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes/{node_id}/services",
    params(("node_id" = Uuid, Path, description = "Node id")),
    responses((status = 200, description = "Services on the node", body = [ServiceView])),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn list_services(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ServiceView>>> {
    let list = services::instances::list_services(&state, &identity, node_id).await?;
    Ok(Json(list.into_iter().map(ServiceView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes/{node_id}/services/{service_id}",
    params(
        ("node_id" = Uuid, Path, description = "Node id"),
        ("service_id" = Uuid, Path, description = "Service id"),
    ),
    responses((status = 200, description = "Service detail", body = ServiceView)),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn get_service(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path((node_id, service_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ServiceView>> {
    let service = services::instances::get_service(&state, &identity, node_id, service_id).await?;
    Ok(Json(service.into()))
}

#[utoipa::path(
    put,
    path = "/api/v1/nodes/{node_id}/services/{service_id}",
    params(
        ("node_id" = Uuid, Path, description = "Node id"),
        ("service_id" = Uuid, Path, description = "Service id"),
    ),
    request_body = UpdateServiceRequest,
    responses(
        (status = 200, description = "Updated service", body = ServiceView),
        (status = 400, description = "Config rejected by the renderer"),
        (status = 409, description = "Name or port already taken"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn update_service(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path((node_id, service_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateServiceRequest>,
) -> ApiResult<Json<ServiceView>> {
    let service =
        services::instances::update_service(&state, &identity, node_id, service_id, payload)
            .await?;
    Ok(Json(service.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/nodes/{node_id}/services/{service_id}",
    params(
        ("node_id" = Uuid, Path, description = "Node id"),
        ("service_id" = Uuid, Path, description = "Service id"),
    ),
    responses((status = 204, description = "Service deleted")),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn delete_service(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path((node_id, service_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    services::instances::delete_service(&state, &identity, node_id, service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/nodes/{node_id}/commands",
    params(("node_id" = Uuid, Path, description = "Node id")),
    request_body = EnqueueCommandRequest,
    responses(
        (status = 201, description = "Command queued for the next heartbeat", body = CommandView),
        (status = 404, description = "Unknown node or service"),
    ),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn enqueue_command(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
    Json(payload): Json<EnqueueCommandRequest>,
) -> ApiResult<impl IntoResponse> {
    let command = services::commands::enqueue_command(&state, &identity, node_id, payload).await?;
    Ok((StatusCode::CREATED, Json(CommandView::from(command))))
}

#[utoipa::path(
    get,
    path = "/api/v1/nodes/{node_id}/commands",
    params(("node_id" = Uuid, Path, description = "Node id")),
    responses((status = 200, description = "Commands for the node", body = [CommandView])),
    security(("bearer" = [])),
    tag = "nodes"
)]
pub(crate) async fn list_commands(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(node_id): Path<Uuid>,
) -> ApiResult<Json<Vec<CommandView>>> {
    let commands = services::commands::list_commands(&state, &identity, node_id).await?;
    Ok(Json(commands.into_iter().map(CommandView::from).collect()))
}
