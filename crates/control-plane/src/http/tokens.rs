use super::*;
use tower_http::limit::RequestBodyLimitLayer;

use crate::services::tokens::{IssueTokenRequest, UpdateTokenRequest};

pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.limits.admin_body_bytes;

    Router::<AppState>::new()
        .route(
            "/api/v1/agent-tokens",
            axum::routing::post(issue_token).get(list_tokens),
        )
        .route(
            "/api/v1/agent-tokens/{token_id}",
            axum::routing::get(get_token)
                .put(update_token)
                .delete(delete_token),
        )
        .route(
            "/api/v1/agent-tokens/{token_id}/revoke",
            axum::routing::post(revoke_token),
        )
        .layer(RequestBodyLimitLayer::new(body_limit as usize))
        .route_layer(middleware::from_fn_with_state(state, require_admin_auth))
}

#[utoipa::path(
    post,
    path = "/api/v1/agent-tokens",
    request_body = IssueTokenRequest,
    responses(
        (status = 201, description = "Token issued; the secret appears only in this response", body = IssuedTokenView),
        (status = 404, description = "Unknown node"),
    ),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn issue_token(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Json(payload): Json<IssueTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let issued = services::tokens::issue_token(&state, &identity, payload).await?;
    let view = IssuedTokenView {
        token: issued.record.into(),
        secret: issued.secret,
    };
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ListTokensQuery {
    pub node_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/v1/agent-tokens",
    params(("node_id" = Option<Uuid>, Query, description = "Restrict to one node")),
    responses((status = 200, description = "Tokens for nodes owned by the caller", body = [TokenView])),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn list_tokens(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Query(query): Query<ListTokensQuery>,
) -> ApiResult<Json<Vec<TokenView>>> {
    let tokens = services::tokens::list_tokens(&state, &identity, query.node_id).await?;
    Ok(Json(tokens.into_iter().map(TokenView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/agent-tokens/{token_id}",
    params(("token_id" = Uuid, Path, description = "Token id")),
    responses((status = 200, description = "Token detail, never the secret", body = TokenView)),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn get_token(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(token_id): Path<Uuid>,
) -> ApiResult<Json<TokenView>> {
    let token = services::tokens::get_token(&state, &identity, token_id).await?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    put,
    path = "/api/v1/agent-tokens/{token_id}",
    params(("token_id" = Uuid, Path, description = "Token id")),
    request_body = UpdateTokenRequest,
    responses((status = 200, description = "Renamed token", body = TokenView)),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn update_token(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(token_id): Path<Uuid>,
    Json(payload): Json<UpdateTokenRequest>,
) -> ApiResult<Json<TokenView>> {
    let token = services::tokens::update_token(&state, &identity, token_id, payload).await?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/agent-tokens/{token_id}/revoke",
    params(("token_id" = Uuid, Path, description = "Token id")),
    responses((status = 200, description = "Token revoked (idempotent)", body = TokenView)),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn revoke_token(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(token_id): Path<Uuid>,
) -> ApiResult<Json<TokenView>> {
    let token = services::tokens::revoke_token(&state, &identity, token_id).await?;
    Ok(Json(token.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/agent-tokens/{token_id}",
    params(("token_id" = Uuid, Path, description = "Token id")),
    responses((status = 204, description = "Token deleted")),
    security(("bearer" = [])),
    tag = "tokens"
)]
pub(crate) async fn delete_token(
    State(state): State<AppState>,
    Extension(identity): Extension<AdminIdentity>,
    Path(token_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    services::tokens::delete_token(&state, &identity, token_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
