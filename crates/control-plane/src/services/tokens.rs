use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::AdminIdentity;
use crate::error::{ApiResult, AppError};
use crate::persistence::{self as db, nodes, tokens};
use crate::services::nodes::fetch_owned;
use crate::tokens::{generate_secret, secret_hash};
use crate::validation;

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct IssueTokenRequest {
    pub node_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, utoipa::ToSchema)]
pub struct UpdateTokenRequest {
    pub name: String,
}

/// The only place the plaintext secret ever leaves the process.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub record: db::AgentTokenRecord,
    pub secret: String,
}

pub async fn issue_token(
    state: &AppState,
    identity: &AdminIdentity,
    req: IssueTokenRequest,
) -> ApiResult<IssuedToken> {
    fetch_owned(state, identity, req.node_id).await?;
    let name = validation::normalize_name("name", &req.name, &state.limits)?;

    // A past expiry is stored as already expired rather than rejected;
    // the caller gets the record back and can see the state.
    let status = match req.expires_at {
        Some(expires_at) if expires_at <= Utc::now() => db::tokens::TokenStatusColumn::Expired,
        _ => db::tokens::TokenStatusColumn::Active,
    };

    let secret = generate_secret();
    let record = tokens::create_agent_token(
        &state.db,
        db::NewAgentToken {
            id: Uuid::new_v4(),
            node_id: req.node_id,
            name,
            secret_hash: secret_hash(&secret, &state.token_pepper),
            status,
            expires_at: req.expires_at,
        },
    )
    .await?;

    tracing::info!(token_id = %record.id, node_id = %record.node_id, "agent token issued");
    Ok(IssuedToken { record, secret })
}

async fn fetch_owned_token(
    state: &AppState,
    identity: &AdminIdentity,
    token_id: Uuid,
) -> ApiResult<db::AgentTokenRecord> {
    let record = tokens::get_agent_token(&state.db, token_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent token not found"))?;
    fetch_owned(state, identity, record.node_id).await?;
    Ok(record)
}

pub async fn get_token(
    state: &AppState,
    identity: &AdminIdentity,
    token_id: Uuid,
) -> ApiResult<db::AgentTokenRecord> {
    fetch_owned_token(state, identity, token_id).await
}

/// Tokens for one owned node, or across all nodes the caller owns.
pub async fn list_tokens(
    state: &AppState,
    identity: &AdminIdentity,
    node_id: Option<Uuid>,
) -> ApiResult<Vec<db::AgentTokenRecord>> {
    match node_id {
        Some(node_id) => {
            fetch_owned(state, identity, node_id).await?;
            tokens::list_agent_tokens(&state.db, node_id)
                .await
                .map_err(Into::into)
        }
        None => {
            let owned = nodes::list_nodes(&state.db, &identity.subject, &Default::default()).await?;
            let mut all = Vec::new();
            for node in owned {
                all.extend(tokens::list_agent_tokens(&state.db, node.id).await?);
            }
            Ok(all)
        }
    }
}

pub async fn update_token(
    state: &AppState,
    identity: &AdminIdentity,
    token_id: Uuid,
    req: UpdateTokenRequest,
) -> ApiResult<db::AgentTokenRecord> {
    fetch_owned_token(state, identity, token_id).await?;
    let name = validation::normalize_name("name", &req.name, &state.limits)?;
    tokens::rename_agent_token(&state.db, token_id, &name).await?;
    fetch_owned_token(state, identity, token_id).await
}

/// Idempotent: revoking a revoked or expired token is a no-op.
pub async fn revoke_token(
    state: &AppState,
    identity: &AdminIdentity,
    token_id: Uuid,
) -> ApiResult<db::AgentTokenRecord> {
    fetch_owned_token(state, identity, token_id).await?;
    tokens::revoke_agent_token(&state.db, token_id).await?;
    let record = fetch_owned_token(state, identity, token_id).await?;
    tracing::info!(token_id = %token_id, "agent token revoked");
    Ok(record)
}

pub async fn delete_token(
    state: &AppState,
    identity: &AdminIdentity,
    token_id: Uuid,
) -> ApiResult<()> {
    fetch_owned_token(state, identity, token_id).await?;
    tokens::delete_agent_token(&state.db, token_id).await?;
    tracing::info!(token_id = %token_id, "agent token deleted");
    Ok(())
}
