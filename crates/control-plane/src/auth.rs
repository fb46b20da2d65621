use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderName, Request},
    middleware::Next,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    error::{ApiResult, AppError},
    persistence,
    persistence::tokens::TokenStatusColumn,
    tokens,
};

pub const AGENT_TOKEN_HEADER: &str = "x-agent-token";

/// Identity of an authenticated admin, attached to request extensions.
#[derive(Clone, Debug)]
pub struct AdminIdentity {
    pub subject: String,
    pub email: Option<String>,
}

/// Identity of an authenticated agent, attached to request extensions.
#[derive(Clone, Debug)]
pub struct AgentIdentity {
    pub token_id: Uuid,
    pub node_id: Uuid,
}

/// Middleware guarding the admin surface: `Authorization: Bearer <jwt>`.
pub async fn require_admin_auth(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let token = extract_bearer(req.headers())?;

    let identity = (state.admin_token_validator)(&state, &token)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::unauthorized("AUTH_INVALID", "invalid bearer token"))?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Middleware guarding the agent surface: `X-Agent-Token: <secret>`.
pub async fn require_agent_auth(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> ApiResult<axum::response::Response> {
    let secret = extract_agent_secret(req.headers())?;
    let identity = authenticate_agent(&state, &secret).await?;

    if let Some(limiter) = &state.agent_limiter {
        let mut limiter = limiter.lock().await;
        let decision = limiter.acquire(identity.token_id);
        if !decision.allowed {
            return Err(AppError::too_many_requests("agent rate limit exceeded")
                .with_headers(decision.headers()));
        }
    }

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Resolve an agent secret to its identity, enforcing token status.
pub async fn authenticate_agent(state: &AppState, secret: &str) -> ApiResult<AgentIdentity> {
    let digest = tokens::secret_hash(secret, &state.token_pepper);
    let record = persistence::tokens::get_agent_token_by_secret_hash(&state.db, &digest)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::unauthorized("AUTH_INVALID", "unknown agent token"))?;

    // Constant-time recheck; the indexed lookup already matched, this
    // guards against a collation surprise in the hash column.
    if !tokens::hashes_match(&record.secret_hash, &digest) {
        return Err(AppError::unauthorized("AUTH_INVALID", "unknown agent token"));
    }

    match record.effective_status(Utc::now()) {
        TokenStatusColumn::Active => {}
        TokenStatusColumn::Revoked => {
            return Err(AppError::unauthorized(
                "AUTH_REVOKED",
                "agent token has been revoked",
            ));
        }
        TokenStatusColumn::Expired => {
            if record.status == TokenStatusColumn::Active {
                if let Err(err) =
                    persistence::tokens::mark_agent_token_expired(&state.db, record.id).await
                {
                    warn!(token_id = %record.id, %err, "failed to persist token expiry");
                }
            }
            return Err(AppError::unauthorized(
                "AUTH_EXPIRED",
                "agent token has expired",
            ));
        }
    }

    // Best effort; losing a last_used touch never fails the request.
    let _ = persistence::tokens::touch_agent_token_last_used(&state.db, record.id).await;

    Ok(AgentIdentity {
        token_id: record.id,
        node_id: record.node_id,
    })
}

pub fn extract_agent_secret(headers: &HeaderMap) -> ApiResult<String> {
    let value = headers
        .get(AGENT_TOKEN_HEADER)
        .ok_or_else(|| AppError::unauthorized("AUTH_INVALID", "missing agent token header"))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("AUTH_INVALID", "invalid agent token header"))?;

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::unauthorized(
            "AUTH_INVALID",
            "empty agent token header",
        ));
    }

    Ok(trimmed.to_string())
}

pub fn extract_bearer(headers: &HeaderMap) -> ApiResult<String> {
    extract_bearer_from_header(headers, &AUTHORIZATION, "authorization header")
}

pub fn extract_bearer_from_header(
    headers: &HeaderMap,
    header: &HeaderName,
    context: &str,
) -> ApiResult<String> {
    let value = headers
        .get(header)
        .ok_or_else(|| AppError::unauthorized("AUTH_INVALID", format!("missing {context}")))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("AUTH_INVALID", format!("invalid {context}")))?;

    let prefix = "Bearer ";
    if !value.starts_with(prefix) {
        return Err(AppError::unauthorized(
            "AUTH_INVALID",
            format!("invalid {context} scheme"),
        ));
    }

    Ok(value[prefix.len()..].to_string())
}

/// Default admin validator: verify the JWT against the provider JWKS.
pub async fn jwks_admin_token_validator(
    state: &AppState,
    token: &str,
) -> crate::Result<Option<AdminIdentity>> {
    let Some(claims) = state.jwks.verify(token).await? else {
        return Ok(None);
    };

    Ok(Some(AdminIdentity {
        subject: claims.sub,
        email: claims.email,
    }))
}
