use axum::http::HeaderMap;
use sqlx::{error::DatabaseError, Error as SqlxError};
use tracing::error;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: axum::http::StatusCode,
    pub code: &'static str,
    pub message: String,
    pub headers: Option<Box<HeaderMap>>,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

const DB_UNAVAILABLE_MESSAGE: &str = "database temporarily unavailable";

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            code: "VALIDATION_FAILED",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            code,
            message: msg.into(),
            headers: None,
        }
    }

    pub fn unauthorized(code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::UNAUTHORIZED,
            code,
            message: msg.into(),
            headers: None,
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::FORBIDDEN,
            code: "NOT_OWNER",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn conflict(code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::CONFLICT,
            code,
            message: msg.into(),
            headers: None,
        }
    }

    pub fn unprocessable(code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message: msg.into(),
            headers: None,
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
            code: "UNAVAILABLE",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::TOO_MANY_REQUESTS,
            code: "RATE_LIMITED",
            message: msg.into(),
            headers: None,
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: msg.to_string(),
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(Box::new(headers));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    SerializationFailure,
    Deadlock,
    Busy,
}

fn map_anyhow_error(err: &anyhow::Error) -> Option<AppError> {
    let sqlx_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())?;
    map_sqlx_error(sqlx_err)
}

fn map_sqlx_error(err: &SqlxError) -> Option<AppError> {
    match err {
        SqlxError::RowNotFound => Some(AppError::not_found("resource not found")),
        SqlxError::Database(db_err) => map_database_error(db_err.as_ref()),
        SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        SqlxError::Io(_) | SqlxError::Tls(_) => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        _ => None,
    }
}

fn map_database_error(err: &dyn DatabaseError) -> Option<AppError> {
    let kind = classify_db_error(err.code().as_deref(), err.message())?;
    match kind {
        DbErrorKind::UniqueViolation => {
            Some(AppError::conflict("CONFLICT", "resource already exists"))
        }
        DbErrorKind::ForeignKeyViolation => {
            Some(AppError::validation("invalid reference"))
        }
        DbErrorKind::NotNullViolation => Some(AppError::validation("missing required field")),
        DbErrorKind::CheckViolation => Some(AppError::validation("invalid request")),
        DbErrorKind::SerializationFailure | DbErrorKind::Deadlock | DbErrorKind::Busy => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
    }
}

fn classify_db_error(code: Option<&str>, message: &str) -> Option<DbErrorKind> {
    let code = code.unwrap_or_default();
    let message = message.to_ascii_lowercase();

    if matches!(code, "23505" | "2067" | "1555")
        || message.contains("unique constraint")
        || message.contains("duplicate key")
    {
        return Some(DbErrorKind::UniqueViolation);
    }

    if matches!(code, "23503" | "787") || message.contains("foreign key constraint") {
        return Some(DbErrorKind::ForeignKeyViolation);
    }

    if code == "23502" || message.contains("not null constraint") {
        return Some(DbErrorKind::NotNullViolation);
    }

    if code == "23514" || message.contains("check constraint") {
        return Some(DbErrorKind::CheckViolation);
    }

    if code == "40001" || message.contains("serialization failure") {
        return Some(DbErrorKind::SerializationFailure);
    }

    if code == "40P01" || message.contains("deadlock") {
        return Some(DbErrorKind::Deadlock);
    }

    if message.contains("database is locked") || message.contains("database is busy") {
        return Some(DbErrorKind::Busy);
    }

    None
}

pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    let Some(sqlx_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())
    else {
        return false;
    };

    match sqlx_err {
        SqlxError::Database(db_err) => matches!(
            classify_db_error(db_err.code().as_deref(), db_err.message()),
            Some(DbErrorKind::UniqueViolation)
        ),
        _ => false,
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(mapped) = map_anyhow_error(&err) {
            if mapped.status.is_server_error() {
                crate::telemetry::record_internal_error_metrics(&err);
                error!(?err, "internal error");
            }
            return mapped;
        }

        crate::telemetry::record_internal_error_metrics(&err);
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}
