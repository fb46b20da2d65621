use axum::{response::IntoResponse, Json};
use chrono::Utc;

use crate::error::AppError;

pub(crate) fn into_response(err: AppError) -> axum::response::Response {
    let body = Json(serde_json::json!({
        "error": err.message,
        "code": err.code,
        "timestamp": Utc::now(),
    }));
    let mut response = (err.status, body).into_response();
    if let Some(headers) = err.headers.as_deref() {
        for (name, value) in headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        into_response(self)
    }
}
