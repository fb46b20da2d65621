use axum::http::Request;
use metrics::counter;
use sqlx::Error as SqlxError;
use tower_http::request_id::RequestId;

pub(crate) fn request_id_from_request<B>(req: &Request<B>) -> Option<String> {
    req.extensions()
        .get::<RequestId>()
        .and_then(request_id_value)
}

fn request_id_value(id: &RequestId) -> Option<String> {
    id.header_value()
        .to_str()
        .ok()
        .map(|value| value.to_string())
}

pub(crate) fn record_internal_error_metrics(err: &anyhow::Error) {
    counter!("xpanel_internal_errors_total").increment(1);
    if let Some(db_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())
    {
        let kind = match db_err {
            SqlxError::RowNotFound => "row_not_found",
            SqlxError::Database(_) => "database",
            SqlxError::Io(_) => "io",
            SqlxError::Tls(_) => "tls",
            _ => "other",
        };
        counter!("xpanel_db_errors_total", "kind" => kind).increment(1);
    }
}
