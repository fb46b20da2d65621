//! OpenAPI document for the control plane HTTP API.

pub use crate::http::ApiDoc;
