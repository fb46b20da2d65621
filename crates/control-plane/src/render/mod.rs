//! Engine-native configuration rendering.
//!
//! One renderer per supported proxy engine. A renderer validates the
//! operator-supplied config document, fills engine defaults, and hands
//! back the document that will be shipped to agents. Canonicalization
//! and checksumming are shared so the same logical input always yields
//! the same checksum.

mod haproxy;
mod nginx;
mod singbox;
mod wireguard;
mod xray;

use serde_json::Value;

use common::api::{Protocol, ServiceType};

use crate::error::{ApiResult, AppError};
use crate::tokens;

/// Service parameters a renderer may fold into the engine document.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub service_name: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// Output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub doc: Value,
    pub checksum: String,
    pub schema_version: i64,
}

trait EngineRenderer {
    /// Bumped whenever the emitted document shape changes incompatibly.
    fn schema_version(&self) -> i64;

    /// Validate the raw config and produce the engine-native document.
    /// Callers canonicalize and checksum the result.
    fn render(&self, ctx: &RenderContext, config: &Value) -> ApiResult<Value>;
}

fn renderer_for(service_type: ServiceType) -> &'static dyn EngineRenderer {
    match service_type {
        ServiceType::Xray => &xray::XrayRenderer,
        ServiceType::Singbox => &singbox::SingboxRenderer,
        ServiceType::Nginx => &nginx::NginxRenderer,
        ServiceType::Haproxy => &haproxy::HaproxyRenderer,
        ServiceType::Wireguard => &wireguard::WireguardRenderer,
    }
}

/// Render a service config into its canonical engine-native form.
pub fn render_for(
    service_type: ServiceType,
    ctx: &RenderContext,
    config: &Value,
) -> ApiResult<Rendered> {
    let renderer = renderer_for(service_type);
    let doc = canonicalize(&renderer.render(ctx, config)?);
    let serialized = serde_json::to_string(&doc)
        .map_err(|err| AppError::internal(&format!("render serialization failed: {err}")))?;
    let checksum = tokens::sha256_hex(serialized.as_bytes());
    Ok(Rendered {
        doc,
        checksum,
        schema_version: renderer.schema_version(),
    })
}

fn config_invalid(msg: impl Into<String>) -> AppError {
    AppError::bad_request("CONFIG_INVALID", msg)
}

fn require_object<'a>(config: &'a Value, section: &str) -> ApiResult<&'a Value> {
    match config.get(section) {
        Some(value) if value.is_object() => Ok(value),
        Some(_) => Err(config_invalid(format!("section '{section}' must be an object"))),
        None => Err(config_invalid(format!("missing required section '{section}'"))),
    }
}

fn require_array<'a>(config: &'a Value, section: &str) -> ApiResult<&'a Vec<Value>> {
    match config.get(section) {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items),
        Some(Value::Array(_)) => Err(config_invalid(format!("section '{section}' must not be empty"))),
        Some(_) => Err(config_invalid(format!("section '{section}' must be an array"))),
        None => Err(config_invalid(format!("missing required section '{section}'"))),
    }
}

/// Recursively sort object keys and drop nulls so serialization is
/// byte-stable across runs and sqlx round-trips.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                let inner = &map[key];
                if inner.is_null() {
                    continue;
                }
                out.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
