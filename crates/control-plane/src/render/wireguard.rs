use serde_json::{json, Value};

use crate::error::ApiResult;

use super::{require_object, EngineRenderer, RenderContext};

/// WireGuard config as a structured document the agent templates into
/// wg-quick format. `interface` is required; `peers` is optional (an
/// interface with no peers is a valid, if lonely, tunnel endpoint).
pub(super) struct WireguardRenderer;

impl EngineRenderer for WireguardRenderer {
    fn schema_version(&self) -> i64 {
        1
    }

    fn render(&self, ctx: &RenderContext, config: &Value) -> ApiResult<Value> {
        require_object(config, "interface")?;

        let mut doc = config.clone();
        if let Some(interface) = doc
            .get_mut("interface")
            .and_then(Value::as_object_mut)
        {
            interface
                .entry("listen_port")
                .or_insert_with(|| json!(ctx.port));
        }
        Ok(doc)
    }
}
