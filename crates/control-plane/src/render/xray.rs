use serde_json::{json, Value};

use crate::error::ApiResult;

use super::{require_array, EngineRenderer, RenderContext};

/// Xray-core JSON config. The operator supplies `inbounds` (and any of
/// the other top-level xray sections); missing log/outbounds get the
/// engine defaults.
pub(super) struct XrayRenderer;

impl EngineRenderer for XrayRenderer {
    fn schema_version(&self) -> i64 {
        1
    }

    fn render(&self, _ctx: &RenderContext, config: &Value) -> ApiResult<Value> {
        require_array(config, "inbounds")?;

        let mut doc = config.clone();
        let map = doc.as_object_mut().ok_or_else(|| {
            super::config_invalid("config must be a JSON object")
        })?;
        map.entry("log")
            .or_insert_with(|| json!({"loglevel": "warning"}));
        map.entry("outbounds")
            .or_insert_with(|| json!([{"protocol": "freedom", "tag": "direct"}]));
        Ok(doc)
    }
}
