use serde_json::{json, Value};

use crate::error::ApiResult;

use super::{require_array, EngineRenderer, RenderContext};

/// Sing-box JSON config. Both `inbounds` and `outbounds` are required;
/// sing-box refuses to start without an outbound chain.
pub(super) struct SingboxRenderer;

impl EngineRenderer for SingboxRenderer {
    fn schema_version(&self) -> i64 {
        1
    }

    fn render(&self, _ctx: &RenderContext, config: &Value) -> ApiResult<Value> {
        require_array(config, "inbounds")?;
        require_array(config, "outbounds")?;

        let mut doc = config.clone();
        let map = doc.as_object_mut().ok_or_else(|| {
            super::config_invalid("config must be a JSON object")
        })?;
        map.entry("log")
            .or_insert_with(|| json!({"level": "warn", "timestamp": true}));
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{render_for, RenderContext};
    use common::api::{Protocol, ServiceType};
    use serde_json::json;

    fn ctx() -> RenderContext {
        RenderContext {
            service_name: "sb".into(),
            port: 8443,
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn requires_both_inbounds_and_outbounds() {
        let only_in = json!({"inbounds": [{"type": "vmess", "listen_port": 8443}]});
        let err = render_for(ServiceType::Singbox, &ctx(), &only_in).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");

        let full = json!({
            "inbounds": [{"type": "vmess", "listen_port": 8443}],
            "outbounds": [{"type": "direct"}]
        });
        let rendered = render_for(ServiceType::Singbox, &ctx(), &full).unwrap();
        assert_eq!(rendered.doc["log"]["level"], "warn");
    }
}
