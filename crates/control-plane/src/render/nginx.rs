use serde_json::{json, Value};

use crate::error::ApiResult;

use super::{require_object, EngineRenderer, RenderContext};

/// Nginx config expressed as a structured document the agent templates
/// into nginx.conf. The `server` block is required; the listen port is
/// taken from the service when the operator leaves it out.
pub(super) struct NginxRenderer;

impl EngineRenderer for NginxRenderer {
    fn schema_version(&self) -> i64 {
        1
    }

    fn render(&self, ctx: &RenderContext, config: &Value) -> ApiResult<Value> {
        require_object(config, "server")?;

        let mut doc = config.clone();
        if let Some(server) = doc
            .get_mut("server")
            .and_then(Value::as_object_mut)
        {
            server
                .entry("listen")
                .or_insert_with(|| json!(ctx.port));
            server
                .entry("server_name")
                .or_insert_with(|| json!(ctx.service_name));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{render_for, RenderContext};
    use common::api::{Protocol, ServiceType};
    use serde_json::json;

    #[test]
    fn listen_defaults_to_service_port() {
        let ctx = RenderContext {
            service_name: "edge-proxy".into(),
            port: 8080,
            protocol: Protocol::Tcp,
        };
        let config = json!({"server": {"location /": {"proxy_pass": "http://upstream"}}});
        let rendered = render_for(ServiceType::Nginx, &ctx, &config).unwrap();
        assert_eq!(rendered.doc["server"]["listen"], 8080);
        assert_eq!(rendered.doc["server"]["server_name"], "edge-proxy");
    }

    #[test]
    fn server_section_must_be_an_object() {
        let ctx = RenderContext {
            service_name: "edge-proxy".into(),
            port: 8080,
            protocol: Protocol::Tcp,
        };
        let err = render_for(ServiceType::Nginx, &ctx, &json!({"server": []})).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
    }
}
