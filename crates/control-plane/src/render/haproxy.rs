use serde_json::{json, Value};

use crate::error::ApiResult;

use super::{require_object, EngineRenderer, RenderContext};

/// HAProxy config as a structured document. Needs a `frontend` and a
/// `backend`; the frontend bind falls back to the service port.
pub(super) struct HaproxyRenderer;

impl EngineRenderer for HaproxyRenderer {
    fn schema_version(&self) -> i64 {
        1
    }

    fn render(&self, ctx: &RenderContext, config: &Value) -> ApiResult<Value> {
        require_object(config, "frontend")?;
        require_object(config, "backend")?;

        let mut doc = config.clone();
        if let Some(frontend) = doc
            .get_mut("frontend")
            .and_then(Value::as_object_mut)
        {
            frontend
                .entry("bind")
                .or_insert_with(|| json!(format!("*:{}", ctx.port)));
        }
        Ok(doc)
    }
}
