use crate::service::ServiceClient;
use layercore::{is_http_url, NodeConfig, NodeContext, NodeError, Value};

/// Upstream acceptance for kinds that take any text
pub(crate) fn accept_text(value: &Value) -> Option<String> {
    Some(value.render())
}

/// Upstream acceptance for kinds that need a resource URL
pub(crate) fn accept_url(value: &Value) -> Option<String> {
    value.as_url().map(str::to_string)
}

/// Config text for `key`, or `default` when absent or blank
pub(crate) fn setting<'a>(config: &'a NodeConfig, key: &str, default: &'a str) -> &'a str {
    let value = config.text(key);
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Service reply that points at a generated resource
pub(crate) fn resource(result: serde_json::Value) -> Value {
    match result {
        serde_json::Value::String(s) if is_http_url(&s) => Value::Url(s),
        other => Value::from_result(other),
    }
}

/// Call `endpoint`, giving up early if the run is stopped
pub(crate) async fn call_service(
    client: &dyn ServiceClient,
    ctx: &NodeContext,
    endpoint: &str,
    payload: serde_json::Value,
) -> Result<serde_json::Value, NodeError> {
    tracing::info!("Node {} calling '{}'", ctx.node_id, endpoint);
    ctx.events.info(format!("Calling {endpoint}"));

    tokio::select! {
        reply = client.call(endpoint, payload) => Ok(reply?),
        _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
    }
}
