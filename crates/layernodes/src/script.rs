//! Data shaping between nodes.
//!
//! The `filter` kind never runs user code. `transform` picks one of a fixed
//! set of operations; everything else it needs comes from config fields.

use async_trait::async_trait;
use layercore::{NodeContext, NodeError, NodeHandler, NodeKind, NodeMetadata, Value};

/// Operations the script kind can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Passthrough,
    Uppercase,
    Lowercase,
    Trim,
    Length,
    JsonParse,
    JsonStringify,
    /// Follow the dotted `field` path into JSON input
    Extract,
    /// Every upstream result, joined by `separator`
    Join,
    /// `code` with `{{id}}` markers resolved
    Template,
}

impl Transform {
    pub const ALL: [Transform; 10] = [
        Transform::Passthrough,
        Transform::Uppercase,
        Transform::Lowercase,
        Transform::Trim,
        Transform::Length,
        Transform::JsonParse,
        Transform::JsonStringify,
        Transform::Extract,
        Transform::Join,
        Transform::Template,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transform::Passthrough => "passthrough",
            Transform::Uppercase => "uppercase",
            Transform::Lowercase => "lowercase",
            Transform::Trim => "trim",
            Transform::Length => "length",
            Transform::JsonParse => "json_parse",
            Transform::JsonStringify => "json_stringify",
            Transform::Extract => "extract",
            Transform::Join => "join",
            Transform::Template => "template",
        }
    }

    /// Blank selects passthrough; unknown names are a configuration error
    pub fn from_name(name: &str) -> Result<Self, NodeError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Transform::Passthrough);
        }
        Transform::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| NodeError::Configuration(format!("unknown transform '{name}'")))
    }
}

pub struct ScriptHandler;

impl ScriptHandler {
    /// Value the transform works on, by the manual-over-upstream rule
    fn input(ctx: &NodeContext) -> Value {
        if let Some(manual) = ctx.manual_input("prompt") {
            return Value::Text(manual);
        }
        match ctx.upstream_results().next() {
            Some((_, value)) => value.clone(),
            None => Value::Text(ctx.resolved("prompt")),
        }
    }
}

#[async_trait]
impl NodeHandler for ScriptHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Script
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let transform = Transform::from_name(ctx.config.text("transform"))?;
        tracing::debug!("Node {} applying {}", ctx.node_id, transform.name());

        match transform {
            Transform::Join => {
                let separator = match ctx.config.get("separator") {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    _ => "\n".to_string(),
                };
                let parts: Vec<String> = ctx
                    .upstream_results()
                    .map(|(_, value)| value.render())
                    .collect();
                Ok(Value::Text(parts.join(&separator)))
            }
            Transform::Template => Ok(Value::Text(ctx.resolved("code"))),
            Transform::Extract => {
                let path = ctx.config.text("field").trim().to_string();
                if path.is_empty() {
                    return Err(NodeError::Configuration(
                        "extract needs a 'field' path".to_string(),
                    ));
                }
                extract(&json_view(&Self::input(&ctx)), &path)
            }
            other => apply(other, Self::input(&ctx)),
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Apply a built-in transform to upstream data".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Single-input transforms
fn apply(transform: Transform, input: Value) -> Result<Value, NodeError> {
    let value = match transform {
        Transform::Passthrough => input,
        Transform::Uppercase => Value::Text(input.render().to_uppercase()),
        Transform::Lowercase => Value::Text(input.render().to_lowercase()),
        Transform::Trim => Value::Text(input.render().trim().to_string()),
        Transform::Length => {
            let len = match input.as_json() {
                Some(serde_json::Value::Array(items)) => items.len(),
                Some(serde_json::Value::Object(map)) => map.len(),
                _ => input.render().chars().count(),
            };
            Value::Json(len.into())
        }
        Transform::JsonParse => {
            let json = serde_json::from_str(&input.render()).map_err(|e| {
                NodeError::InvalidInput {
                    field: "input".to_string(),
                    reason: format!("not valid JSON: {e}"),
                }
            })?;
            Value::Json(json)
        }
        Transform::JsonStringify => Value::Text(input.to_json().to_string()),
        Transform::Extract | Transform::Join | Transform::Template => {
            return Err(NodeError::ExecutionFailed(format!(
                "{} is not a single-input transform",
                transform.name()
            )))
        }
    };
    Ok(value)
}

/// JSON form of the input; text that holds JSON is parsed
fn json_view(input: &Value) -> serde_json::Value {
    match input {
        Value::Text(text) => serde_json::from_str(text).unwrap_or_else(|_| input.to_json()),
        other => other.to_json(),
    }
}

fn extract(root: &serde_json::Value, path: &str) -> Result<Value, NodeError> {
    let mut current = root;
    for segment in path.split('.') {
        let next = match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        current = next.ok_or_else(|| NodeError::InvalidInput {
            field: "field".to_string(),
            reason: format!("path '{path}' not found at '{segment}'"),
        })?;
    }
    Ok(Value::from_result(current.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transform_names_round_trip() {
        for t in Transform::ALL {
            assert_eq!(Transform::from_name(t.name()).unwrap(), t);
        }
        assert_eq!(Transform::from_name("  ").unwrap(), Transform::Passthrough);
        assert!(matches!(
            Transform::from_name("eval"),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn extract_walks_objects_and_arrays() {
        let root = json!({"items": [{"name": "first"}, {"name": "second"}]});
        assert_eq!(
            extract(&root, "items.1.name").unwrap(),
            Value::Text("second".to_string())
        );
        assert_eq!(extract(&root, "items.0").unwrap(), Value::Json(json!({"name": "first"})));
        assert!(extract(&root, "items.9.name").is_err());
        assert!(extract(&root, "missing").is_err());
    }

    #[test]
    fn length_counts_chars_or_items() {
        assert_eq!(apply(Transform::Length, Value::from("héllo")).unwrap(), Value::Json(json!(5)));
        assert_eq!(
            apply(Transform::Length, Value::Json(json!([1, 2, 3]))).unwrap(),
            Value::Json(json!(3))
        );
    }

    #[test]
    fn json_parse_rejects_garbage() {
        assert_eq!(
            apply(Transform::JsonParse, Value::from(r#"{"a":1}"#)).unwrap(),
            Value::Json(json!({"a": 1}))
        );
        assert!(matches!(
            apply(Transform::JsonParse, Value::from("{nope")),
            Err(NodeError::InvalidInput { .. })
        ));
    }
}
