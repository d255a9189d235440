use serde::{Deserialize, Serialize};

/// Result value produced by a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Text(String),
    /// Reference to an external resource (generated image, video, ...)
    Url(String),
    Json(serde_json::Value),
    StructuredPrompt(StructuredPrompt),
}

/// Positive/negative prompt pair handed from a prompt-generation node to an
/// image-generation node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredPrompt {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
}

impl Value {
    /// Textual form used when the value is substituted into another node's
    /// configuration. Objects render as compact JSON, scalars as their
    /// literal text.
    pub fn render(&self) -> String {
        match self {
            Value::Text(s) | Value::Url(s) => s.clone(),
            Value::Json(serde_json::Value::String(s)) => s.clone(),
            Value::Json(json) => json.to_string(),
            Value::StructuredPrompt(p) => serde_json::json!({
                "prompt": p.prompt,
                "negative_prompt": p.negative_prompt,
            })
            .to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Url(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_structured_prompt(&self) -> Option<&StructuredPrompt> {
        match self {
            Value::StructuredPrompt(p) => Some(p),
            _ => None,
        }
    }

    /// The resource URL this value points at, if it looks like one.
    pub fn as_url(&self) -> Option<&str> {
        self.as_str().filter(|s| is_http_url(s))
    }

    /// JSON view of the value, used by transforms and record capture.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) | Value::Url(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
            Value::StructuredPrompt(p) => serde_json::json!({
                "prompt": p.prompt,
                "negative_prompt": p.negative_prompt,
            }),
        }
    }

    /// Convert a collaborator `result` payload into a value.
    pub fn from_result(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

/// Whether `s` is an `http://` or `https://` address
pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

impl From<StructuredPrompt> for Value {
    fn from(p: StructuredPrompt) -> Self {
        Value::StructuredPrompt(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_addresses_count_as_urls() {
        assert!(is_http_url("https://cdn/a.png"));
        assert!(is_http_url("http://cdn/a.png"));
        assert!(!is_http_url("ftp://cdn/a.png"));
        assert!(!is_http_url("a cat"));

        assert_eq!(Value::from("https://cdn/a.png").as_url(), Some("https://cdn/a.png"));
        assert_eq!(Value::from("a cat").as_url(), None);
    }
}
