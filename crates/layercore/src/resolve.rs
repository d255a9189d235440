//! `{{node_id}}` substitution against the execution context.
//!
//! A marker whose id has no result yet is left exactly as written, so a
//! node can be previewed before its dependency has run and "not yet
//! available" stays distinguishable from "empty".

use crate::ExecutionContext;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("marker pattern is valid"))
}

/// Replace every `{{id}}` marker with the rendered context value for `id`.
pub fn resolve(text: &str, context: &ExecutionContext) -> String {
    if text.is_empty() {
        return String::new();
    }

    marker()
        .replace_all(text, |caps: &Captures| match context.get(caps[1].trim()) {
            Some(value) => value.render(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// True when `text` still contains a `{{...}}` marker.
pub fn has_unresolved_reference(text: &str) -> bool {
    marker().is_match(text)
}

/// Ids referenced by markers in `text`, in order of appearance.
pub fn references(text: &str) -> Vec<String> {
    marker()
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}
