//! The JSON document model shared by every store.
//!
//! A [`Document`] is a JSON object keyed by section name. Stores keep their
//! documents in this untyped form so that merging never loses keys it does
//! not know about; typed views (see [`crate::content`]) are decoded on demand.
//!
//! Merging is deliberately shallow: a loaded or updated section replaces the
//! whole default section, and default sections fill in only the keys that
//! are absent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ImportError;

/// A JSON object keyed by section name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the document, returning the underlying JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Raw value of a section.
    #[must_use]
    pub fn get(&self, section: &str) -> Option<&Value> {
        self.0.get(section)
    }

    /// Mutable raw value of a section.
    pub fn get_mut(&mut self, section: &str) -> Option<&mut Value> {
        self.0.get_mut(section)
    }

    /// Decode a section into a typed view.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the section is missing or does not
    /// match `T`.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T, serde_json::Error> {
        T::deserialize(self.0.get(name).unwrap_or(&Value::Null))
    }

    /// Replace one section.
    pub fn set_section(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Shallow-merge section updates into this document.
    ///
    /// Each key in `partial` replaces the whole section of the same name.
    /// `null` values are skipped.
    pub fn apply_sections(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            if !value.is_null() {
                self.0.insert(key, value);
            }
        }
    }

    /// Section names in key order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Merge a loaded object over the defaults.
///
/// The result contains every key of `defaults`. Loaded values win, except
/// `null`, which counts as absent. Keys present only in `loaded` are kept.
#[must_use]
pub fn merge_over_defaults(defaults: &Document, loaded: Map<String, Value>) -> Document {
    let mut merged = defaults.clone();
    merged.apply_sections(loaded);
    merged
}

/// Parse text as a JSON object.
///
/// # Errors
///
/// [`ImportError::Parse`] for invalid JSON, [`ImportError::NotAnObject`] for
/// any other JSON value.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, ImportError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ImportError::Parse {
        reason: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ImportError::NotAnObject {
            found: json_kind(&other),
        }),
    }
}

/// Parse stored bytes as a JSON object, or `None` if they are malformed.
pub(crate) fn parse_stored(bytes: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewrite Imgur page links into direct image links, recursively.
///
/// `https://imgur.com/AbC123` becomes `https://i.imgur.com/AbC123.png`.
/// Album and gallery links are left alone. Returns the number of rewritten
/// strings.
pub fn normalize_links(value: &mut Value) -> usize {
    match value {
        Value::String(s) => match direct_imgur_link(s) {
            Some(direct) => {
                tracing::debug!(from = %s, to = %direct, "rewrote imgur link");
                *s = direct;
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(normalize_links).sum(),
        Value::Object(map) => map.values_mut().map(normalize_links).sum(),
        _ => 0,
    }
}

fn direct_imgur_link(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if !matches!(parsed.host_str(), Some("imgur.com" | "www.imgur.com")) {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let id = first.split('.').next().unwrap_or_default();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!("https://i.imgur.com/{id}.png"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => Document::from(map),
            _ => unreachable!("test documents are objects"),
        }
    }

    fn obj(value: Value) -> Map<String, Value> {
        doc(value).into_map()
    }

    #[test]
    fn merge_keeps_every_default_key() {
        let defaults = doc(json!({"banner": {"title": "A"}, "footer": {"text": "F"}}));
        let merged = merge_over_defaults(&defaults, obj(json!({"banner": {"title": "B"}})));

        assert_eq!(merged.get("banner"), Some(&json!({"title": "B"})));
        assert_eq!(merged.get("footer"), Some(&json!({"text": "F"})));
    }

    #[test]
    fn merge_preserves_unknown_keys() {
        let defaults = doc(json!({"banner": {}}));
        let merged = merge_over_defaults(&defaults, obj(json!({"extra": [1, 2]})));
        assert_eq!(merged.get("extra"), Some(&json!([1, 2])));
        assert!(merged.get("banner").is_some());
    }

    #[test]
    fn merge_is_shallow() {
        let defaults = doc(json!({"banner": {"title": "A", "subtitle": "S"}}));
        let merged = merge_over_defaults(&defaults, obj(json!({"banner": {"title": "B"}})));
        // The loaded section replaces the default section as a whole.
        assert_eq!(merged.get("banner"), Some(&json!({"title": "B"})));
    }

    #[test]
    fn merge_treats_null_as_absent() {
        let defaults = doc(json!({"banner": {"title": "A"}}));
        let merged = merge_over_defaults(&defaults, obj(json!({"banner": null})));
        assert_eq!(merged.get("banner"), Some(&json!({"title": "A"})));
    }

    #[test]
    fn parse_object_rejects_truncated_json() {
        let err = parse_object("{\"banner\": {\"title\": ").unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }

    #[test]
    fn parse_object_rejects_non_objects() {
        let err = parse_object("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ImportError::NotAnObject { found: "an array" }));
    }

    #[test]
    fn parse_stored_returns_none_for_garbage() {
        assert!(parse_stored(b"not json").is_none());
        assert!(parse_stored(b"42").is_none());
        assert!(parse_stored(b"{}").is_some());
    }

    #[test]
    fn imgur_page_links_become_direct_links() {
        let mut value = json!({
            "photo": "https://imgur.com/8lVaUqP",
            "logo": "https://imgur.com/8lVaUqP.png",
            "nested": [{"img": "http://imgur.com/abc123"}],
        });
        let count = normalize_links(&mut value);

        assert_eq!(count, 3);
        assert_eq!(value["photo"], "https://i.imgur.com/8lVaUqP.png");
        assert_eq!(value["logo"], "https://i.imgur.com/8lVaUqP.png");
        assert_eq!(value["nested"][0]["img"], "https://i.imgur.com/abc123.png");
    }

    #[test]
    fn other_links_are_untouched() {
        let mut value = json!({
            "direct": "https://i.imgur.com/xyz.png",
            "album": "https://imgur.com/a/xyz",
            "other": "https://example.com/imgur.com/xyz",
            "text": "not a url",
        });
        let before = value.clone();
        assert_eq!(normalize_links(&mut value), 0);
        assert_eq!(value, before);
    }
}
