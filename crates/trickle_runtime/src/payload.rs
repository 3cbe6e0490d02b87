//! Result shapes delivered to the caller.
//!
//! The initial result answers the non-deferred part of the query. Every
//! later event is a [`DelayedIncrementalResult`] wrapping one
//! [`IncrementalPayload`]. All of them serialize to the GraphQL
//! incremental delivery JSON layout.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trickle_core::{FieldError, ResultPath};

/// Payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Object fragment from `@defer`
    Defer,
    /// List fragment from `@stream`
    Stream,
}

/// Body of a payload; `None` means a non-null violation nulled the fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBody {
    /// `data` of a defer payload, in field declaration order
    Data(Option<IndexMap<String, Value>>),
    /// `items` of a stream payload
    Items(Option<Vec<Value>>),
}

/// One incremental fragment of the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalPayload {
    /// `data` or `items`
    #[serde(flatten)]
    pub body: PayloadBody,
    /// Where the fragment attaches
    pub path: ResultPath,
    /// Label of the originating directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Field errors raised inside this fragment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// Extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, Value>>,
}

impl IncrementalPayload {
    /// Create a defer payload
    #[must_use]
    pub fn defer(
        path: ResultPath,
        label: Option<String>,
        data: Option<IndexMap<String, Value>>,
        errors: Vec<FieldError>,
    ) -> Self {
        Self {
            body: PayloadBody::Data(data),
            path,
            label,
            errors,
            extensions: None,
        }
    }

    /// Create a stream payload
    #[must_use]
    pub fn stream(
        path: ResultPath,
        label: Option<String>,
        items: Option<Vec<Value>>,
        errors: Vec<FieldError>,
    ) -> Self {
        Self {
            body: PayloadBody::Items(items),
            path,
            label,
            errors,
            extensions: None,
        }
    }

    /// Add an extension entry
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// Payload shape
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self.body {
            PayloadBody::Data(_) => PayloadKind::Defer,
            PayloadBody::Items(_) => PayloadKind::Stream,
        }
    }

    /// `data` of a defer payload
    #[must_use]
    pub fn data(&self) -> Option<&IndexMap<String, Value>> {
        match &self.body {
            PayloadBody::Data(data) => data.as_ref(),
            PayloadBody::Items(_) => None,
        }
    }

    /// `items` of a stream payload
    #[must_use]
    pub fn items(&self) -> Option<&[Value]> {
        match &self.body {
            PayloadBody::Items(items) => items.as_deref(),
            PayloadBody::Data(_) => None,
        }
    }

    /// Convert to the response JSON
    #[must_use]
    pub fn to_specification(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One event of the incremental stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedIncrementalResult {
    /// Payloads completed together
    pub incremental: Vec<IncrementalPayload>,
    /// Whether more events follow
    #[serde(rename = "hasNext")]
    pub has_next: bool,
    /// Extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, Value>>,
}

impl DelayedIncrementalResult {
    /// Wrap one payload
    #[must_use]
    pub fn single(payload: IncrementalPayload, has_next: bool) -> Self {
        Self {
            incremental: vec![payload],
            has_next,
            extensions: None,
        }
    }

    /// Convert to the response JSON
    #[must_use]
    pub fn to_specification(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The non-deferred part of the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialResult {
    /// Root data; `None` when a non-null root field was null
    pub data: Option<IndexMap<String, Value>>,
    /// Field errors of the non-deferred fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// Whether incremental events follow
    #[serde(rename = "hasNext")]
    pub has_next: bool,
}

impl InitialResult {
    /// Convert to the response JSON
    #[must_use]
    pub fn to_specification(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> IndexMap<String, Value> {
        let mut data = IndexMap::new();
        data.insert("text".to_string(), json!("hello"));
        data.insert("summary".to_string(), Value::Null);
        data
    }

    #[test]
    fn test_defer_payload_accessors() {
        let payload = IncrementalPayload::defer(
            ResultPath::root().segment("post"),
            Some("d".to_string()),
            Some(sample_data()),
            Vec::new(),
        );
        assert_eq!(payload.kind(), PayloadKind::Defer);
        assert_eq!(payload.data().unwrap().len(), 2);
        assert!(payload.items().is_none());
    }

    #[test]
    fn test_defer_payload_specification() {
        let payload = IncrementalPayload::defer(
            ResultPath::root().segment("post"),
            Some("d".to_string()),
            Some(sample_data()),
            vec![FieldError::new("bad").at(ResultPath::root().segment("post").segment("summary"))],
        );
        assert_eq!(
            payload.to_specification(),
            json!({
                "data": {"text": "hello", "summary": null},
                "path": ["post"],
                "label": "d",
                "errors": [{"message": "bad", "path": ["post", "summary"]}]
            })
        );
    }

    #[test]
    fn test_data_preserves_declaration_order() {
        let payload = IncrementalPayload::defer(ResultPath::root(), None, Some(sample_data()), Vec::new());
        let text = serde_json::to_string(&payload).unwrap();
        assert!(text.find("\"text\"").unwrap() < text.find("\"summary\"").unwrap());
    }

    #[test]
    fn test_stream_payload_specification() {
        let payload = IncrementalPayload::stream(
            ResultPath::root().segment("friends").index(2),
            None,
            Some(vec![json!({"name": "Leia"})]),
            Vec::new(),
        )
        .with_extension("cost", json!(1));
        assert_eq!(payload.kind(), PayloadKind::Stream);
        assert_eq!(
            payload.to_specification(),
            json!({
                "items": [{"name": "Leia"}],
                "path": ["friends", 2],
                "extensions": {"cost": 1}
            })
        );
    }

    #[test]
    fn test_nulled_payload_specification() {
        let payload = IncrementalPayload::defer(ResultPath::root().segment("a"), None, None, Vec::new());
        assert_eq!(payload.to_specification(), json!({"data": null, "path": ["a"]}));
    }

    #[test]
    fn test_payload_deserialize() {
        let payload: IncrementalPayload =
            serde_json::from_value(json!({"items": [1, 2], "path": ["xs", 0], "label": "s"})).unwrap();
        assert_eq!(payload.kind(), PayloadKind::Stream);
        assert_eq!(payload.items().unwrap(), &[json!(1), json!(2)]);
        assert_eq!(payload.label.as_deref(), Some("s"));
    }

    #[test]
    fn test_delayed_result_specification() {
        let payload = IncrementalPayload::defer(ResultPath::root(), None, Some(IndexMap::new()), Vec::new());
        let result = DelayedIncrementalResult::single(payload, false);
        assert_eq!(
            result.to_specification(),
            json!({"incremental": [{"data": {}, "path": []}], "hasNext": false})
        );
    }

    #[test]
    fn test_initial_result_specification() {
        let initial = InitialResult {
            data: Some(sample_data()),
            errors: Vec::new(),
            has_next: true,
        };
        assert_eq!(
            initial.to_specification(),
            json!({"data": {"text": "hello", "summary": null}, "hasNext": true})
        );
    }
}
