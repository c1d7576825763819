//! Source database boundary.
//!
//! [`DocumentSource`] is the engine's view of one external document store:
//! count, enumerate collections, and fetch documents in storage order. The
//! engine never writes through this boundary.
//!
//! Also here: the per-engine [`SourceRegistry`], the text-blob builder that
//! turns a document into embeddable text, auto-detection of text fields from
//! a sampled document, and an in-memory source used by tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Source collections the engine itself writes to or that hold app
/// bookkeeping — excluded from fan-out syncs and status sweeps.
pub const SYSTEM_COLLECTIONS: &[&str] =
    &["vector_state", "query_memory", "dashboards", "simulations"];

/// Auto-detected text fields are capped so one wide document cannot blow up
/// the blob size.
pub const MAX_AUTO_TEXT_FIELDS: usize = 10;

/// Fallback fields used by fan-out syncs when auto-detection is disabled.
pub const DEFAULT_TEXT_FIELDS: &[&str] = &[
    "name",
    "description",
    "text",
    "title",
    "content",
    "username",
    "address",
    "email",
];

/// One document from a source collection: a unique id plus an arbitrary
/// field-value mapping.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub fields: serde_json::Map<String, Value>,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, fields: serde_json::Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON object, taking the id from `_id` or `id`
    /// when present.
    pub fn from_value(fallback_id: &str, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let id = fields
            .get("_id")
            .or_else(|| fields.get("id"))
            .map(json_scalar_to_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        Self { id, fields }
    }

    /// Modification marker used by the content fingerprint: the upload
    /// timestamp when present, otherwise `updated_at`, otherwise empty.
    pub fn modified_marker(&self) -> String {
        self.fields
            .get("_upload_timestamp")
            .or_else(|| self.fields.get("updated_at"))
            .map(json_scalar_to_string)
            .unwrap_or_default()
    }
}

/// Boundary to one external document store.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable database name, carried into point metadata.
    fn display_name(&self) -> &str;

    /// Count documents in a collection. Zero for a missing collection.
    async fn count_documents(&self, collection: &str) -> Result<u64>;

    /// List collection names.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Fetch documents in natural storage order, bounded by `limit`.
    async fn find(&self, collection: &str, limit: Option<usize>) -> Result<Vec<SourceDocument>>;
}

/// Engine-scoped registry of source databases, keyed by db_key.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn DocumentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, db_key: impl Into<String>, source: Arc<dyn DocumentSource>) {
        self.sources.insert(db_key.into(), source);
    }

    pub fn get(&self, db_key: &str) -> Option<Arc<dyn DocumentSource>> {
        self.sources.get(db_key).cloned()
    }

    /// Registered db_keys, sorted for deterministic fan-out order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Concatenate the configured text fields of a document into one blob.
///
/// Missing fields contribute nothing. String values are taken verbatim;
/// arrays and nested objects contribute their string leaves; numbers and
/// booleans are rendered. Field order follows `text_fields`.
pub fn build_document_text(doc: &SourceDocument, text_fields: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in text_fields {
        if let Some(value) = doc.fields.get(field) {
            let rendered = render_value(value);
            if !rendered.is_empty() {
                parts.push(rendered);
            }
        }
    }
    parts.join(" ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .values()
            .map(render_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
    }
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Pick likely text fields from a sampled document: non-empty strings,
/// nested objects, and string arrays, skipping the id field. Capped at
/// [`MAX_AUTO_TEXT_FIELDS`].
pub fn auto_detect_text_fields(sample: &SourceDocument) -> Vec<String> {
    let mut fields = Vec::new();
    for (key, value) in &sample.fields {
        if key == "_id" || key == "id" {
            continue;
        }
        let keep = match value {
            Value::String(s) => !s.trim().is_empty(),
            Value::Object(_) => true,
            Value::Array(items) => matches!(items.first(), Some(Value::String(_))),
            _ => false,
        };
        if keep {
            fields.push(key.clone());
        }
        if fields.len() == MAX_AUTO_TEXT_FIELDS {
            break;
        }
    }
    fields
}

// ============ In-memory source ============

/// In-memory [`DocumentSource`] for tests and demos. Collections preserve
/// insertion order, which stands in for storage order.
pub struct MemorySource {
    name: String,
    collections: RwLock<HashMap<String, Vec<SourceDocument>>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, collection: &str, doc: SourceDocument) {
        self.collections
            .write()
            .expect("memory source lock")
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Replace a document in place (same position in storage order).
    pub fn update(&self, collection: &str, doc: SourceDocument) {
        let mut collections = self.collections.write().expect("memory source lock");
        if let Some(docs) = collections.get_mut(collection) {
            if let Some(existing) = docs.iter_mut().find(|d| d.id == doc.id) {
                *existing = doc;
            }
        }
    }

    pub fn create_collection(&self, collection: &str) {
        self.collections
            .write()
            .expect("memory source lock")
            .entry(collection.to_string())
            .or_default();
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .expect("memory source lock")
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .expect("memory source lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find(&self, collection: &str, limit: Option<usize>) -> Result<Vec<SourceDocument>> {
        let collections = self.collections.read().expect("memory source lock");
        let docs = collections.get(collection).cloned().unwrap_or_default();
        Ok(match limit {
            Some(n) => docs.into_iter().take(n).collect(),
            None => docs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> SourceDocument {
        SourceDocument::from_value(id, value)
    }

    #[test]
    fn text_blob_concatenates_configured_fields() {
        let d = doc(
            "1",
            json!({"title": "Report", "body": "All clear", "count": 7}),
        );
        let text = build_document_text(
            &d,
            &["title".to_string(), "body".to_string(), "missing".to_string()],
        );
        assert_eq!(text, "Report All clear");
    }

    #[test]
    fn text_blob_flattens_arrays_and_objects() {
        let d = doc(
            "1",
            json!({"tags": ["red", "green"], "meta": {"city": "Oslo", "zip": 1234}}),
        );
        let text = build_document_text(&d, &["tags".to_string(), "meta".to_string()]);
        assert_eq!(text, "red green Oslo 1234");
    }

    #[test]
    fn auto_detect_picks_strings_objects_and_string_arrays() {
        let d = doc(
            "1",
            json!({
                "_id": "x",
                "title": "hello",
                "count": 3,
                "meta": {"a": "b"},
                "tags": ["one"],
                "nums": [1, 2],
                "blank": "   "
            }),
        );
        let fields = auto_detect_text_fields(&d);
        assert!(fields.contains(&"title".to_string()));
        assert!(fields.contains(&"meta".to_string()));
        assert!(fields.contains(&"tags".to_string()));
        assert!(!fields.contains(&"count".to_string()));
        assert!(!fields.contains(&"nums".to_string()));
        assert!(!fields.contains(&"blank".to_string()));
        assert!(!fields.contains(&"_id".to_string()));
    }

    #[test]
    fn auto_detect_caps_field_count() {
        let mut map = serde_json::Map::new();
        for i in 0..20 {
            map.insert(format!("field{:02}", i), json!("text"));
        }
        let fields = auto_detect_text_fields(&SourceDocument::new("1", map));
        assert_eq!(fields.len(), MAX_AUTO_TEXT_FIELDS);
    }

    #[test]
    fn modified_marker_prefers_upload_timestamp() {
        let d = doc(
            "1",
            json!({"_upload_timestamp": "2026-01-01T00:00:00Z", "updated_at": "older"}),
        );
        assert_eq!(d.modified_marker(), "2026-01-01T00:00:00Z");

        let d = doc("1", json!({"updated_at": "2026-02-01"}));
        assert_eq!(d.modified_marker(), "2026-02-01");

        let d = doc("1", json!({"title": "no markers"}));
        assert_eq!(d.modified_marker(), "");
    }

    #[tokio::test]
    async fn memory_source_preserves_insertion_order_and_limit() {
        let source = MemorySource::new("test");
        for i in 0..5 {
            source.insert("notes", doc(&format!("d{}", i), json!({"n": i})));
        }
        let docs = source.find("notes", Some(3)).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2"]);
        assert_eq!(source.count_documents("notes").await.unwrap(), 5);
        assert_eq!(source.count_documents("absent").await.unwrap(), 0);
    }
}
