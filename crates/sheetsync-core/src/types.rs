//! Domain types shared by the fetcher, the loader and the stores.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type DocumentId = String;

/// One parsed data row.
///
/// - `index`: 0-based position among the records produced by one parse
/// - `line`: 1-based line in the payload where the row starts
/// - `fields`: `(name, value)` pairs in field-schema order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: usize,
    pub line: u64,
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }
}

/// The unit of persistence: a record plus its derived `id` and provenance.
///
/// `body` is always a JSON object and always contains `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub body: Map<String, Value>,
}

impl Document {
    /// Resolve a partition key path such as `/source` against the body.
    pub fn partition_value(&self, path: &str) -> Option<&Value> {
        let mut current: Option<&Value> = None;
        for (depth, segment) in path.trim_start_matches('/').split('/').enumerate() {
            current = if depth == 0 { self.body.get(segment) } else { current?.get(segment) };
        }
        current
    }
}

/// A column of the fixed field schema.
///
/// `name` is the document key. `header` is the label expected in the sheet's
/// header row when header validation is on; it defaults to `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl FieldSpec {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), header: None }
    }

    pub fn header_label(&self) -> &str {
        self.header.as_deref().unwrap_or(&self.name)
    }
}

/// Destination container, created if absent and otherwise reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub database: String,
    pub container: String,
    pub partition_key: String,
    pub throughput: u32,
}
