//! CSV payload → `Record`s, and `Record` → `Document`.
//!
//! Columns are mapped to field names by position. Every data row must carry
//! exactly as many columns as the field schema; the first row that does not
//! fails the whole parse before anything is written.
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{IdStrategy, IdentityConfig, Numbering, SyncConfig};
use crate::error::{Error, Result};
use crate::types::{Document, FieldSpec, Record};

const PREVIEW_CHARS: usize = 160;

#[derive(Debug, Clone)]
pub struct DataProcessor {
    fields: Vec<FieldSpec>,
    skip_rows: usize,
    validate_header: bool,
}

impl DataProcessor {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields, skip_rows: 0, validate_header: false }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.source.fields.clone())
            .with_skip_rows(config.source.skip_rows)
            .with_header_validation(config.source.validate_header)
    }

    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    /// Check the last skipped row against each field's header label.
    pub fn with_header_validation(mut self, on: bool) -> Self {
        self.validate_header = on;
        self
    }

    pub fn process_csv(&self, payload: &str) -> Result<Vec<Record>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(payload.as_bytes());

        let mut records = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let row_data = result?;
            let line = row_data.position().map(|p| p.line()).unwrap_or(0);
            if row < self.skip_rows {
                if self.validate_header && row + 1 == self.skip_rows {
                    self.check_header(&row_data)?;
                }
                continue;
            }
            if row_data.len() != self.fields.len() {
                return Err(Error::Schema {
                    row: records.len(),
                    line,
                    found: row_data.len(),
                    expected: self.fields.len(),
                    preview: preview(&row_data),
                });
            }
            let fields = self
                .fields
                .iter()
                .zip(row_data.iter())
                .map(|(spec, value)| (spec.name.clone(), value.to_string()))
                .collect();
            records.push(Record { index: records.len(), line, fields });
        }
        if self.validate_header && self.skip_rows == 0 {
            warn!("header validation requested but skip_rows is 0, nothing to validate");
        }
        debug!(records = records.len(), skipped = self.skip_rows, "parsed csv payload");
        Ok(records)
    }

    fn check_header(&self, header: &csv::StringRecord) -> Result<()> {
        for (column, spec) in self.fields.iter().enumerate() {
            let found = header.get(column).unwrap_or("").trim();
            if !found.eq_ignore_ascii_case(spec.header_label().trim()) {
                return Err(Error::HeaderMismatch {
                    column,
                    found: found.to_string(),
                    expected: spec.header_label().to_string(),
                });
            }
        }
        if header.len() != self.fields.len() {
            return Err(Error::Schema {
                row: self.skip_rows - 1,
                line: header.position().map(|p| p.line()).unwrap_or(0),
                found: header.len(),
                expected: self.fields.len(),
                preview: preview(header),
            });
        }
        Ok(())
    }
}

fn preview(row: &csv::StringRecord) -> String {
    let joined = row.iter().collect::<Vec<_>>().join(",");
    if joined.chars().count() <= PREVIEW_CHARS {
        return joined;
    }
    let cut: String = joined.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

/// Derives ids and stamps provenance onto records.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    identity: IdentityConfig,
}

impl DocumentBuilder {
    pub fn new(identity: IdentityConfig) -> Self {
        Self { identity }
    }

    pub fn document_id(&self, record: &Record) -> Result<String> {
        let key = match self.identity.strategy {
            IdStrategy::Field => record
                .get(&self.identity.field)
                .ok_or_else(|| Error::NotFound(format!("id field '{}' in row {}", self.identity.field, record.index)))?
                .to_string(),
            IdStrategy::Position => match self.identity.numbering {
                Numbering::Sequence => record.index.to_string(),
                Numbering::SourceLine => record.line.to_string(),
            },
            IdStrategy::ContentHash => content_hash(record),
        };
        if key.is_empty() {
            warn!(row = record.index, line = record.line, "empty id key, document ids will collide");
        }
        Ok(format!("{}.{}", self.identity.prefix, key))
    }

    /// Merge order: `id`, the record fields, the provenance field. Derived
    /// fields overwrite record fields of the same name in place.
    pub fn build(&self, record: &Record) -> Result<Document> {
        let id = self.document_id(record)?;
        let mut body = Map::new();
        body.insert("id".to_string(), Value::String(id.clone()));
        for (name, value) in &record.fields {
            body.insert(name.clone(), Value::String(value.clone()));
        }
        body.insert("id".to_string(), Value::String(id.clone()));
        body.insert(self.identity.provenance_field.clone(), Value::String(self.identity.provenance.clone()));
        Ok(Document { id, body })
    }
}

fn content_hash(record: &Record) -> String {
    let mut hasher = blake3::Hasher::new();
    for value in record.values() {
        hasher.update(value.as_bytes());
        hasher.update(&[0x1f]);
    }
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}
