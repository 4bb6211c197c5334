//! In-process `DocumentStore` used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::traits::DocumentStore;
use crate::types::Document;

#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    docs: Mutex<BTreeMap<String, Document>>,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    /// Number of upsert calls received, including overwrites.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.lock().ok().and_then(|d| d.get(id).cloned())
    }

    /// Snapshot of stored documents ordered by id.
    pub fn documents(&self) -> Vec<Document> {
        self.docs.lock().map(|d| d.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.lock().map_err(|_| Error::store(None, "memory store lock poisoned"))?;
        docs.insert(doc.id.clone(), doc.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}
