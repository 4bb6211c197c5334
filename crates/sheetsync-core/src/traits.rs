use async_trait::async_trait;

use crate::error::Result;
use crate::types::Document;

/// A destination container that accepts idempotent upserts keyed by `Document::id`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert the document, or overwrite the one with the same id.
    ///
    /// Implementations report request timeouts as `Error::Timeout` so the
    /// loader can retry them; every other failure is final.
    async fn upsert(&self, doc: &Document) -> Result<()>;

    /// Human-readable destination, used in log lines.
    fn describe(&self) -> String;
}
