use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, TryStreamExt};
use indicatif::ProgressBar;
use tracing::info;

use sheetsync_core::config::SyncConfig;
use sheetsync_core::data_processor::DocumentBuilder;
use sheetsync_core::traits::DocumentStore;
use sheetsync_core::types::Record;
use sheetsync_core::{Error, Result};

use crate::retry::RetryPolicy;

/// Outcome of a completed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub written: usize,
    /// Transient failures that were retried and then succeeded.
    pub retries: u32,
}

pub struct Loader<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    builder: DocumentBuilder,
    policy: RetryPolicy,
    concurrency: usize,
    progress_every: usize,
    progress: Option<ProgressBar>,
}

impl<'a, S: DocumentStore + ?Sized> Loader<'a, S> {
    pub fn new(store: &'a S, builder: DocumentBuilder) -> Self {
        Self { store, builder, policy: RetryPolicy::default(), concurrency: 1, progress_every: 100, progress: None }
    }

    pub fn from_config(store: &'a S, config: &SyncConfig) -> Self {
        Self::new(store, DocumentBuilder::new(config.identity.clone()))
            .with_retry(RetryPolicy::from(&config.retry))
            .with_concurrency(config.loader.concurrency)
            .with_progress_every(config.loader.progress_every)
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on in-flight writes. 1 keeps writes strictly sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Build and upsert one record, retrying transient timeouts.
    async fn write(&self, record: &Record) -> Result<u32> {
        let doc = self.builder.build(record)?;
        let ((), retries) = self.policy.run(&doc.id, || self.store.upsert(&doc)).await?;
        Ok(retries)
    }

    /// Write every record; the first unrecoverable error aborts the load and
    /// no further records are started.
    pub async fn load(&self, records: &[Record]) -> Result<LoadReport> {
        info!(records = records.len(), target = %self.store.describe(), concurrency = self.concurrency, "loading documents");
        let written = AtomicUsize::new(0);
        let counter = &written;
        let retries = stream::iter(records.iter().map(Ok::<_, Error>))
            .map_ok(|record| async move {
                let retries = self.write(record).await?;
                let done = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(bar) = &self.progress {
                    bar.inc(1);
                }
                if done % self.progress_every == 0 {
                    info!("Loaded {done} documents...");
                }
                Ok::<u32, Error>(retries)
            })
            .try_buffer_unordered(self.concurrency)
            .try_fold(0u32, |total, r| async move { Ok::<u32, Error>(total + r) })
            .await?;
        if let Some(bar) = &self.progress {
            bar.finish();
        }
        Ok(LoadReport { written: written.into_inner(), retries })
    }
}
