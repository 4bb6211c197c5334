//! sheetsync-fetch
//!
//! Downloads the CSV export of a spreadsheet (or reads a local CSV file) and
//! hands the payload to `DataProcessor`. A failed download ends the run; there
//! is no retry at this layer.
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use sheetsync_core::config::{expand_path, SyncConfig};
use sheetsync_core::data_processor::DataProcessor;
use sheetsync_core::types::Record;
use sheetsync_core::{Error, Result};

const GOOGLE_SHEETS_BASE: &str = "https://docs.google.com/spreadsheets/d/";

/// Build the `gviz` CSV export URL for one sheet of a public spreadsheet.
pub fn google_sheet_csv_url(spreadsheet_id: &str, sheet_name: &str) -> Result<Url> {
    let mut url = Url::parse(GOOGLE_SHEETS_BASE).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidConfig(format!("cannot extend {GOOGLE_SHEETS_BASE}")))?
        .pop_if_empty()
        .extend([spreadsheet_id, "gviz", "tq"]);
    url.query_pairs_mut().append_pair("tqx", "out:csv").append_pair("sheet", sheet_name);
    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSource {
    Url(Url),
    File(PathBuf),
}

impl SheetSource {
    /// `url` wins over `spreadsheet_id`/`sheet_name`, which win over `path`.
    /// `file://` URLs are read from disk.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let source = &config.source;
        if let Some(raw) = &source.url {
            let url = Url::parse(raw).map_err(|e| Error::InvalidConfig(format!("source.url {raw:?}: {e}")))?;
            return Ok(Self::from_url(url));
        }
        if let (Some(id), Some(sheet)) = (&source.spreadsheet_id, &source.sheet_name) {
            return Ok(Self::Url(google_sheet_csv_url(id, sheet)?));
        }
        if let Some(path) = &source.path {
            return Ok(Self::File(expand_path(path)));
        }
        Err(Error::InvalidConfig("no CSV source configured".to_string()))
    }

    pub fn from_url(url: Url) -> Self {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                return Self::File(path);
            }
        }
        Self::Url(url)
    }
}

impl fmt::Display for SheetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    source: SheetSource,
    processor: DataProcessor,
}

impl Fetcher {
    pub fn new(source: SheetSource, processor: DataProcessor, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Fetch(format!("building http client: {e}")))?;
        Ok(Self { client, source, processor })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            SheetSource::from_config(config)?,
            DataProcessor::from_config(config),
            Duration::from_secs(config.source.timeout_secs),
        )
    }

    pub fn source(&self) -> &SheetSource {
        &self.source
    }

    /// Retrieve the raw CSV payload.
    pub async fn fetch_text(&self) -> Result<String> {
        match &self.source {
            SheetSource::Url(url) => {
                debug!(%url, "http get");
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| Error::Fetch(format!("GET {url}: {e}")))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(Error::Fetch(format!("GET {url} returned {status}")));
                }
                resp.text().await.map_err(|e| Error::Fetch(format!("reading body of {url}: {e}")))
            }
            SheetSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::Fetch(format!("reading {}: {e}", path.display()))),
        }
    }

    /// Fetch and parse into records, in source order.
    pub async fn fetch_records(&self) -> Result<Vec<Record>> {
        let payload = self.fetch_text().await?;
        info!(source = %self.source, bytes = payload.len(), "fetched csv");
        self.processor.process_csv(&payload)
    }
}
