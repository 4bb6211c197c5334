use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A data row whose column count differs from the field schema.
    #[error("Row {row} (line {line}) has {found} columns but expected {expected}: {preview}")]
    Schema { row: usize, line: u64, found: usize, expected: usize, preview: String },

    #[error("Header column {column} is {found:?} but expected {expected:?}")]
    HeaderMismatch { column: usize, found: String, expected: String },

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The only error class the loader retries.
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Store request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Store { status: Option<u16>, message: String },

    #[error("Gave up on document {id} after {attempts} attempts")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for failures that may succeed when the same request is sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn store(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Store { status, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
