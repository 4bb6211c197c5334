//! sheetsync-loader
//!
//! Turns parsed records into documents and writes them through a
//! [`DocumentStore`](sheetsync_core::traits::DocumentStore), backing off on
//! transient timeouts.
pub mod loader;
pub mod retry;

pub use loader::{LoadReport, Loader};
pub use retry::RetryPolicy;
