use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sheetsync_core::config::{Config, SyncConfig};
use sheetsync_core::data_processor::DocumentBuilder;
use sheetsync_core::memory_store::MemoryStore;
use sheetsync_core::traits::DocumentStore;
use sheetsync_core::types::Record;
use sheetsync_fetch::Fetcher;
use sheetsync_loader::{LoadReport, Loader};

#[derive(Parser)]
#[clap(name = "sheetsync", about = "Copy a published spreadsheet into a Cosmos DB container")]
struct Arguments {
    /// Extra TOML file merged after config.toml and config.<env>.toml.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// CSV URL, overrides every configured source.
    #[clap(long, global = true, conflicts_with = "path")]
    url: Option<String>,

    /// Local CSV file, overrides every configured source.
    #[clap(long, global = true)]
    path: Option<String>,

    /// Leading rows to discard before the first record.
    #[clap(long, global = true)]
    skip_rows: Option<usize>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the sheet and upsert every row.
    Ingest {
        /// Write into an in-memory store instead of Cosmos DB.
        #[clap(long)]
        dry_run: bool,
        /// Only load the first N records.
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Fetch the sheet and print the documents that would be written.
    Preview {
        #[clap(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    init_tracing()?;

    let config = Config::load_with(args.config.as_deref()).map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let mut sync = config.sync()?;
    apply_overrides(&mut sync, &args);
    sync.validate_for_env(config.env_name())?;

    let fetcher = Fetcher::from_config(&sync)?;
    println!("Fetching {}", fetcher.source());
    let records = fetcher.fetch_records().await.context("fetching sheet")?;
    println!("📄 Parsed {} records", records.len());

    match args.command {
        Command::Ingest { dry_run, limit } => {
            let records = limited(&records, limit);
            let report = if dry_run {
                let store = MemoryStore::new("dry-run");
                let report = ingest(&store, &sync, records).await?;
                println!("Dry run kept {} distinct documents in memory", store.len());
                report
            } else {
                let container = sheetsync_cosmos::open_container(&sync.store).await.context("opening container")?;
                ingest(&container, &sync, records).await?
            };
            println!("\n✅ Done. Loaded {} documents into {}/{}", report.written, sync.store.database, sync.store.container);
            if report.retries > 0 {
                println!("⚠️  {} writes needed a retry", report.retries);
            }
        }
        Command::Preview { limit } => {
            let builder = DocumentBuilder::new(sync.identity.clone());
            for record in limited(&records, Some(limit)) {
                let doc = builder.build(record)?;
                println!("{}", serde_json::to_string_pretty(&doc.body)?);
            }
        }
    }
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(env_filter).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;
    Ok(())
}

fn apply_overrides(sync: &mut SyncConfig, args: &Arguments) {
    if let Some(url) = &args.url {
        sync.source.url = Some(url.clone());
    }
    if let Some(path) = &args.path {
        sync.source.url = None;
        sync.source.spreadsheet_id = None;
        sync.source.sheet_name = None;
        sync.source.path = Some(path.clone());
    }
    if let Some(skip_rows) = args.skip_rows {
        sync.source.skip_rows = skip_rows;
    }
}

fn limited(records: &[Record], limit: Option<usize>) -> &[Record] {
    match limit {
        Some(n) if n < records.len() => &records[..n],
        _ => records,
    }
}

async fn ingest<S: DocumentStore + ?Sized>(store: &S, sync: &SyncConfig, records: &[Record]) -> anyhow::Result<LoadReport> {
    info!(target = %store.describe(), "writing documents");
    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );
    let report = Loader::from_config(store, sync).with_progress_bar(pb).load(records).await?;
    Ok(report)
}
