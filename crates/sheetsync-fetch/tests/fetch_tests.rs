use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use sheetsync_core::data_processor::DataProcessor;
use sheetsync_core::types::FieldSpec;
use sheetsync_core::Error;
use sheetsync_fetch::{Fetcher, SheetSource};

/// Serve one canned HTTP response on a random local port.
async fn serve_once(status: &'static str, body: &'static str) -> anyhow::Result<Url> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    Ok(Url::parse(&format!("http://{addr}/export.csv"))?)
}

fn processor() -> DataProcessor {
    DataProcessor::new(vec![FieldSpec::named("evId"), FieldSpec::named("title")]).with_skip_rows(1)
}

#[tokio::test]
async fn fetches_and_parses_over_http() -> anyhow::Result<()> {
    let url = serve_once("200 OK", "Ev_ID,Title\n1,\"multi\nline\"\n2,plain\n").await?;
    let fetcher = Fetcher::new(SheetSource::Url(url), processor(), Duration::from_secs(5))?;
    let records = fetcher.fetch_records().await?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("title"), Some("multi\nline"));
    Ok(())
}

#[tokio::test]
async fn non_success_status_is_a_fetch_error() -> anyhow::Result<()> {
    let url = serve_once("404 Not Found", "missing").await?;
    let fetcher = Fetcher::new(SheetSource::Url(url), processor(), Duration::from_secs(5))?;
    let err = fetcher.fetch_records().await.expect_err("404 must fail");
    assert!(matches!(err, Error::Fetch(ref msg) if msg.contains("404")), "got {err}");
    Ok(())
}

#[tokio::test]
async fn reads_local_files() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("sheet.csv");
    std::fs::write(&path, "Ev_ID,Title\n9,nine\n")?;
    let source = SheetSource::from_url(Url::from_file_path(&path).expect("absolute path"));
    assert_eq!(source, SheetSource::File(path.clone()));

    let records = Fetcher::new(source, processor(), Duration::from_secs(5))?.fetch_records().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("evId"), Some("9"));
    Ok(())
}

#[tokio::test]
async fn missing_local_file_is_a_fetch_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let fetcher = Fetcher::new(SheetSource::File(tmp.path().join("absent.csv")), processor(), Duration::from_secs(5))?;
    assert!(matches!(fetcher.fetch_text().await, Err(Error::Fetch(_))));
    Ok(())
}
