use std::time::Duration;

use serde_json::{json, Map};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use sheetsync_core::traits::DocumentStore;
use sheetsync_core::types::{ContainerSpec, Document};
use sheetsync_core::Error;
use sheetsync_cosmos::{CosmosClient, Credential};

/// Answers each incoming request with the next canned `(status line, body)`
/// and forwards the raw request text.
async fn fake_account(responses: Vec<(&'static str, &'static str)>) -> anyhow::Result<(String, mpsc::UnboundedReceiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("http://{}/", listener.local_addr()?);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let request = read_request(&mut socket).await;
            let _ = tx.send(request);
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    Ok((endpoint, rx))
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut seen = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        seen.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&seen).to_string();
        if let Some(split) = text.find("\r\n\r\n") {
            let content_length = text[..split]
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                .unwrap_or(0);
            if seen.len() >= split + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&seen).to_string()
}

fn spec() -> ContainerSpec {
    ContainerSpec {
        database: "airisks".into(),
        container: "mit_risks".into(),
        partition_key: "/source".into(),
        throughput: 400,
    }
}

fn doc(id: &str) -> Document {
    let mut body = Map::new();
    body.insert("id".into(), json!(id));
    body.insert("title".into(), json!("Risk"));
    body.insert("source".into(), json!("MIT_Risk_Repository"));
    Document { id: id.to_string(), body }
}

fn client(endpoint: &str) -> CosmosClient {
    let credential = Credential::master_key("dGVzdGtleQ==").expect("key");
    CosmosClient::new(endpoint, credential, Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn provisioning_tolerates_existing_resources() -> anyhow::Result<()> {
    let (endpoint, mut requests) = fake_account(vec![("409 Conflict", "{}"), ("201 Created", "{}")]).await?;
    let client = client(&endpoint);
    client.create_database_if_not_exists("airisks").await?;
    let container = client.create_container_if_not_exists(&spec()).await?;
    assert_eq!(container.spec(), &spec());

    let create_db = requests.recv().await.expect("db request");
    assert!(create_db.starts_with("POST /dbs HTTP/1.1"));
    let create_coll = requests.recv().await.expect("coll request").to_ascii_lowercase();
    assert!(create_coll.starts_with("post /dbs/airisks/colls http/1.1"));
    assert!(create_coll.contains("x-ms-offer-throughput: 400"));
    assert!(create_coll.contains("\"paths\":[\"/source\"]"));
    assert!(create_coll.contains("authorization: type%3dmaster"));
    Ok(())
}

#[tokio::test]
async fn upsert_sends_partition_key_and_upsert_header() -> anyhow::Result<()> {
    let (endpoint, mut requests) = fake_account(vec![("201 Created", "{}"), ("200 OK", "{}")]).await?;
    let container = client(&endpoint).create_container_if_not_exists(&spec()).await?;
    container.upsert(&doc("mit.1.01.00")).await?;

    let _ = requests.recv().await;
    let upsert = requests.recv().await.expect("upsert request");
    let lower = upsert.to_ascii_lowercase();
    assert!(lower.starts_with("post /dbs/airisks/colls/mit_risks/docs http/1.1"));
    assert!(lower.contains("x-ms-documentdb-is-upsert: true"));
    assert!(upsert.contains("[\"MIT_Risk_Repository\"]"));
    assert!(upsert.contains("\"id\":\"mit.1.01.00\""));
    Ok(())
}

#[tokio::test]
async fn request_timeout_is_transient_and_forbidden_is_not() -> anyhow::Result<()> {
    let (endpoint, _requests) = fake_account(vec![
        ("201 Created", "{}"),
        ("408 Request Timeout", "{}"),
        ("403 Forbidden", "{\"code\":\"Forbidden\",\"message\":\"Request blocked by Auth\"}"),
    ])
    .await?;
    let container = client(&endpoint).create_container_if_not_exists(&spec()).await?;

    let timeout = container.upsert(&doc("mit.1")).await.expect_err("408");
    assert!(timeout.is_transient(), "got {timeout}");

    let forbidden = container.upsert(&doc("mit.1")).await.expect_err("403");
    assert!(!forbidden.is_transient());
    assert!(matches!(forbidden, Error::Store { status: Some(403), ref message } if message == "Request blocked by Auth"));
    Ok(())
}

#[tokio::test]
async fn missing_partition_value_is_rejected_before_sending() -> anyhow::Result<()> {
    let (endpoint, _requests) = fake_account(vec![("201 Created", "{}")]).await?;
    let container = client(&endpoint).create_container_if_not_exists(&spec()).await?;
    let mut bare = doc("mit.2");
    bare.body.remove("source");
    assert!(matches!(container.upsert(&bare).await, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn client_side_timeout_classifies_as_transient() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("http://{}/", listener.local_addr()?);
    tokio::spawn(async move {
        // accept and never answer
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let credential = Credential::master_key("dGVzdGtleQ==")?;
    let client = CosmosClient::new(&endpoint, credential, Duration::from_millis(200))?;
    let err = client.create_database_if_not_exists("airisks").await.expect_err("timeout");
    assert!(matches!(err, Error::Timeout(_)), "got {err}");
    Ok(())
}
