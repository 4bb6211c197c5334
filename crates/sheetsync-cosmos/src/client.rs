use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use sheetsync_core::config::StoreConfig;
use sheetsync_core::traits::DocumentStore;
use sheetsync_core::types::{ContainerSpec, Document};
use sheetsync_core::{Error, Result};

use crate::auth::{ms_date, Credential};

const API_VERSION: &str = "2018-12-31";

/// Map a non-success response onto the error taxonomy. Only 408 is transient.
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::REQUEST_TIMEOUT {
        return Error::Timeout(format!("service returned {status}"));
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(300).collect());
    Error::store(Some(status.as_u16()), message)
}

/// Client-side timeouts are transient; connection and protocol errors are not.
pub fn classify_transport(err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::store(None, err.to_string())
    }
}

/// Minimal Cosmos DB (SQL API) REST client.
#[derive(Debug, Clone)]
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: Url,
    credential: Credential,
}

struct Call<'a> {
    method: Method,
    path: String,
    resource_type: &'a str,
    resource_link: String,
    headers: HeaderMap,
    body: Value,
}

impl CosmosClient {
    pub fn new(endpoint: &str, credential: Credential, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| Error::InvalidConfig(format!("store.endpoint {endpoint:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("building http client: {e}")))?;
        Ok(Self { http, endpoint, credential })
    }

    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        Self::new(&store.endpoint, Credential::from_config(store)?, Duration::from_secs(store.timeout_secs))
    }

    async fn execute(&self, call: Call<'_>) -> Result<(StatusCode, String)> {
        let url = self
            .endpoint
            .join(&call.path)
            .map_err(|e| Error::InvalidConfig(format!("resource path {}: {e}", call.path)))?;
        let date = ms_date(Utc::now());
        let auth = self
            .credential
            .authorization(call.method.as_str(), call.resource_type, &call.resource_link, &date)?;

        let mut headers = call.headers;
        headers.insert(AUTHORIZATION, header_value(&auth)?);
        headers.insert(HeaderName::from_static("x-ms-date"), header_value(&date)?);
        headers.insert(HeaderName::from_static("x-ms-version"), HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(method = %call.method, %url, "cosmos request");
        let resp = self
            .http
            .request(call.method, url)
            .headers(headers)
            .body(call.body.to_string())
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify_transport(&e))?;
        Ok((status, body))
    }

    /// POST that treats 409 Conflict as "already there".
    async fn create_if_absent(&self, call: Call<'_>, what: &str) -> Result<()> {
        let (status, body) = self.execute(call).await?;
        match status {
            s if s.is_success() => {
                info!(resource = what, "created");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(resource = what, "already exists");
                Ok(())
            }
            s => Err(classify_status(s, &body)),
        }
    }

    pub async fn create_database_if_not_exists(&self, database: &str) -> Result<()> {
        self.create_if_absent(
            Call {
                method: Method::POST,
                path: "dbs".to_string(),
                resource_type: "dbs",
                resource_link: String::new(),
                headers: HeaderMap::new(),
                body: json!({ "id": database }),
            },
            &format!("database {database}"),
        )
        .await
    }

    /// Create the container with its partition key and throughput, or reuse it.
    pub async fn create_container_if_not_exists(&self, spec: &ContainerSpec) -> Result<CosmosContainer> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-ms-offer-throughput"), header_value(&spec.throughput.to_string())?);
        self.create_if_absent(
            Call {
                method: Method::POST,
                path: format!("dbs/{}/colls", spec.database),
                resource_type: "colls",
                resource_link: format!("dbs/{}", spec.database),
                headers,
                body: json!({
                    "id": spec.container,
                    "partitionKey": { "paths": [spec.partition_key], "kind": "Hash", "version": 2 },
                }),
            },
            &format!("container {}/{}", spec.database, spec.container),
        )
        .await?;
        Ok(CosmosContainer { client: self.clone(), spec: spec.clone() })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidConfig(format!("invalid header value: {e}")))
}

/// Handle to an existing container; the loader's write target.
#[derive(Debug, Clone)]
pub struct CosmosContainer {
    client: CosmosClient,
    spec: ContainerSpec,
}

impl CosmosContainer {
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }
}

#[async_trait]
impl DocumentStore for CosmosContainer {
    async fn upsert(&self, doc: &Document) -> Result<()> {
        let partition = doc.partition_value(&self.spec.partition_key).ok_or_else(|| {
            Error::NotFound(format!("document {} has no value at partition key {}", doc.id, self.spec.partition_key))
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-ms-documentdb-is-upsert"), HeaderValue::from_static("True"));
        headers.insert(
            HeaderName::from_static("x-ms-documentdb-partitionkey"),
            header_value(&Value::Array(vec![partition.clone()]).to_string())?,
        );
        let link = format!("dbs/{}/colls/{}", self.spec.database, self.spec.container);
        let (status, body) = self
            .client
            .execute(Call {
                method: Method::POST,
                path: format!("{link}/docs"),
                resource_type: "docs",
                resource_link: link,
                headers,
                body: Value::Object(doc.body.clone()),
            })
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status, &body))
        }
    }

    fn describe(&self) -> String {
        format!("{}dbs/{}/colls/{}", self.client.endpoint, self.spec.database, self.spec.container)
    }
}
