use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ContainerSpec, FieldSpec};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    /// Like `load`, with an explicit TOML file merged after the env-specific one.
    pub fn load_with(extra: Option<&Path>) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(SyncConfig::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        if let Some(path) = extra {
            if !path.is_file() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self::from_figment(figment, &env_name))
    }

    pub fn from_figment(figment: Figment, env_name: &str) -> Self {
        Self { figment, env_name: env_name.to_string() }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate the full sync configuration.
    pub fn sync(&self) -> anyhow::Result<SyncConfig> {
        let config: SyncConfig = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read sync configuration: {}", e))?;
        config.validate_for_env(&self.env_name)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Explicit CSV URL; wins over `spreadsheet_id`/`sheet_name` and `path`.
    pub url: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub sheet_name: Option<String>,
    /// Local CSV file, `~` and `$VAR` are expanded.
    pub path: Option<String>,
    pub skip_rows: usize,
    pub validate_header: bool,
    pub timeout_secs: u64,
    pub fields: Vec<FieldSpec>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            spreadsheet_id: Some("15LeHcpeuZC9txkvcaMoh3sUhkMvdMMry69xxXL46DT0".to_string()),
            sheet_name: Some("AI Risk Database v4".to_string()),
            path: None,
            skip_rows: 1,
            validate_header: false,
            timeout_secs: 60,
            fields: MIT_FIELDS.iter().map(|name| FieldSpec::named(name)).collect(),
        }
    }
}

pub const MIT_FIELDS: [&str; 19] = [
    "title",
    "quickRef",
    "evId",
    "paperId",
    "catId",
    "subCatId",
    "addEvId",
    "categoryLevel",
    "riskCategory",
    "riskSubcategory",
    "description",
    "additionalEvidence",
    "pDef",
    "pAddEv",
    "entity",
    "intent",
    "timing",
    "domain",
    "subDomain",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `<prefix>.<value of identity.field>`
    Field,
    /// `<prefix>.<row number>`, see `Numbering`
    Position,
    /// `<prefix>.<blake3 of the row values>`
    ContentHash,
}

/// How `IdStrategy::Position` numbers rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Numbering {
    /// 0-based index among produced records; blank lines are never counted.
    Sequence,
    /// 1-based line where the row starts in the payload.
    SourceLine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub strategy: IdStrategy,
    pub field: String,
    pub prefix: String,
    pub numbering: Numbering,
    pub provenance_field: String,
    pub provenance: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            strategy: IdStrategy::Field,
            field: "evId".to_string(),
            prefix: "mit".to_string(),
            numbering: Numbering::Sequence,
            provenance_field: "source".to_string(),
            provenance: "MIT_Risk_Repository".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Static account key.
    Key,
    /// Bearer token taken from the environment.
    Ambient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub database: String,
    pub container: String,
    pub partition_key: String,
    pub throughput: u32,
    pub timeout_secs: u64,
    pub auth: AuthKind,
    /// Inline account key; `key_env` is consulted when absent.
    pub key: Option<String>,
    pub key_env: String,
    pub token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://airisks.documents.azure.com:443/".to_string(),
            database: "airisks".to_string(),
            container: "mit_risks".to_string(),
            partition_key: "/source".to_string(),
            throughput: 400,
            timeout_secs: 30,
            auth: AuthKind::Ambient,
            key: None,
            key_env: "COSMOS_KEY".to_string(),
            token_env: "AZURE_COSMOS_TOKEN".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            database: self.database.clone(),
            container: self.container.clone(),
            partition_key: self.partition_key.clone(),
            throughput: self.throughput,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay_secs: 1.0 }
    }
}

impl RetryConfig {
    /// Negative and NaN values read as zero; values past `Duration::MAX` saturate.
    pub fn initial_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.initial_delay_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub concurrency: usize,
    pub progress_every: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { concurrency: 1, progress_every: 100 }
    }
}

impl SyncConfig {
    pub fn validate_for_env(&self, env: &str) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.source.fields.is_empty() {
            return invalid("source.fields must not be empty".to_string());
        }
        if self.source.url.is_none() && self.source.path.is_none() && (self.source.spreadsheet_id.is_none() || self.source.sheet_name.is_none()) {
            return invalid("set source.url, source.path, or both source.spreadsheet_id and source.sheet_name".to_string());
        }
        if self.identity.strategy == IdStrategy::Field && !self.source.fields.iter().any(|f| f.name == self.identity.field) {
            return invalid(format!("identity.field '{}' is not one of source.fields", self.identity.field));
        }
        if !self.store.partition_key.starts_with('/') {
            return invalid(format!("store.partition_key must start with '/': {}", self.store.partition_key));
        }
        let partition_field = &self.store.partition_key[1..];
        let known = partition_field == "id"
            || partition_field == self.identity.provenance_field
            || self.source.fields.iter().any(|f| f.name == partition_field);
        if !known {
            return invalid(format!(
                "store.partition_key {} names no document field (expected id, {} or a source field)",
                self.store.partition_key, self.identity.provenance_field
            ));
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if Duration::try_from_secs_f64(self.retry.initial_delay_secs).is_err() {
            return invalid(format!("retry.initial_delay_secs must be a non-negative duration: {}", self.retry.initial_delay_secs));
        }
        if self.loader.concurrency == 0 || self.loader.progress_every == 0 {
            return invalid("loader.concurrency and loader.progress_every must be at least 1".to_string());
        }
        match env {
            "prod" | "production" => {
                if !self.store.endpoint.starts_with("https://") {
                    return invalid(format!("store.endpoint must use https in production: {}", self.store.endpoint));
                }
            }
            "dev" | "development" => {}
            "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_mit_import() {
        let config = SyncConfig::default();
        assert_eq!(config.source.fields.len(), 19);
        assert_eq!(config.source.skip_rows, 1);
        assert_eq!(config.identity.prefix, "mit");
        assert_eq!(config.store.partition_key, "/source");
        assert_eq!(config.store.throughput, 400);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
        assert!(config.validate_for_env("prod").is_ok());
    }

    #[test]
    fn validation_rejects_unknown_id_field() {
        let mut config = SyncConfig::default();
        config.identity.field = "nope".to_string();
        assert!(matches!(config.validate_for_env("dev"), Err(Error::InvalidConfig(_))));

        config.identity.strategy = IdStrategy::Position;
        assert!(config.validate_for_env("dev").is_ok(), "field is ignored for position ids");
    }

    #[test]
    fn validation_rejects_zero_attempts_and_bad_partition_key() {
        let mut config = SyncConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate_for_env("dev").is_err());

        let mut config = SyncConfig::default();
        config.store.partition_key = "source".to_string();
        assert!(config.validate_for_env("dev").is_err());
    }

    #[test]
    fn validation_rejects_delays_beyond_duration_range() {
        let mut config = SyncConfig::default();
        config.retry.initial_delay_secs = 1e30;
        assert!(matches!(config.validate_for_env("dev"), Err(Error::InvalidConfig(_))));
        assert_eq!(config.retry.initial_delay(), Duration::MAX);

        config.retry.initial_delay_secs = -1.0;
        assert!(config.validate_for_env("dev").is_err());
        assert_eq!(config.retry.initial_delay(), Duration::ZERO);

        config.retry.initial_delay_secs = f64::NAN;
        assert!(config.validate_for_env("dev").is_err());
    }

    #[test]
    fn partition_key_must_name_a_document_field() {
        let mut config = SyncConfig::default();
        config.store.partition_key = "/origin".to_string();
        assert!(matches!(config.validate_for_env("dev"), Err(Error::InvalidConfig(_))));

        config.identity.provenance_field = "origin".to_string();
        assert!(config.validate_for_env("dev").is_ok());

        config.store.partition_key = "/riskCategory".to_string();
        assert!(config.validate_for_env("dev").is_ok(), "source fields are valid partition keys");

        config.store.partition_key = "/source/nested".to_string();
        assert!(config.validate_for_env("dev").is_err());
    }

    #[test]
    fn prod_requires_https_endpoint() {
        let mut config = SyncConfig::default();
        config.store.endpoint = "http://localhost:8081/".to_string();
        assert!(config.validate_for_env("dev").is_ok());
        assert!(config.validate_for_env("prod").is_err());
    }
}
