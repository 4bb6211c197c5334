use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use sheetsync_core::config::{AuthKind, StoreConfig};
use sheetsync_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// How requests to the account are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Decoded account key, requests are HMAC signed.
    MasterKey(Vec<u8>),
    /// Entra ID bearer token acquired outside this process.
    AadToken(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MasterKey(_) => f.debug_tuple("MasterKey").field(&"<secret>").finish(),
            Self::AadToken(_) => f.debug_tuple("AadToken").field(&"<secret>").finish(),
        }
    }
}

impl Credential {
    pub fn master_key(encoded: &str) -> Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidConfig(format!("account key is not valid base64: {e}")))?;
        Ok(Self::MasterKey(key))
    }

    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        match store.auth {
            AuthKind::Key => {
                let key = match &store.key {
                    Some(key) => key.clone(),
                    None => std::env::var(&store.key_env).map_err(|_| {
                        Error::InvalidConfig(format!("store.auth = \"key\" but neither store.key nor ${} is set", store.key_env))
                    })?,
                };
                Self::master_key(&key)
            }
            AuthKind::Ambient => {
                let token = std::env::var(&store.token_env)
                    .map_err(|_| Error::InvalidConfig(format!("no ambient credential found in ${}", store.token_env)))?;
                Ok(Self::AadToken(token.trim().to_string()))
            }
        }
    }

    /// Value of the `authorization` header for one request.
    ///
    /// See <https://learn.microsoft.com/rest/api/cosmos-db/access-control-on-cosmosdb-resources>
    pub fn authorization(&self, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> Result<String> {
        let token = match self {
            Self::MasterKey(key) => {
                let string_to_sign = format!(
                    "{}\n{}\n{}\n{}\n\n",
                    verb.to_lowercase(),
                    resource_type.to_lowercase(),
                    resource_link,
                    date.to_lowercase(),
                );
                let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::InvalidConfig(format!("account key: {e}")))?;
                mac.update(string_to_sign.as_bytes());
                let sig = STANDARD.encode(mac.finalize().into_bytes());
                format!("type=master&ver=1.0&sig={sig}")
            }
            Self::AadToken(token) => format!("type=aad&ver=1.0&sig={token}"),
        };
        Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
    }
}

/// RFC 1123 date as expected in `x-ms-date`.
pub fn ms_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
