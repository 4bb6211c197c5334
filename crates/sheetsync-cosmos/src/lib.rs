//! sheetsync-cosmos
//!
//! Cosmos DB REST plumbing: request signing (`auth`), create-if-absent
//! provisioning and document upserts (`client`).
pub mod auth;
pub mod client;

pub use auth::Credential;
pub use client::{CosmosClient, CosmosContainer};

use sheetsync_core::config::StoreConfig;
use sheetsync_core::Result;

/// Connect, then create the database and container unless they already exist.
pub async fn open_container(store: &StoreConfig) -> Result<CosmosContainer> {
    let client = CosmosClient::from_config(store)?;
    client.create_database_if_not_exists(&store.database).await?;
    client.create_container_if_not_exists(&store.container_spec()).await
}
