// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete store and provider implementations from node
//! configuration, keeping the domain layer free of infrastructure types.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::application::engine::EngineStores;
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::node_config::EmbeddingConfig;
use crate::domain::repository::StorageBackend;
use crate::infrastructure::db::Database;
use crate::infrastructure::embedding::OpenAIEmbeddingClient;
use crate::infrastructure::repositories::{
    InMemoryCustomToolRepository, InMemoryLinkRepository, PostgresCustomToolRepository,
    PostgresLinkRepository,
};

/// Creates the link and tool stores for the configured backend.
///
/// The PostgreSQL backend expects the schema to be migrated already.
pub async fn create_stores(backend: &StorageBackend) -> anyhow::Result<EngineStores> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory delegation stores");
            Ok(EngineStores {
                links: Arc::new(InMemoryLinkRepository::new()),
                tools: Arc::new(InMemoryCustomToolRepository::new()),
            })
        }
        StorageBackend::PostgreSQL(config) => {
            let db = Database::connect(config)
                .await
                .context("Failed to connect to the delegation database")?;
            let pool = db.get_pool().clone();
            Ok(EngineStores {
                links: Arc::new(PostgresLinkRepository::new(pool.clone())),
                tools: Arc::new(PostgresCustomToolRepository::new(pool)),
            })
        }
    }
}

/// Creates the embedding provider, or `None` when vector fallback is off.
pub fn create_embedding_provider(
    config: Option<&EmbeddingConfig>,
) -> anyhow::Result<Option<Arc<dyn EmbeddingProvider>>> {
    let Some(config) = config else {
        return Ok(None);
    };
    let client = OpenAIEmbeddingClient::from_config(config)?;
    info!(endpoint = %config.endpoint, model = %config.model, "Embedding provider configured");
    Ok(Some(Arc::new(client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::link::AgentId;

    #[tokio::test]
    async fn test_in_memory_backend() {
        let stores = create_stores(&StorageBackend::InMemory).await.unwrap();
        assert!(stores.links.delegate_targets(AgentId::new()).await.unwrap().is_empty());
        assert!(stores.tools.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_embedding_provider_optional() {
        assert!(create_embedding_provider(None).unwrap().is_none());

        let config = EmbeddingConfig {
            endpoint: "http://localhost:11434/v1".into(),
            model: "nomic-embed-text".into(),
            api_key: None,
            timeout_seconds: 10,
        };
        assert!(create_embedding_provider(Some(&config)).unwrap().is_some());
    }
}
