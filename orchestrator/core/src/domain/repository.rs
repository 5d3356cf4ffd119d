// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Store Contracts
//!
//! Persistence contracts consumed by the engine. The store is the single
//! source of truth for links and custom tools; the engine only keeps
//! invalidation-driven read caches on top of it.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `LinkRepository` | `DelegationLink` | `InMemoryLinkRepository`, `PostgresLinkRepository` |
//! | `CustomToolRepository` | `CustomTool` | `InMemoryCustomToolRepository`, `PostgresCustomToolRepository` |
//!
//! ## Status scoping
//!
//! Everything that answers "who may receive work" (`get_link_between`,
//! `delegate_targets`, both searches) only sees `active` links. Direct id
//! lookups and the administrative listings see every status.
//!
//! ## Uniqueness
//!
//! Implementations must enforce unique custom tool names
//! ([`TOOL_NAME_CONSTRAINT`]) and unique `(source, target, team)` triples for
//! team links ([`TEAM_LINK_CONSTRAINT`]), reporting violations as
//! [`RepositoryError::Conflict`] so racing writers observe the same outcome
//! as the in-process checks.

use async_trait::async_trait;

use crate::domain::link::{AgentId, DelegateTarget, DelegationLink, LinkId, ScoredTarget, TeamId};
use crate::domain::tool::{CustomTool, ToolId};

pub const TOOL_NAME_CONSTRAINT: &str = "custom_tools_name_key";
pub const TEAM_LINK_CONSTRAINT: &str = "delegation_links_team_pair_key";

/// Storage backend selection for the composition root.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn create(&self, link: &DelegationLink) -> Result<(), RepositoryError>;

    /// Direct lookup by id, any status.
    async fn get(&self, id: LinkId) -> Result<Option<DelegationLink>, RepositoryError>;

    /// Replace the stored record. Fails with `NotFound` for unknown ids.
    async fn update(&self, link: &DelegationLink) -> Result<(), RepositoryError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: LinkId) -> Result<bool, RepositoryError>;

    async fn list_by_source(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError>;

    async fn list_by_target(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError>;

    /// The single active link authorizing `from → to`, with its settings.
    ///
    /// When several links qualify, the oldest one wins.
    async fn get_link_between(
        &self,
        from: AgentId,
        to: AgentId,
    ) -> Result<Option<DelegationLink>, RepositoryError>;

    async fn can_delegate(&self, from: AgentId, to: AgentId) -> Result<bool, RepositoryError> {
        Ok(self.get_link_between(from, to).await?.is_some())
    }

    /// Every agent `from` may delegate to, one entry per authorizing link.
    async fn delegate_targets(&self, from: AgentId) -> Result<Vec<DelegateTarget>, RepositoryError>;

    /// Full-text search over `from`'s delegate targets, best match first.
    ///
    /// Returns `FullTextUnavailable` when the backend cannot run text search.
    async fn search_delegate_targets(
        &self,
        from: AgentId,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError>;

    /// Cosine-similarity search over `from`'s delegate targets.
    async fn vector_search_delegate_targets(
        &self,
        from: AgentId,
        embedding: &[f32],
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError>;

    /// Cascade removal of team-managed links touching `agent_id` in `team_id`.
    /// Returns the ids removed.
    async fn delete_team_links_for_agent(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Vec<LinkId>, RepositoryError>;
}

#[async_trait]
pub trait CustomToolRepository: Send + Sync {
    async fn create(&self, tool: &CustomTool) -> Result<(), RepositoryError>;

    async fn get(&self, id: ToolId) -> Result<Option<CustomTool>, RepositoryError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<CustomTool>, RepositoryError>;

    async fn update(&self, tool: &CustomTool) -> Result<(), RepositoryError>;

    async fn delete(&self, id: ToolId) -> Result<bool, RepositoryError>;

    async fn list(&self) -> Result<Vec<CustomTool>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Uniqueness constraint {constraint} violated: {detail}")]
    Conflict { constraint: String, detail: String },

    #[error("Full-text search unavailable: {0}")]
    FullTextUnavailable(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, RepositoryError::Conflict { constraint, .. } if constraint == name)
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict {
                constraint: db.constraint().unwrap_or("unique").to_string(),
                detail: db.message().to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                RepositoryError::Serialization(err.to_string())
            }
            _ => RepositoryError::Unavailable(err.to_string()),
        }
    }
}
