// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Resolution Engine
//!
//! Answers "who may this agent hand this work to?".
//!
//! | Request | Strategy |
//! |---------|----------|
//! | explicit target | cached `(from, to)` link lookup → single candidate or `DelegationNotAuthorized` |
//! | free-text query | full-text search → vector similarity fallback |
//!
//! Both search strategies share one ranking (score descending, oldest link
//! first, then agent id) and only ever see active links. Query results also
//! drop targets whose link has no free admission slot right now.
//!
//! The engine owns its link cache and its invalidation handling; it learns
//! about mutations only through [`InvalidationEvent`]s and always re-reads the
//! store afterwards.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::admission::AdmissionController;
use crate::application::link_cache::LinkCache;
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::errors::DelegationError;
use crate::domain::events::{InvalidationEvent, InvalidationKind};
use crate::domain::link::{
    rank, AgentId, DelegateTarget, DelegationLink, LinkId, ScoredTarget,
};
use crate::domain::node_config::ResolutionConfig;
use crate::domain::repository::{LinkRepository, RepositoryError};

/// What the caller wants resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveRequest {
    /// A named target agent.
    Explicit { to: AgentId },
    /// A task description; `limit` defaults to the configured default.
    Query { text: String, limit: Option<usize> },
}

impl ResolveRequest {
    pub fn explicit(to: AgentId) -> Self {
        ResolveRequest::Explicit { to }
    }

    pub fn query(text: impl Into<String>, limit: Option<usize>) -> Self {
        ResolveRequest::Query {
            text: text.into(),
            limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Explicit,
    FullText,
    Vector,
    /// No strategy produced candidates.
    None,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Explicit => "explicit",
            ResolutionStrategy::FullText => "full_text",
            ResolutionStrategy::Vector => "vector",
            ResolutionStrategy::None => "none",
        }
    }
}

/// Ranked candidates plus how they were found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub candidates: Vec<ScoredTarget>,
    pub strategy: ResolutionStrategy,
    /// Set when the store could not run full-text search.
    pub full_text_unavailable: bool,
    /// `EmbeddingUnavailable` recorded when the vector fallback could not run.
    /// Serialized as its message.
    #[serde(serialize_with = "error_message")]
    pub embedding_error: Option<DelegationError>,
}

fn error_message<S: serde::Serializer>(
    error: &Option<DelegationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Resolution {
    fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            strategy: ResolutionStrategy::None,
            full_text_unavailable: false,
            embedding_error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn best(&self) -> Option<&ScoredTarget> {
        self.candidates.first()
    }
}

pub struct ResolutionEngine {
    store: Arc<dyn LinkRepository>,
    admission: Arc<AdmissionController>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cache: LinkCache,
    limits: ResolutionConfig,
}

impl ResolutionEngine {
    pub fn new(
        store: Arc<dyn LinkRepository>,
        admission: Arc<AdmissionController>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        limits: ResolutionConfig,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            admission,
            embedder,
            cache: LinkCache::new(cache_ttl),
            limits,
        }
    }

    pub async fn resolve(
        &self,
        from: AgentId,
        request: &ResolveRequest,
    ) -> Result<Resolution, DelegationError> {
        let resolution = match request {
            ResolveRequest::Explicit { to } => self.resolve_explicit(from, *to).await?,
            ResolveRequest::Query { text, limit } => {
                self.resolve_query(from, text, *limit).await?
            }
        };
        metrics::counter!("switchyard_resolution_total", "strategy" => resolution.strategy.as_str())
            .increment(1);
        Ok(resolution)
    }

    /// Whether an active link lets `from` delegate to `to`.
    pub async fn can_delegate(&self, from: AgentId, to: AgentId) -> Result<bool, DelegationError> {
        Ok(self.get_link_between(from, to).await?.is_some())
    }

    /// The oldest active link authorizing `from → to`, settings included.
    pub async fn get_link_between(
        &self,
        from: AgentId,
        to: AgentId,
    ) -> Result<Option<DelegationLink>, DelegationError> {
        if let Some(answer) = self.cache.get_pair(from, to) {
            return Ok(answer);
        }
        let token = self.cache.fill_token();
        let link = self.store.get_link_between(from, to).await?;
        // Status is re-checked so a store that leaks a disabled row never authorizes.
        let link = link.filter(|l| l.authorizes(from, to));
        self.cache.fill_pair(token, from, to, link.clone());
        Ok(link)
    }

    /// Every delegate target of `from`, oldest link first.
    pub async fn delegate_targets(&self, from: AgentId) -> Result<Vec<DelegateTarget>, DelegationError> {
        if let Some(targets) = self.cache.get_targets(from) {
            return Ok(targets);
        }
        let token = self.cache.fill_token();
        let targets: Vec<_> = self
            .store
            .delegate_targets(from)
            .await?
            .into_iter()
            .filter(|t| t.link.is_active())
            .collect();
        self.cache.fill_targets(token, from, targets.clone());
        Ok(targets)
    }

    async fn resolve_explicit(&self, from: AgentId, to: AgentId) -> Result<Resolution, DelegationError> {
        let Some(link) = self.get_link_between(from, to).await? else {
            debug!(from = %from, to = %to, "Delegation not authorized");
            return Err(DelegationError::DelegationNotAuthorized { from, to });
        };

        let (agent_key, display_name) = if link.target_agent_id == to {
            (link.display.target_key.clone(), link.display.target_display_name.clone())
        } else {
            (link.display.source_key.clone(), link.display.source_display_name.clone())
        };
        let target = DelegateTarget {
            agent_id: to,
            agent_key: agent_key.unwrap_or_else(|| to.to_string()),
            display_name,
            description: None,
            team_name: link.display.team_name.clone(),
            link,
        };

        Ok(Resolution {
            candidates: vec![ScoredTarget::new(target, 1.0)],
            strategy: ResolutionStrategy::Explicit,
            full_text_unavailable: false,
            embedding_error: None,
        })
    }

    fn effective_limit(&self, limit: Option<usize>) -> Result<usize, DelegationError> {
        match limit {
            None => Ok(self.limits.default_limit),
            Some(0) => Err(DelegationError::invalid("limit must be at least 1")),
            Some(n) if n > self.limits.max_limit => Err(DelegationError::invalid(format!(
                "limit {} exceeds the maximum of {}",
                n, self.limits.max_limit
            ))),
            Some(n) => Ok(n),
        }
    }

    async fn resolve_query(
        &self,
        from: AgentId,
        text: &str,
        limit: Option<usize>,
    ) -> Result<Resolution, DelegationError> {
        let limit = self.effective_limit(limit)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DelegationError::invalid("query text cannot be empty"));
        }

        let mut resolution = Resolution::empty();

        match self.store.search_delegate_targets(from, text, None).await {
            Ok(hits) if !hits.is_empty() => {
                resolution.strategy = ResolutionStrategy::FullText;
                resolution.candidates = hits;
            }
            Ok(_) => {
                debug!(from = %from, "No full-text matches, falling back to vector search");
            }
            Err(RepositoryError::FullTextUnavailable(reason)) => {
                warn!(from = %from, reason = %reason, "Full-text search unavailable, falling back to vector search");
                resolution.full_text_unavailable = true;
            }
            Err(e) => return Err(e.into()),
        }

        if resolution.strategy == ResolutionStrategy::None {
            match self.embed_query(text).await {
                Ok(embedding) => {
                    resolution.candidates = self
                        .store
                        .vector_search_delegate_targets(from, &embedding, None)
                        .await?;
                    resolution.strategy = ResolutionStrategy::Vector;
                }
                Err(e) => {
                    warn!(from = %from, error = %e, "Vector fallback skipped");
                    resolution.embedding_error = Some(e);
                }
            }
        }

        let candidates = std::mem::take(&mut resolution.candidates)
            .into_iter()
            .filter(|c| c.target.link.is_active() && self.admission.has_capacity(&c.target.link))
            .collect();
        resolution.candidates = rank(candidates, limit);
        if resolution.candidates.is_empty() {
            resolution.strategy = ResolutionStrategy::None;
        }

        debug!(
            from = %from,
            strategy = resolution.strategy.as_str(),
            candidates = resolution.candidates.len(),
            "Query resolved"
        );
        Ok(resolution)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, DelegationError> {
        let Some(embedder) = &self.embedder else {
            return Err(DelegationError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            ));
        };
        let vectors = embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|e| DelegationError::EmbeddingUnavailable(e.to_string()))?;
        vectors.into_iter().next().ok_or_else(|| {
            DelegationError::EmbeddingUnavailable("provider returned no embedding".to_string())
        })
    }

    /// Drop cached state affected by `event`. Tool events are ignored.
    pub async fn handle_invalidation(&self, event: &InvalidationEvent) {
        if event.kind != InvalidationKind::Link {
            return;
        }
        let Some(link_id) = event.link_id() else {
            warn!(key = %event.key, "Malformed link invalidation key, flushing link cache");
            self.cache.clear();
            return;
        };
        metrics::counter!("switchyard_cache_invalidations_total", "kind" => "link").increment(1);
        self.invalidate_link(link_id).await;
    }

    /// Forget everything cached about `link_id` and its endpoints.
    pub async fn invalidate_link(&self, link_id: LinkId) {
        let dropped = self.cache.invalidate_link(link_id);

        // Creations and status flips also change negative answers and target
        // lists that never contained this link, so clear both endpoints too.
        match self.store.get(link_id).await {
            Ok(Some(link)) => {
                self.cache
                    .invalidate_agents(&[link.source_agent_id, link.target_agent_id]);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(link_id = %link_id, error = %e, "Store unreachable during invalidation, flushing link cache");
                self.cache.clear();
            }
        }
        debug!(link_id = %link_id, dropped, "Link cache invalidated");
    }

    /// Forget everything. Used when the invalidation stream lagged.
    pub fn flush_cache(&self) {
        self.cache.clear();
        info!("Resolution cache flushed");
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
