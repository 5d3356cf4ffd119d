// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the store contracts defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and query delegation links and custom tools
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresLinkRepository** - links, agent directory joins, FTS and vector search
//! - **PostgresCustomToolRepository** - custom tool definitions
//!
//! ## In-Memory Repositories
//!
//! Used for development, tests and the CLI fixture mode:
//! - **InMemoryLinkRepository** - arena of links indexed by source and target agent
//! - **InMemoryCustomToolRepository** - tools with a unique name index
//!
//! Both in-memory stores can be switched into a failing mode to exercise the
//! engine's `StoreUnavailable` and full-text fallback paths.

pub mod postgres_custom_tool;
pub mod postgres_link;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::agent::{AgentProfile, TeamProfile};
use crate::domain::embedding::cosine_similarity;
use crate::domain::link::{
    rank, AgentId, DelegateTarget, DelegationLink, LinkDisplay, LinkId, ScoredTarget, TeamId,
};
use crate::domain::repository::{
    CustomToolRepository, LinkRepository, RepositoryError, TEAM_LINK_CONSTRAINT,
    TOOL_NAME_CONSTRAINT,
};
use crate::domain::tool::{CustomTool, ToolId};

pub use postgres_custom_tool::PostgresCustomToolRepository;
pub use postgres_link::PostgresLinkRepository;

/// Lowercased alphanumeric terms, used on both sides of in-memory text search.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query terms that match (exactly or as a prefix) a document term.
pub(crate) fn text_score(query_terms: &[String], document: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms = tokenize(document);
    let matched = query_terms
        .iter()
        .filter(|q| doc_terms.iter().any(|d| d.starts_with(q.as_str())))
        .count();
    matched as f64 / query_terms.len() as f64
}

#[derive(Default)]
struct LinkArena {
    links: HashMap<LinkId, DelegationLink>,
    by_source: HashMap<AgentId, BTreeSet<LinkId>>,
    by_target: HashMap<AgentId, BTreeSet<LinkId>>,
    agents: HashMap<AgentId, AgentProfile>,
    teams: HashMap<TeamId, TeamProfile>,
}

impl LinkArena {
    fn insert(&mut self, link: DelegationLink) {
        self.by_source.entry(link.source_agent_id).or_default().insert(link.id);
        self.by_target.entry(link.target_agent_id).or_default().insert(link.id);
        self.links.insert(link.id, link);
    }

    fn remove(&mut self, id: LinkId) -> Option<DelegationLink> {
        let link = self.links.remove(&id)?;
        if let Some(ids) = self.by_source.get_mut(&link.source_agent_id) {
            ids.remove(&id);
        }
        if let Some(ids) = self.by_target.get_mut(&link.target_agent_id) {
            ids.remove(&id);
        }
        Some(link)
    }

    /// Links where `agent_id` is either endpoint.
    fn touching(&self, agent_id: AgentId) -> impl Iterator<Item = &DelegationLink> {
        let outgoing = self.by_source.get(&agent_id).into_iter().flatten();
        let incoming = self.by_target.get(&agent_id).into_iter().flatten();
        outgoing.chain(incoming).filter_map(move |id| self.links.get(id))
    }

    fn project(&self, link: &DelegationLink) -> DelegationLink {
        let source = self.agents.get(&link.source_agent_id);
        let target = self.agents.get(&link.target_agent_id);
        let mut projected = link.clone();
        projected.display = LinkDisplay {
            source_key: source.map(|a| a.key.clone()),
            target_key: target.map(|a| a.key.clone()),
            source_display_name: source.and_then(|a| a.display_name.clone()),
            target_display_name: target.and_then(|a| a.display_name.clone()),
            team_name: link
                .team_id
                .and_then(|t| self.teams.get(&t))
                .map(|t| t.name.clone()),
        };
        projected
    }

    fn delegate_targets(&self, from: AgentId) -> Vec<(DelegateTarget, Option<&AgentProfile>)> {
        self.touching(from)
            .filter(|link| link.is_active())
            .filter_map(|link| {
                let agent_id = link.delegate_of(from)?;
                let profile = self.agents.get(&agent_id);
                let link = self.project(link);
                let target = DelegateTarget {
                    agent_id,
                    agent_key: profile
                        .map(|p| p.key.clone())
                        .unwrap_or_else(|| agent_id.to_string()),
                    display_name: profile.and_then(|p| p.display_name.clone()),
                    description: profile.and_then(|p| p.description.clone()),
                    team_name: link.display.team_name.clone(),
                    link,
                };
                Some((target, profile))
            })
            .collect()
    }
}

/// Thread-safe in-memory link store with an agent directory for joins
#[derive(Clone, Default)]
pub struct InMemoryLinkRepository {
    arena: Arc<RwLock<LinkArena>>,
    unavailable: Arc<AtomicBool>,
    full_text_disabled: Arc<AtomicBool>,
}

impl InMemoryLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_agent(&self, profile: AgentProfile) {
        self.arena.write().agents.insert(profile.id, profile);
    }

    pub fn upsert_team(&self, team: TeamProfile) {
        self.arena.write().teams.insert(team.id, team);
    }

    /// Make every operation fail with `Unavailable` (simulated outage).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make text search report `FullTextUnavailable`.
    pub fn set_full_text_available(&self, available: bool) {
        self.full_text_disabled.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory link store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkRepository for InMemoryLinkRepository {
    async fn create(&self, link: &DelegationLink) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut arena = self.arena.write();
        if let Some(team_id) = link.team_id {
            let duplicate = arena.links.values().any(|l| {
                l.team_id == Some(team_id)
                    && l.source_agent_id == link.source_agent_id
                    && l.target_agent_id == link.target_agent_id
            });
            if duplicate {
                return Err(RepositoryError::Conflict {
                    constraint: TEAM_LINK_CONSTRAINT.to_string(),
                    detail: format!(
                        "team {} already links {} -> {}",
                        team_id, link.source_agent_id, link.target_agent_id
                    ),
                });
            }
        }
        arena.insert(link.clone());
        Ok(())
    }

    async fn get(&self, id: LinkId) -> Result<Option<DelegationLink>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        Ok(arena.links.get(&id).map(|l| arena.project(l)))
    }

    async fn update(&self, link: &DelegationLink) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut arena = self.arena.write();
        let Some(existing) = arena.links.get_mut(&link.id) else {
            return Err(RepositoryError::NotFound(format!("link {}", link.id)));
        };
        // Endpoints and team are immutable; only the mutable fields move.
        existing.direction = link.direction;
        existing.max_concurrent = link.max_concurrent;
        existing.settings = link.settings.clone();
        existing.status = link.status;
        existing.updated_at = link.updated_at;
        Ok(())
    }

    async fn delete(&self, id: LinkId) -> Result<bool, RepositoryError> {
        self.check_available()?;
        Ok(self.arena.write().remove(id).is_some())
    }

    async fn list_by_source(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        let mut links: Vec<_> = arena
            .by_source
            .get(&agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| arena.links.get(id))
            .filter(|l| include_disabled || l.is_active())
            .map(|l| arena.project(l))
            .collect();
        links.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(links)
    }

    async fn list_by_target(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        let mut links: Vec<_> = arena
            .by_target
            .get(&agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| arena.links.get(id))
            .filter(|l| include_disabled || l.is_active())
            .map(|l| arena.project(l))
            .collect();
        links.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(links)
    }

    async fn get_link_between(
        &self,
        from: AgentId,
        to: AgentId,
    ) -> Result<Option<DelegationLink>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        Ok(arena
            .touching(from)
            .filter(|l| l.authorizes(from, to))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|l| arena.project(l)))
    }

    async fn delegate_targets(&self, from: AgentId) -> Result<Vec<DelegateTarget>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        let mut targets: Vec<_> = arena
            .delegate_targets(from)
            .into_iter()
            .map(|(target, _)| target)
            .collect();
        targets.sort_by(|a, b| {
            a.link
                .created_at
                .cmp(&b.link.created_at)
                .then(a.agent_id.cmp(&b.agent_id))
        });
        Ok(targets)
    }

    async fn search_delegate_targets(
        &self,
        from: AgentId,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError> {
        self.check_available()?;
        if self.full_text_disabled.load(Ordering::SeqCst) {
            return Err(RepositoryError::FullTextUnavailable(
                "text index disabled".to_string(),
            ));
        }
        let terms = tokenize(query);
        let arena = self.arena.read();
        let scored: Vec<_> = arena
            .delegate_targets(from)
            .into_iter()
            .filter_map(|(target, profile)| {
                let document = match profile {
                    Some(p) => p.searchable_text(),
                    None => target.agent_key.clone(),
                };
                let score = text_score(&terms, &document);
                (score > 0.0).then(|| ScoredTarget::new(target, score))
            })
            .collect();
        Ok(rank(scored, limit.unwrap_or(usize::MAX)))
    }

    async fn vector_search_delegate_targets(
        &self,
        from: AgentId,
        embedding: &[f32],
        limit: Option<usize>,
    ) -> Result<Vec<ScoredTarget>, RepositoryError> {
        self.check_available()?;
        let arena = self.arena.read();
        let scored: Vec<_> = arena
            .delegate_targets(from)
            .into_iter()
            .map(|(target, profile)| {
                let score = profile
                    .and_then(|p| p.embedding.as_deref())
                    .map(|stored| cosine_similarity(embedding, stored))
                    .unwrap_or(0.0);
                ScoredTarget::new(target, score)
            })
            .collect();
        Ok(rank(scored, limit.unwrap_or(usize::MAX)))
    }

    async fn delete_team_links_for_agent(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Vec<LinkId>, RepositoryError> {
        self.check_available()?;
        let mut arena = self.arena.write();
        let doomed: Vec<LinkId> = arena
            .touching(agent_id)
            .filter(|l| l.team_id == Some(team_id))
            .map(|l| l.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for id in &doomed {
            arena.remove(*id);
        }
        Ok(doomed)
    }
}

#[derive(Default)]
struct ToolTable {
    tools: HashMap<ToolId, CustomTool>,
    names: HashMap<String, ToolId>,
}

/// Thread-safe in-memory custom tool store with a unique name index
#[derive(Clone, Default)]
pub struct InMemoryCustomToolRepository {
    table: Arc<RwLock<ToolTable>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryCustomToolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory tool store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn name_conflict(name: &str) -> RepositoryError {
        RepositoryError::Conflict {
            constraint: TOOL_NAME_CONSTRAINT.to_string(),
            detail: format!("tool name '{}' already exists", name),
        }
    }
}

#[async_trait]
impl CustomToolRepository for InMemoryCustomToolRepository {
    async fn create(&self, tool: &CustomTool) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut table = self.table.write();
        if table.names.contains_key(tool.name.as_str()) {
            return Err(Self::name_conflict(tool.name.as_str()));
        }
        table.names.insert(tool.name.to_string(), tool.id);
        table.tools.insert(tool.id, tool.clone());
        Ok(())
    }

    async fn get(&self, id: ToolId) -> Result<Option<CustomTool>, RepositoryError> {
        self.check_available()?;
        Ok(self.table.read().tools.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<CustomTool>, RepositoryError> {
        self.check_available()?;
        let table = self.table.read();
        Ok(table.names.get(name).and_then(|id| table.tools.get(id)).cloned())
    }

    async fn update(&self, tool: &CustomTool) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut table = self.table.write();
        let Some(old_name) = table.tools.get(&tool.id).map(|t| t.name.to_string()) else {
            return Err(RepositoryError::NotFound(format!("custom tool {}", tool.id)));
        };
        if old_name != tool.name.as_str() {
            if table.names.contains_key(tool.name.as_str()) {
                return Err(Self::name_conflict(tool.name.as_str()));
            }
            table.names.remove(&old_name);
            table.names.insert(tool.name.to_string(), tool.id);
        }
        table.tools.insert(tool.id, tool.clone());
        Ok(())
    }

    async fn delete(&self, id: ToolId) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut table = self.table.write();
        match table.tools.remove(&id) {
            Some(tool) => {
                table.names.remove(tool.name.as_str());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<CustomTool>, RepositoryError> {
        self.check_available()?;
        let mut tools: Vec<_> = self.table.read().tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(tools)
    }
}
