// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Links
//!
//! A delegation link is a directed edge in the agent graph authorizing one
//! agent to hand work to another. The graph is a directed multigraph: agents
//! may delegate to each other mutually, and two agents may share several
//! links (one per team plus manual ones). Agents never own links; the store
//! does, and indexes them by source and target agent.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Link aggregate, direction rules and candidate ranking

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DelegationError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_string(s: &str) -> Result<Self, DelegationError> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
                    DelegationError::invalid(format!(
                        "malformed {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(AgentId);
uuid_id!(LinkId);
uuid_id!(TeamId);

/// Which way work may flow across a link, relative to its stored endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// source → target only
    Outbound,
    /// target → source only (the target initiates)
    Inbound,
    Bidirectional,
}

impl LinkDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkDirection::Outbound => "outbound",
            LinkDirection::Inbound => "inbound",
            LinkDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DelegationError> {
        match s {
            "outbound" => Ok(LinkDirection::Outbound),
            "inbound" => Ok(LinkDirection::Inbound),
            "bidirectional" => Ok(LinkDirection::Bidirectional),
            other => Err(DelegationError::invalid(format!(
                "unknown link direction '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Disabled,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Active => "active",
            LinkStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DelegationError> {
        match s {
            "active" => Ok(LinkStatus::Active),
            "disabled" => Ok(LinkStatus::Disabled),
            other => Err(DelegationError::invalid(format!(
                "unknown link status '{}'",
                other
            ))),
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::Active
    }
}

/// Per-user permission overlay attached to a link.
///
/// Carried as raw JSON text and never parsed by the engine; resolution returns
/// it byte-for-byte so the caller can apply its own rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkSettings(String);

impl LinkSettings {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self("{}".to_string())
    }
}

/// Read-only projections joined in by the store. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkDisplay {
    pub source_key: Option<String>,
    pub target_key: Option<String>,
    pub source_display_name: Option<String>,
    pub target_display_name: Option<String>,
    pub team_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationLink {
    pub id: LinkId,
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    pub direction: LinkDirection,
    /// Non-null marks the link as managed by team membership.
    pub team_id: Option<TeamId>,
    /// `0` means unlimited.
    pub max_concurrent: u32,
    pub settings: LinkSettings,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub display: LinkDisplay,
}

impl DelegationLink {
    pub fn is_active(&self) -> bool {
        self.status == LinkStatus::Active
    }

    pub fn is_team_managed(&self) -> bool {
        self.team_id.is_some()
    }

    pub fn touches(&self, agent_id: AgentId) -> bool {
        self.source_agent_id == agent_id || self.target_agent_id == agent_id
    }

    /// Whether this link's direction lets `from` hand work to `to`.
    ///
    /// Status is not consulted; callers combine this with `is_active`.
    pub fn permits(&self, from: AgentId, to: AgentId) -> bool {
        let forward = self.source_agent_id == from && self.target_agent_id == to;
        let reverse = self.source_agent_id == to && self.target_agent_id == from;
        match self.direction {
            LinkDirection::Outbound => forward,
            LinkDirection::Inbound => reverse,
            LinkDirection::Bidirectional => forward || reverse,
        }
    }

    /// The agent `from` may delegate to over this link, if any.
    pub fn delegate_of(&self, from: AgentId) -> Option<AgentId> {
        let other = if self.source_agent_id == from {
            self.target_agent_id
        } else if self.target_agent_id == from {
            self.source_agent_id
        } else {
            return None;
        };
        self.permits(from, other).then_some(other)
    }

    /// Whether the link authorizes `from → to` right now.
    pub fn authorizes(&self, from: AgentId, to: AgentId) -> bool {
        self.is_active() && self.permits(from, to)
    }
}

/// Input for link creation. Validated before any store write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLink {
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    pub direction: LinkDirection,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub max_concurrent: u32,
    #[serde(default)]
    pub settings: LinkSettings,
    #[serde(default)]
    pub status: LinkStatus,
}

impl NewLink {
    pub fn new(source: AgentId, target: AgentId, direction: LinkDirection) -> Self {
        Self {
            source_agent_id: source,
            target_agent_id: target,
            direction,
            team_id: None,
            max_concurrent: 0,
            settings: LinkSettings::default(),
            status: LinkStatus::Active,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_team(mut self, team_id: TeamId) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_settings(mut self, settings: LinkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_status(mut self, status: LinkStatus) -> Self {
        self.status = status;
        self
    }

    pub fn validate(&self) -> Result<(), DelegationError> {
        if self.source_agent_id == self.target_agent_id {
            return Err(DelegationError::invalid(format!(
                "agent {} cannot link to itself",
                self.source_agent_id
            )));
        }
        Ok(())
    }

    /// Materialize the link record. The caller must have validated first.
    pub fn into_link(self, now: DateTime<Utc>) -> DelegationLink {
        DelegationLink {
            id: LinkId::new(),
            source_agent_id: self.source_agent_id,
            target_agent_id: self.target_agent_id,
            direction: self.direction,
            team_id: self.team_id,
            max_concurrent: self.max_concurrent,
            settings: self.settings,
            status: self.status,
            created_at: now,
            updated_at: now,
            display: LinkDisplay::default(),
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkUpdate {
    pub direction: Option<LinkDirection>,
    pub max_concurrent: Option<u32>,
    pub settings: Option<LinkSettings>,
    pub status: Option<LinkStatus>,
}

impl LinkUpdate {
    pub fn is_empty(&self) -> bool {
        self.direction.is_none()
            && self.max_concurrent.is_none()
            && self.settings.is_none()
            && self.status.is_none()
    }

    /// Status is the only field a team-managed link accepts.
    pub fn is_status_only(&self) -> bool {
        self.direction.is_none() && self.max_concurrent.is_none() && self.settings.is_none()
    }

    pub fn apply_to(&self, link: &mut DelegationLink, now: DateTime<Utc>) {
        if let Some(direction) = self.direction {
            link.direction = direction;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            link.max_concurrent = max_concurrent;
        }
        if let Some(settings) = &self.settings {
            link.settings = settings.clone();
        }
        if let Some(status) = self.status {
            link.status = status;
        }
        link.updated_at = now;
    }
}

/// An agent reachable from a source agent over an active, direction-permitting link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTarget {
    pub agent_id: AgentId,
    pub agent_key: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub team_name: Option<String>,
    pub link: DelegationLink,
}

/// A delegate target with the relevance score assigned by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTarget {
    pub target: DelegateTarget,
    pub score: f64,
}

impl ScoredTarget {
    pub fn new(target: DelegateTarget, score: f64) -> Self {
        // NaN would break the total order below; it ranks like "no signal".
        let score = if score.is_nan() { 0.0 } else { score };
        Self { target, score }
    }
}

/// Ordering shared by full-text, vector and store-side ranking: score
/// descending, then link creation ascending, then target agent id.
pub fn compare_ranked(a: &ScoredTarget, b: &ScoredTarget) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.target.link.created_at.cmp(&b.target.link.created_at))
        .then_with(|| a.target.agent_id.cmp(&b.target.agent_id))
}

/// Sort with [`compare_ranked`], keep the best entry per agent, then at most
/// `limit` entries.
///
/// An agent reachable over several links (a team link and a manual one)
/// occupies one slot, carried by its highest-scoring, oldest link.
pub fn rank(mut candidates: Vec<ScoredTarget>, limit: usize) -> Vec<ScoredTarget> {
    candidates.sort_by(compare_ranked);
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.target.agent_id));
    candidates.truncate(limit);
    candidates
}
