// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Seed fixtures for offline resolution.
//!
//! A fixture names agents by key and wires them with links, so operators can
//! try resolution rules without a database:
//!
//! ```yaml
//! agents:
//!   - key: router
//!   - key: coder
//!     description: writes rust
//!     embedding: [1.0, 0.0]
//! teams:
//!   - name: platform
//! links:
//!   - source: router
//!     target: coder
//!     direction: outbound
//!     max_concurrent: 2
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;

use switchyard_core::domain::agent::{AgentProfile, TeamProfile};
use switchyard_core::domain::link::{
    AgentId, LinkDirection, LinkSettings, LinkStatus, NewLink, TeamId,
};
use switchyard_core::domain::repository::LinkRepository;
use switchyard_core::infrastructure::repositories::InMemoryLinkRepository;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub agents: Vec<FixtureAgent>,
    #[serde(default)]
    pub teams: Vec<FixtureTeam>,
    #[serde(default)]
    pub links: Vec<FixtureLink>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureAgent {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureTeam {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureLink {
    pub source: String,
    pub target: String,
    pub direction: String,
    #[serde(default)]
    pub max_concurrent: u32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

/// A fixture loaded into an in-memory store, with its key → id mapping.
pub struct LoadedFixture {
    pub store: InMemoryLinkRepository,
    agents: HashMap<String, AgentId>,
}

impl LoadedFixture {
    pub fn agent(&self, key: &str) -> Result<AgentId> {
        match self.agents.get(key) {
            Some(id) => Ok(*id),
            None => bail!("Agent '{}' is not defined in the fixture", key),
        }
    }

    pub fn key_of(&self, id: AgentId) -> Option<&str> {
        self.agents
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}

impl Fixture {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {:?}", path))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse fixture {:?}", path))
    }

    /// Seed an in-memory store. Links go through the store directly, so
    /// they carry the same team uniqueness rules as a real deployment.
    pub async fn load(self) -> Result<LoadedFixture> {
        let store = InMemoryLinkRepository::new();

        let mut agents = HashMap::new();
        for agent in self.agents {
            let id = AgentId::new();
            if agents.insert(agent.key.clone(), id).is_some() {
                bail!("Agent key '{}' is defined twice", agent.key);
            }
            let mut profile = AgentProfile::new(id, agent.key);
            profile.display_name = agent.display_name;
            profile.description = agent.description;
            profile.embedding = agent.embedding;
            store.upsert_agent(profile);
        }

        let mut teams = HashMap::new();
        for team in self.teams {
            let id = TeamId::new();
            teams.insert(team.name.clone(), id);
            store.upsert_team(TeamProfile { id, name: team.name });
        }

        let loaded = LoadedFixture { store, agents };
        for (index, link) in self.links.into_iter().enumerate() {
            let source = loaded.agent(&link.source)?;
            let target = loaded.agent(&link.target)?;
            let direction = LinkDirection::parse(&link.direction)?;

            let mut new_link = NewLink::new(source, target, direction)
                .with_max_concurrent(link.max_concurrent);
            if let Some(status) = &link.status {
                new_link = new_link.with_status(LinkStatus::parse(status)?);
            }
            if let Some(team) = &link.team {
                let Some(team_id) = teams.get(team) else {
                    bail!("Link #{} references unknown team '{}'", index + 1, team);
                };
                new_link = new_link.with_team(*team_id);
            }
            // Settings are carried verbatim; a YAML mapping is stored as its JSON text.
            match link.settings {
                Some(serde_json::Value::String(raw)) => {
                    new_link = new_link.with_settings(LinkSettings::new(raw));
                }
                Some(value) => {
                    new_link = new_link.with_settings(LinkSettings::new(value.to_string()));
                }
                None => {}
            }
            new_link
                .validate()
                .with_context(|| format!("Link #{} is invalid", index + 1))?;

            loaded
                .store
                .create(&new_link.into_link(Utc::now()))
                .await
                .with_context(|| format!("Failed to store link #{}", index + 1))?;
        }

        Ok(loaded)
    }
}
