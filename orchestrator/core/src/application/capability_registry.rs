// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Registry
//!
//! One flat namespace for every tool name an agent can call. Built-in and
//! MCP names are seeded at construction and stay for the lifetime of the
//! process; custom tool names come and go with the tool store.
//!
//! Registration is check-then-insert under the per-name shard lock of a
//! `DashMap`, so two concurrent claims on the same name cannot both win
//! while unrelated names never contend on a global lock. A side index from
//! tool id to the names it holds is updated under the same per-name lock, so
//! following one tool's changes touches only that tool's names.

use std::collections::{HashMap, HashSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::domain::errors::DelegationError;
use crate::domain::node_config::ToolsConfig;
use crate::domain::repository::CustomToolRepository;
use crate::domain::tool::{CustomTool, ToolId, ToolSource};

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: DashMap<String, ToolSource>,
    // Lock order: an `entries` shard, then a `by_tool` shard.
    by_tool: DashMap<ToolId, HashSet<String>>,
}

impl CapabilityRegistry {
    /// Empty registry. Use [`from_config`](Self::from_config) for a seeded one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with the configured built-in and MCP names.
    pub fn from_config(tools: &ToolsConfig) -> Result<Self, DelegationError> {
        let registry = Self::new();
        for name in &tools.builtin {
            registry.register(name, ToolSource::BuiltIn)?;
        }
        for server in &tools.mcp {
            for name in &server.tools {
                registry.register(
                    name,
                    ToolSource::Mcp {
                        server: server.server.clone(),
                    },
                )?;
            }
        }
        info!(
            builtin = tools.builtin.len(),
            mcp_servers = tools.mcp.len(),
            "Capability registry seeded"
        );
        Ok(registry)
    }

    /// Claim `name` for `source`. Fails if any source already holds it.
    pub fn register(&self, name: &str, source: ToolSource) -> Result<(), DelegationError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                debug!(name, existing = %existing.get(), "Capability name collision");
                Err(DelegationError::NameCollision {
                    name: name.to_string(),
                    existing: Some(existing.get().clone()),
                })
            }
            Entry::Vacant(slot) => {
                debug!(name, source = %source, "Capability registered");
                if let ToolSource::Custom { tool_id } = &source {
                    self.index_add(*tool_id, name);
                }
                slot.insert(source);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ToolSource> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Remove a custom entry. Built-in and MCP entries are refused.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, name: &str) -> Result<bool, DelegationError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(existing) if existing.get().is_immutable() => {
                Err(DelegationError::ImmutableCapability(name.to_string()))
            }
            Entry::Occupied(existing) => {
                if let ToolSource::Custom { tool_id } = existing.get() {
                    self.index_remove(*tool_id, name);
                }
                existing.remove();
                debug!(name, "Capability unregistered");
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// Remove `name` only while it is still held by `tool_id`.
    pub(crate) fn release_custom(&self, name: &str, tool_id: ToolId) -> bool {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(existing)
                if matches!(existing.get(), ToolSource::Custom { tool_id: owner } if *owner == tool_id) =>
            {
                self.index_remove(tool_id, name);
                existing.remove();
                true
            }
            _ => false,
        }
    }

    /// Names currently held by `tool_id`.
    pub fn names_of(&self, tool_id: ToolId) -> Vec<String> {
        let mut names: Vec<_> = self
            .by_tool
            .get(&tool_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn index_add(&self, tool_id: ToolId, name: &str) {
        self.by_tool.entry(tool_id).or_default().insert(name.to_string());
    }

    fn index_remove(&self, tool_id: ToolId, name: &str) {
        if let Entry::Occupied(mut names) = self.by_tool.entry(tool_id) {
            names.get_mut().remove(name);
            if names.get().is_empty() {
                names.remove();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered name with its owner, sorted by name.
    pub fn entries(&self) -> Vec<(String, ToolSource)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Bring one custom tool's entry in line with the store.
    ///
    /// `current` is the tool as the store has it now, `None` if deleted.
    pub fn sync_custom(&self, tool_id: ToolId, current: Option<&CustomTool>) {
        let keep = current.map(|t| t.name.as_str());
        for name in self.names_of(tool_id) {
            if Some(name.as_str()) != keep {
                self.release_custom(&name, tool_id);
            }
        }

        if let Some(tool) = current {
            let claim = ToolSource::Custom { tool_id };
            match self.entries.entry(tool.name.to_string()) {
                Entry::Vacant(slot) => {
                    self.index_add(tool_id, tool.name.as_str());
                    slot.insert(claim);
                }
                Entry::Occupied(existing) if *existing.get() == claim => {}
                Entry::Occupied(existing) => {
                    warn!(
                        name = %tool.name,
                        tool_id = %tool_id,
                        existing = %existing.get(),
                        "Stored custom tool shadows a registered capability name"
                    );
                }
            }
        }
    }

    /// Re-fetch one custom tool and sync its entry.
    pub async fn refresh_tool(
        &self,
        store: &dyn CustomToolRepository,
        tool_id: ToolId,
    ) -> Result<(), DelegationError> {
        let current = store.get(tool_id).await?;
        self.sync_custom(tool_id, current.as_ref());
        Ok(())
    }

    /// Full resync of custom entries against the store. Heals any missed
    /// invalidation.
    pub async fn resync(&self, store: &dyn CustomToolRepository) -> Result<(), DelegationError> {
        let tools = store.list().await?;
        let stored: HashMap<ToolId, &CustomTool> = tools.iter().map(|t| (t.id, t)).collect();

        self.entries.retain(|name, source| match source {
            ToolSource::Custom { tool_id } => {
                let keep = stored
                    .get(&*tool_id)
                    .is_some_and(|t| t.name.as_str() == name.as_str());
                if !keep {
                    self.index_remove(*tool_id, name);
                }
                keep
            }
            _ => true,
        });
        for tool in &tools {
            self.sync_custom(tool.id, Some(tool));
        }
        debug!(custom_tools = tools.len(), "Capability registry resynced");
        Ok(())
    }
}
