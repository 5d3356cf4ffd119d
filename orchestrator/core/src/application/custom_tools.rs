// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Custom Tool Service
//!
//! Write path for operator-defined tools. A name is claimed in the
//! [`CapabilityRegistry`] before the store is touched, so a collision with a
//! built-in or MCP name fails without a write. The store's unique constraint
//! on names is the backstop for claims racing across processes; a conflict
//! there is reported as the same `NameCollision`.
//!
//! Environment maps are sealed before they reach the store and are never
//! part of a [`CustomToolView`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::application::capability_registry::CapabilityRegistry;
use crate::domain::errors::DelegationError;
use crate::domain::events::InvalidationEvent;
use crate::domain::link::AgentId;
use crate::domain::repository::{CustomToolRepository, RepositoryError, TOOL_NAME_CONSTRAINT};
use crate::domain::tool::{
    normalize_timeout, CustomTool, CustomToolUpdate, CustomToolView, NewCustomTool, SealedEnv,
    ToolId, ToolName, ToolSource,
};
use crate::infrastructure::event_bus::InvalidationBus;
use crate::infrastructure::secrets::EnvCipher;

pub struct CustomToolService {
    store: Arc<dyn CustomToolRepository>,
    registry: Arc<CapabilityRegistry>,
    bus: InvalidationBus,
    cipher: EnvCipher,
}

impl CustomToolService {
    pub fn new(
        store: Arc<dyn CustomToolRepository>,
        registry: Arc<CapabilityRegistry>,
        bus: InvalidationBus,
        cipher: EnvCipher,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            cipher,
        }
    }

    pub async fn create(
        &self,
        input: NewCustomTool,
        created_by: &str,
    ) -> Result<CustomToolView, DelegationError> {
        let name = input.validate()?;
        let env = self.seal(input.env.as_ref())?;
        let id = ToolId::new();

        self.registry
            .register(name.as_str(), ToolSource::Custom { tool_id: id })?;

        let now = Utc::now();
        let tool = CustomTool {
            id,
            name: name.clone(),
            description: input.description,
            parameters: input.parameters,
            command: input.command,
            working_dir: input.working_dir,
            timeout_seconds: normalize_timeout(input.timeout_seconds),
            env,
            agent_id: input.agent_id,
            enabled: input.enabled,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.create(&tool).await {
            self.registry.release_custom(name.as_str(), id);
            return Err(self.write_error(e, &name).await);
        }

        self.bus.publish(InvalidationEvent::custom_tool(id));
        info!(tool_id = %id, name = %name, created_by, "Custom tool created");
        Ok(tool.view())
    }

    /// Partial update. A rename claims the new name before writing and
    /// releases the old one only once the write has landed.
    pub async fn update(
        &self,
        id: ToolId,
        update: CustomToolUpdate,
    ) -> Result<CustomToolView, DelegationError> {
        let requested = update.validate()?;
        let mut tool = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DelegationError::NotFound(format!("custom tool {}", id)))?;

        let renamed = requested.filter(|name| *name != tool.name);
        let resealed = match &update.env {
            Some(env) => Some(self.seal(Some(env))?),
            None => None,
        };

        if let Some(name) = &renamed {
            self.registry
                .register(name.as_str(), ToolSource::Custom { tool_id: id })?;
        }

        let old_name = tool.name.clone();
        update.apply_to(&mut tool, renamed.clone(), Utc::now());
        if let Some(env) = resealed {
            tool.env = env;
        }

        if let Err(e) = self.store.update(&tool).await {
            if let Some(name) = &renamed {
                self.registry.release_custom(name.as_str(), id);
                return Err(self.write_error(e, name).await);
            }
            return Err(e.into());
        }

        if renamed.is_some() {
            self.registry.release_custom(old_name.as_str(), id);
        }
        self.bus.publish(InvalidationEvent::custom_tool(id));
        info!(tool_id = %id, name = %tool.name, "Custom tool updated");
        Ok(tool.view())
    }

    /// Returns whether a tool was removed.
    pub async fn delete(&self, id: ToolId) -> Result<bool, DelegationError> {
        let Some(tool) = self.store.get(id).await? else {
            return Ok(false);
        };
        let removed = self.store.delete(id).await?;
        if removed {
            self.registry.release_custom(tool.name.as_str(), id);
            self.bus.publish(InvalidationEvent::custom_tool(id));
            info!(tool_id = %id, name = %tool.name, "Custom tool deleted");
        }
        Ok(removed)
    }

    pub async fn get(&self, id: ToolId) -> Result<Option<CustomToolView>, DelegationError> {
        Ok(self.store.get(id).await?.map(|t| t.view()))
    }

    /// Tools visible to `agent_id`; `None` lists only unscoped tools.
    pub async fn list(&self, agent_id: Option<AgentId>) -> Result<Vec<CustomToolView>, DelegationError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .filter(|t| t.visible_to(agent_id))
            .map(CustomTool::view)
            .collect())
    }

    /// Decrypted environment for the runtime that executes the tool.
    pub async fn unsealed_env(&self, id: ToolId) -> Result<HashMap<String, String>, DelegationError> {
        let tool = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DelegationError::NotFound(format!("custom tool {}", id)))?;
        match &tool.env {
            Some(sealed) => self.cipher.open(sealed).map_err(|e| {
                warn!(tool_id = %id, error = %e, "Failed to open sealed tool environment");
                DelegationError::StoreUnavailable(format!("tool environment: {}", e))
            }),
            None => Ok(HashMap::new()),
        }
    }

    fn seal(&self, env: Option<&HashMap<String, String>>) -> Result<Option<SealedEnv>, DelegationError> {
        match env {
            Some(env) if !env.is_empty() => self
                .cipher
                .seal(env)
                .map(Some)
                .map_err(|e| DelegationError::StoreUnavailable(format!("tool environment: {}", e))),
            _ => Ok(None),
        }
    }

    async fn write_error(&self, err: RepositoryError, name: &ToolName) -> DelegationError {
        if !err.is_conflict_on(TOOL_NAME_CONSTRAINT) {
            return err.into();
        }
        // Another writer got the name into the store first.
        let existing = match self.store.get_by_name(name.as_str()).await {
            Ok(Some(other)) => {
                self.registry.sync_custom(other.id, Some(&other));
                Some(ToolSource::Custom { tool_id: other.id })
            }
            Ok(None) => self.registry.lookup(name.as_str()),
            Err(e) => {
                warn!(name = %name, error = %e, "Could not read back the conflicting tool");
                self.registry.lookup(name.as_str())
            }
        };
        DelegationError::NameCollision {
            name: name.to_string(),
            existing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node_config::ToolsConfig;
    use crate::infrastructure::repositories::InMemoryCustomToolRepository;
    use serde_json::json;

    struct Fixture {
        store: InMemoryCustomToolRepository,
        registry: Arc<CapabilityRegistry>,
        bus: InvalidationBus,
        service: CustomToolService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryCustomToolRepository::new();
        let registry = Arc::new(
            CapabilityRegistry::from_config(&ToolsConfig {
                builtin: vec!["bash".into()],
                mcp: vec![],
                env_key: None,
            })
            .unwrap(),
        );
        let bus = InvalidationBus::new(16);
        let service = CustomToolService::new(
            Arc::new(store.clone()),
            registry.clone(),
            bus.clone(),
            EnvCipher::ephemeral(),
        );
        Fixture {
            store,
            registry,
            bus,
            service,
        }
    }

    fn input(name: &str) -> NewCustomTool {
        NewCustomTool {
            name: name.into(),
            command: "./run.sh".into(),
            parameters: json!({"type": "object"}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_builtin_name_collides_without_store_write() {
        let f = fixture();
        let err = f.service.create(input("bash"), "admin").await.unwrap_err();
        assert_eq!(
            err,
            DelegationError::NameCollision {
                name: "bash".into(),
                existing: Some(ToolSource::BuiltIn),
            }
        );
        assert!(f.store.list().await.unwrap().is_empty());
        assert_eq!(f.registry.lookup("bash"), Some(ToolSource::BuiltIn));
    }

    #[tokio::test]
    async fn test_invalid_slug_rejected_before_store_write() {
        let f = fixture();
        let err = f.service.create(input("My Tool"), "admin").await.unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));
        assert!(f.store.list().await.unwrap().is_empty());
        assert!(!f.registry.contains("My Tool"));
    }

    #[tokio::test]
    async fn test_create_registers_and_publishes() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let mut tool = input("deploy");
        tool.timeout_seconds = Some(0);
        tool.env = Some(HashMap::from([("TOKEN".to_string(), "s3cret".to_string())]));

        let view = f.service.create(tool, "admin").await.unwrap();
        assert_eq!(view.timeout_seconds, 60);
        assert!(view.has_env);
        assert_eq!(
            f.registry.lookup("deploy"),
            Some(ToolSource::Custom { tool_id: view.id })
        );
        assert_eq!(rx.recv().await.unwrap(), InvalidationEvent::custom_tool(view.id));

        let stored = f.store.get(view.id).await.unwrap().unwrap();
        assert!(!stored.env.as_ref().unwrap().ciphertext().contains("s3cret"));
        let env = f.service.unsealed_env(view.id).await.unwrap();
        assert_eq!(env.get("TOKEN").map(String::as_str), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_store_failure_releases_claim() {
        let f = fixture();
        f.store.set_unavailable(true);
        let err = f.service.create(input("deploy"), "admin").await.unwrap_err();
        assert!(matches!(err, DelegationError::StoreUnavailable(_)));
        assert!(!f.registry.contains("deploy"));
    }

    #[tokio::test]
    async fn test_store_conflict_reported_as_collision() {
        let f = fixture();
        // Written by another process; this registry never saw it.
        let other = f.service.create(input("shared"), "peer").await.unwrap();
        f.registry.release_custom("shared", other.id);

        let err = f.service.create(input("shared"), "admin").await.unwrap_err();
        assert_eq!(
            err,
            DelegationError::NameCollision {
                name: "shared".into(),
                existing: Some(ToolSource::Custom { tool_id: other.id }),
            }
        );
        assert_eq!(
            f.registry.lookup("shared"),
            Some(ToolSource::Custom { tool_id: other.id })
        );
    }

    /// Rejects every name and never finds the record that holds it.
    struct ConflictingStore;

    #[async_trait::async_trait]
    impl CustomToolRepository for ConflictingStore {
        async fn create(&self, tool: &CustomTool) -> Result<(), RepositoryError> {
            Err(RepositoryError::Conflict {
                constraint: TOOL_NAME_CONSTRAINT.to_string(),
                detail: format!("name {} taken", tool.name),
            })
        }
        async fn get(&self, _id: ToolId) -> Result<Option<CustomTool>, RepositoryError> {
            Ok(None)
        }
        async fn get_by_name(&self, _name: &str) -> Result<Option<CustomTool>, RepositoryError> {
            Ok(None)
        }
        async fn update(&self, _tool: &CustomTool) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn delete(&self, _id: ToolId) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn list(&self) -> Result<Vec<CustomTool>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_conflict_with_vanished_owner_names_no_owner() {
        let registry = Arc::new(CapabilityRegistry::new());
        let service = CustomToolService::new(
            Arc::new(ConflictingStore),
            registry.clone(),
            InvalidationBus::new(4),
            EnvCipher::ephemeral(),
        );

        let err = service.create(input("ghost"), "admin").await.unwrap_err();
        assert_eq!(
            err,
            DelegationError::NameCollision {
                name: "ghost".into(),
                existing: None,
            }
        );
        assert!(err.to_string().contains("unknown owner"));
        assert!(!registry.contains("ghost"));
    }

    #[tokio::test]
    async fn test_rename_moves_claim() {
        let f = fixture();
        let view = f.service.create(input("fetch"), "admin").await.unwrap();

        let err = f
            .service
            .update(
                view.id,
                CustomToolUpdate {
                    name: Some("bash".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::NameCollision { .. }));
        assert!(f.registry.contains("fetch"));

        let renamed = f
            .service
            .update(
                view.id,
                CustomToolUpdate {
                    name: Some("fetch-v2".into()),
                    timeout_seconds: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name.as_str(), "fetch-v2");
        assert_eq!(renamed.timeout_seconds, 5);
        assert!(!f.registry.contains("fetch"));
        assert!(f.registry.contains("fetch-v2"));
    }

    #[tokio::test]
    async fn test_delete_frees_name() {
        let f = fixture();
        let view = f.service.create(input("lint"), "admin").await.unwrap();
        assert!(f.service.delete(view.id).await.unwrap());
        assert!(!f.registry.contains("lint"));
        assert!(!f.service.delete(view.id).await.unwrap());

        assert!(f.service.create(input("lint"), "admin").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_respects_agent_scope() {
        let f = fixture();
        let owner = AgentId::new();
        let mut scoped = input("scoped");
        scoped.agent_id = Some(owner);
        f.service.create(scoped, "admin").await.unwrap();
        f.service.create(input("shared"), "admin").await.unwrap();

        assert_eq!(f.service.list(Some(owner)).await.unwrap().len(), 2);
        assert_eq!(f.service.list(Some(AgentId::new())).await.unwrap().len(), 1);
        assert_eq!(f.service.list(None).await.unwrap().len(), 1);
    }
}
