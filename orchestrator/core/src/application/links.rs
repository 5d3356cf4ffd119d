// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Link Service
//!
//! Write path for delegation links. Every committed mutation publishes one
//! [`InvalidationEvent`] per affected link so resolvers and the admission
//! controller can re-read the store.
//!
//! Team-managed links are owned by team membership: they accept status
//! changes here, and are otherwise only removed through
//! [`LinkService::delete_team_links_for_agent`].

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::errors::DelegationError;
use crate::domain::events::InvalidationEvent;
use crate::domain::link::{
    AgentId, DelegationLink, LinkId, LinkStatus, LinkUpdate, NewLink, TeamId,
};
use crate::domain::repository::LinkRepository;
use crate::infrastructure::event_bus::InvalidationBus;

pub struct LinkService {
    store: Arc<dyn LinkRepository>,
    bus: InvalidationBus,
}

impl LinkService {
    pub fn new(store: Arc<dyn LinkRepository>, bus: InvalidationBus) -> Self {
        Self { store, bus }
    }

    pub async fn create_link(&self, input: NewLink) -> Result<DelegationLink, DelegationError> {
        input.validate()?;
        let link = input.into_link(Utc::now());
        self.store.create(&link).await?;
        self.bus.publish(InvalidationEvent::link(link.id));
        info!(
            link_id = %link.id,
            source = %link.source_agent_id,
            target = %link.target_agent_id,
            direction = link.direction.as_str(),
            "Delegation link created"
        );
        // Re-read for the display fields the store joins in.
        Ok(self.store.get(link.id).await?.unwrap_or(link))
    }

    pub async fn update_link(
        &self,
        id: LinkId,
        update: LinkUpdate,
    ) -> Result<DelegationLink, DelegationError> {
        if update.is_empty() {
            return Err(DelegationError::invalid("link update changes nothing"));
        }
        let mut link = self.require(id).await?;
        if link.is_team_managed() && !update.is_status_only() {
            return Err(DelegationError::invalid(format!(
                "link {} is managed by its team; only its status can change",
                id
            )));
        }
        update.apply_to(&mut link, Utc::now());
        self.store.update(&link).await?;
        self.bus.publish(InvalidationEvent::link(id));
        info!(link_id = %id, status = link.status.as_str(), "Delegation link updated");
        Ok(link)
    }

    pub async fn set_status(
        &self,
        id: LinkId,
        status: LinkStatus,
    ) -> Result<DelegationLink, DelegationError> {
        self.update_link(
            id,
            LinkUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Returns whether a link was removed. Team-managed links are refused.
    pub async fn delete_link(&self, id: LinkId) -> Result<bool, DelegationError> {
        let Some(link) = self.store.get(id).await? else {
            return Ok(false);
        };
        if link.is_team_managed() {
            return Err(DelegationError::invalid(format!(
                "link {} is managed by its team; remove the agent from the team instead",
                id
            )));
        }
        let removed = self.store.delete(id).await?;
        if removed {
            self.bus.publish(InvalidationEvent::link(id));
            info!(link_id = %id, "Delegation link deleted");
        }
        Ok(removed)
    }

    /// Cascade for an agent leaving a team.
    pub async fn delete_team_links_for_agent(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Vec<LinkId>, DelegationError> {
        let removed = self.store.delete_team_links_for_agent(team_id, agent_id).await?;
        for id in &removed {
            self.bus.publish(InvalidationEvent::link(*id));
        }
        info!(
            team_id = %team_id,
            agent_id = %agent_id,
            removed = removed.len(),
            "Team links removed for agent"
        );
        Ok(removed)
    }

    pub async fn get_link(&self, id: LinkId) -> Result<Option<DelegationLink>, DelegationError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_links_by_source(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, DelegationError> {
        Ok(self.store.list_by_source(agent_id, include_disabled).await?)
    }

    pub async fn list_links_by_target(
        &self,
        agent_id: AgentId,
        include_disabled: bool,
    ) -> Result<Vec<DelegationLink>, DelegationError> {
        Ok(self.store.list_by_target(agent_id, include_disabled).await?)
    }

    async fn require(&self, id: LinkId) -> Result<DelegationLink, DelegationError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DelegationError::NotFound(format!("link {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentProfile, TeamProfile};
    use crate::domain::link::LinkDirection;
    use crate::infrastructure::event_bus::InvalidationReceiver;
    use crate::infrastructure::repositories::InMemoryLinkRepository;

    struct Fixture {
        store: InMemoryLinkRepository,
        service: LinkService,
        events: InvalidationReceiver,
        a: AgentId,
        b: AgentId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryLinkRepository::new();
        let (a, b) = (AgentId::new(), AgentId::new());
        store.upsert_agent(AgentProfile::new(a, "planner"));
        store.upsert_agent(AgentProfile::new(b, "coder").with_display_name("Coder"));
        let bus = InvalidationBus::new(32);
        let events = bus.subscribe();
        Fixture {
            service: LinkService::new(Arc::new(store.clone()), bus),
            store,
            events,
            a,
            b,
        }
    }

    #[tokio::test]
    async fn test_create_publishes_and_projects_display() {
        let mut f = fixture();
        let link = f
            .service
            .create_link(NewLink::new(f.a, f.b, LinkDirection::Outbound))
            .await
            .unwrap();
        assert_eq!(link.display.target_key.as_deref(), Some("coder"));
        assert_eq!(f.events.try_recv().unwrap(), InvalidationEvent::link(link.id));
    }

    #[tokio::test]
    async fn test_self_link_rejected() {
        let mut f = fixture();
        let err = f
            .service
            .create_link(NewLink::new(f.a, f.a, LinkDirection::Bidirectional))
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_and_status() {
        let mut f = fixture();
        let link = f
            .service
            .create_link(NewLink::new(f.a, f.b, LinkDirection::Outbound))
            .await
            .unwrap();
        f.events.try_recv().unwrap();

        let updated = f
            .service
            .update_link(
                link.id,
                LinkUpdate {
                    max_concurrent: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.max_concurrent, 2);

        let disabled = f.service.set_status(link.id, LinkStatus::Disabled).await.unwrap();
        assert!(!disabled.is_active());
        assert_eq!(f.events.try_recv().unwrap(), InvalidationEvent::link(link.id));
        assert_eq!(f.events.try_recv().unwrap(), InvalidationEvent::link(link.id));

        assert!(f.service.list_links_by_source(f.a, false).await.unwrap().is_empty());
        assert_eq!(f.service.list_links_by_source(f.a, true).await.unwrap().len(), 1);

        let err = f
            .service
            .update_link(link.id, LinkUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));

        let err = f
            .service
            .set_status(LinkId::new(), LinkStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_team_links_are_status_only() {
        let f = fixture();
        let team = TeamId::new();
        f.store.upsert_team(TeamProfile {
            id: team,
            name: "platform".into(),
        });
        let link = f
            .service
            .create_link(NewLink::new(f.a, f.b, LinkDirection::Bidirectional).with_team(team))
            .await
            .unwrap();
        assert_eq!(link.display.team_name.as_deref(), Some("platform"));

        let err = f
            .service
            .update_link(
                link.id,
                LinkUpdate {
                    direction: Some(LinkDirection::Outbound),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));
        assert!(f.service.set_status(link.id, LinkStatus::Disabled).await.is_ok());
        assert!(f.service.delete_link(link.id).await.is_err());

        let err = f
            .service
            .create_link(NewLink::new(f.a, f.b, LinkDirection::Outbound).with_team(team))
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_team_cascade_publishes_each_link() {
        let mut f = fixture();
        let team = TeamId::new();
        let c = AgentId::new();
        let first = f
            .service
            .create_link(NewLink::new(f.a, f.b, LinkDirection::Bidirectional).with_team(team))
            .await
            .unwrap();
        let second = f
            .service
            .create_link(NewLink::new(c, f.a, LinkDirection::Outbound).with_team(team))
            .await
            .unwrap();
        let manual = f
            .service
            .create_link(NewLink::new(f.a, c, LinkDirection::Outbound))
            .await
            .unwrap();
        while f.events.try_recv().is_ok() {}

        let mut removed = f.service.delete_team_links_for_agent(team, f.a).await.unwrap();
        removed.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(removed, expected);

        let mut published = vec![
            f.events.try_recv().unwrap().link_id().unwrap(),
            f.events.try_recv().unwrap().link_id().unwrap(),
        ];
        published.sort();
        assert_eq!(published, expected);
        assert!(f.service.get_link(manual.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_link_is_false() {
        let f = fixture();
        assert!(!f.service.delete_link(LinkId::new()).await.unwrap());
    }
}
