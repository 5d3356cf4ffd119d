// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the delegation engine against the in-memory stores.
//!
//! Covers direction gating, admission bounds under concurrency, the
//! full-text → vector fallback, capability name collisions, and cache
//! coherency through the invalidation bus.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use switchyard_core::application::{
    AdmittedError, DelegationEngine, EngineStores, ResolutionStrategy, ResolveRequest,
};
use switchyard_core::domain::agent::AgentProfile;
use switchyard_core::domain::embedding::{cosine_similarity, EmbeddingError, EmbeddingProvider};
use switchyard_core::domain::errors::DelegationError;
use switchyard_core::domain::events::InvalidationEvent;
use switchyard_core::domain::link::{AgentId, LinkDirection, LinkStatus, NewLink};
use switchyard_core::domain::node_config::NodeConfigManifest;
use switchyard_core::domain::repository::{CustomToolRepository, LinkRepository};
use switchyard_core::domain::tool::{CustomTool, NewCustomTool, ToolId, ToolName, ToolSource};
use switchyard_core::infrastructure::repositories::{
    InMemoryCustomToolRepository, InMemoryLinkRepository,
};

/// Returns the same vector for every text, or fails like an offline provider.
struct StaticEmbedder(Option<Vec<f32>>);

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match &self.0 {
            Some(v) => Ok(vec![v.clone(); texts.len()]),
            None => Err(EmbeddingError::Network("connection refused".to_string())),
        }
    }
}

struct Harness {
    links: InMemoryLinkRepository,
    tools: InMemoryCustomToolRepository,
    engine: DelegationEngine,
    router: AgentId,
    coder: AgentId,
    researcher: AgentId,
}

async fn harness(embedder: Option<Arc<dyn EmbeddingProvider>>) -> Harness {
    harness_with(&NodeConfigManifest::default(), embedder).await
}

async fn harness_with(
    config: &NodeConfigManifest,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Harness {
    let links = InMemoryLinkRepository::new();
    let tools = InMemoryCustomToolRepository::new();
    let (router, coder, researcher) = (AgentId::new(), AgentId::new(), AgentId::new());
    links.upsert_agent(AgentProfile::new(router, "router"));
    links.upsert_agent(
        AgentProfile::new(coder, "coder")
            .with_description("writes and reviews rust code")
            .with_embedding(vec![1.0, 0.0]),
    );
    links.upsert_agent(
        AgentProfile::new(researcher, "researcher")
            .with_description("summarizes papers")
            .with_embedding(vec![0.0, 1.0]),
    );

    let engine = DelegationEngine::start(
        config,
        EngineStores {
            links: Arc::new(links.clone()),
            tools: Arc::new(tools.clone()),
        },
        embedder,
    )
    .await
    .unwrap();

    Harness {
        links,
        tools,
        engine,
        router,
        coder,
        researcher,
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn test_direction_matrix() {
    let h = harness(None).await;
    let (a, b, c) = (h.router, h.coder, h.researcher);
    let d = AgentId::new();

    let links = h.engine.links();
    links.create_link(NewLink::new(a, b, LinkDirection::Outbound)).await.unwrap();
    links.create_link(NewLink::new(a, c, LinkDirection::Bidirectional)).await.unwrap();
    links.create_link(NewLink::new(a, d, LinkDirection::Inbound)).await.unwrap();

    assert!(h.engine.can_delegate(a, b).await.unwrap());
    assert!(!h.engine.can_delegate(b, a).await.unwrap());

    assert!(h.engine.can_delegate(a, c).await.unwrap());
    assert!(h.engine.can_delegate(c, a).await.unwrap());

    assert!(!h.engine.can_delegate(a, d).await.unwrap());
    assert!(h.engine.can_delegate(d, a).await.unwrap());

    assert!(!h.engine.can_delegate(b, c).await.unwrap());
}

#[tokio::test]
async fn test_single_slot_scenario() {
    let h = harness(None).await;
    h.engine
        .links()
        .create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound).with_max_concurrent(1))
        .await
        .unwrap();

    let (_, first) = h.engine.admit(h.router, h.coder).await.unwrap();
    let err = h.engine.admit(h.router, h.coder).await.unwrap_err();
    assert!(matches!(
        err,
        DelegationError::AdmissionRejected { in_flight: 1, max_concurrent: 1, .. }
    ));

    first.release();
    let (_, third) = h.engine.admit(h.router, h.coder).await.unwrap();
    assert!(!third.is_released());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let h = harness(None).await;
    let link = h
        .engine
        .links()
        .create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound).with_max_concurrent(2))
        .await
        .unwrap();

    let (_, a) = h.engine.admit(h.router, h.coder).await.unwrap();
    let (_, _b) = h.engine.admit(h.router, h.coder).await.unwrap();
    a.release();
    a.release();
    h.engine.admission().release(&a);
    assert_eq!(h.engine.admission().load(link.id).in_flight, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_delegations_never_exceed_limit() {
    const LIMIT: usize = 3;
    let h = Arc::new(harness(None).await);
    h.engine
        .links()
        .create_link(
            NewLink::new(h.router, h.coder, LinkDirection::Outbound)
                .with_max_concurrent(LIMIT as u32),
        )
        .await
        .unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let h = h.clone();
            let running = running.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                h.engine
                    .run_delegation(h.router, h.coder, None, async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ()>(())
                    })
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(AdmittedError::Rejected(DelegationError::AdmissionRejected { .. })) => {}
            Err(other) => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert!(admitted >= 1);
    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert!(h.engine.admission().snapshot().iter().all(|l| l.in_flight == 0));
}

#[tokio::test]
async fn test_text_miss_falls_back_to_vectors() {
    let h = harness(Some(Arc::new(StaticEmbedder(Some(vec![0.9, 0.1]))))).await;
    let links = h.engine.links();
    links.create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound)).await.unwrap();
    links
        .create_link(NewLink::new(h.router, h.researcher, LinkDirection::Outbound))
        .await
        .unwrap();

    let hit = h
        .engine
        .resolve(h.router, &ResolveRequest::query("rust", None))
        .await
        .unwrap();
    assert_eq!(hit.strategy, ResolutionStrategy::FullText);
    assert_eq!(hit.best().unwrap().target.agent_id, h.coder);

    let fallback = h
        .engine
        .resolve(h.router, &ResolveRequest::query("kubernetes rollout", None))
        .await
        .unwrap();
    assert_eq!(fallback.strategy, ResolutionStrategy::Vector);
    let order: Vec<_> = fallback.candidates.iter().map(|c| c.target.agent_id).collect();
    assert_eq!(order, vec![h.coder, h.researcher]);
}

#[tokio::test]
async fn test_embedding_failure_yields_empty_result() {
    let h = harness(Some(Arc::new(StaticEmbedder(None)))).await;
    h.engine
        .links()
        .create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound))
        .await
        .unwrap();

    let resolution = h
        .engine
        .resolve(h.router, &ResolveRequest::query("kubernetes rollout", None))
        .await
        .unwrap();
    assert!(resolution.is_empty());
    assert_eq!(resolution.strategy, ResolutionStrategy::None);
    assert!(matches!(
        resolution.embedding_error,
        Some(DelegationError::EmbeddingUnavailable(_))
    ));
}

#[test]
fn test_cosine_similarity_properties() {
    assert!((cosine_similarity(&[0.3, 0.4, 0.5], &[0.3, 0.4, 0.5]) - 1.0).abs() < 1e-9);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
}

#[tokio::test]
async fn test_custom_tool_name_rules() {
    let h = harness(None).await;
    let tool = |name: &str| NewCustomTool {
        name: name.to_string(),
        command: "./run.sh".to_string(),
        ..Default::default()
    };

    let err = h.engine.tools().create(tool("bash"), "admin").await.unwrap_err();
    assert!(matches!(
        err,
        DelegationError::NameCollision { ref name, existing: Some(ToolSource::BuiltIn) } if name == "bash"
    ));

    let err = h.engine.tools().create(tool("My Tool"), "admin").await.unwrap_err();
    assert!(matches!(err, DelegationError::InvalidInput(_)));
    assert!(h.tools.list().await.unwrap().is_empty());

    let view = h.engine.tools().create(tool("deploy"), "admin").await.unwrap();
    assert_eq!(
        h.engine.registry().lookup("deploy"),
        Some(ToolSource::Custom { tool_id: view.id })
    );
}

#[tokio::test]
async fn test_disable_and_invalidate_drops_cached_delegate() {
    let h = harness(None).await;
    // Written straight to the store so no creation event races the warm-up.
    let link = NewLink::new(h.router, h.coder, LinkDirection::Outbound).into_link(Utc::now());
    h.links.create(&link).await.unwrap();

    // Warm the caches.
    let engine = &h.engine;
    let (router, coder) = (h.router, h.coder);
    assert!(engine.can_delegate(router, coder).await.unwrap());
    assert_eq!(engine.resolver().delegate_targets(router).await.unwrap().len(), 1);

    // Flip the status behind the service's back, then announce it.
    let mut disabled = link.clone();
    disabled.status = LinkStatus::Disabled;
    disabled.updated_at = Utc::now();
    h.links.update(&disabled).await.unwrap();
    assert!(engine.can_delegate(router, coder).await.unwrap(), "served from cache");

    engine.bus().publish(InvalidationEvent::link(link.id));
    eventually(|| async move { !engine.can_delegate(router, coder).await.unwrap() }).await;
    assert!(engine.resolver().delegate_targets(router).await.unwrap().is_empty());

    let err = engine
        .resolve(router, &ResolveRequest::explicit(coder))
        .await
        .unwrap_err();
    assert_eq!(err, DelegationError::DelegationNotAuthorized { from: router, to: coder });
}

#[tokio::test]
async fn test_service_status_change_reaches_resolver() {
    let h = harness(None).await;
    let link = h
        .engine
        .links()
        .create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound))
        .await
        .unwrap();
    let engine = &h.engine;
    let (router, coder) = (h.router, h.coder);
    eventually(|| async move { engine.can_delegate(router, coder).await.unwrap() }).await;

    engine.links().set_status(link.id, LinkStatus::Disabled).await.unwrap();
    eventually(|| async move { !engine.can_delegate(router, coder).await.unwrap() }).await;

    engine.links().set_status(link.id, LinkStatus::Active).await.unwrap();
    eventually(|| async move { engine.can_delegate(router, coder).await.unwrap() }).await;
}

#[tokio::test]
async fn test_registry_follows_tools_written_elsewhere() {
    let h = harness(None).await;
    let now = Utc::now();
    let tool = CustomTool {
        id: ToolId::new(),
        name: ToolName::parse("remote-lint").unwrap(),
        description: String::new(),
        parameters: serde_json::Value::Null,
        command: "lint".into(),
        working_dir: None,
        timeout_seconds: 60,
        env: None,
        agent_id: None,
        enabled: true,
        created_by: "peer".into(),
        created_at: now,
        updated_at: now,
    };
    h.tools.create(&tool).await.unwrap();
    assert!(!h.engine.registry().contains("remote-lint"));

    h.engine.bus().publish(InvalidationEvent::custom_tool(tool.id));
    let registry = h.engine.registry().clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.contains("remote-lint") }
    })
    .await;
}

#[tokio::test]
async fn test_lagged_listeners_resynchronize() {
    let mut config = NodeConfigManifest::default();
    config.spec.bus.capacity = 1;
    let h = harness_with(&config, None).await;
    let engine = &h.engine;
    let (router, coder) = (h.router, h.coder);

    // Cache a negative answer, then change the store without any event.
    assert!(!engine.can_delegate(router, coder).await.unwrap());
    let link = NewLink::new(router, coder, LinkDirection::Outbound).into_link(Utc::now());
    h.links.create(&link).await.unwrap();
    let now = Utc::now();
    let tool = CustomTool {
        id: ToolId::new(),
        name: ToolName::parse("quiet-tool").unwrap(),
        description: String::new(),
        parameters: serde_json::Value::Null,
        command: "true".into(),
        working_dir: None,
        timeout_seconds: 60,
        env: None,
        agent_id: None,
        enabled: true,
        created_by: "peer".into(),
        created_at: now,
        updated_at: now,
    };
    h.tools.create(&tool).await.unwrap();
    assert!(!engine.can_delegate(router, coder).await.unwrap(), "served from cache");
    assert!(!engine.registry().contains("quiet-tool"));

    // Unrelated events overflow the one-slot bus before any listener runs.
    for _ in 0..16 {
        engine
            .bus()
            .publish(InvalidationEvent::link(switchyard_core::domain::link::LinkId::new()));
    }

    eventually(|| async move { engine.can_delegate(router, coder).await.unwrap() }).await;
    let registry = engine.registry().clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.contains("quiet-tool") }
    })
    .await;
    assert_eq!(
        registry.lookup("quiet-tool"),
        Some(ToolSource::Custom { tool_id: tool.id })
    );
}

#[tokio::test]
async fn test_directory_lists_active_delegates() {
    let h = harness(None).await;
    let links = h.engine.links();
    links.create_link(NewLink::new(h.router, h.coder, LinkDirection::Outbound)).await.unwrap();
    let off = links
        .create_link(NewLink::new(h.router, h.researcher, LinkDirection::Outbound))
        .await
        .unwrap();
    links.set_status(off.id, LinkStatus::Disabled).await.unwrap();

    let engine = &h.engine;
    let router = h.router;
    eventually(|| async move {
        let md = engine.delegate_directory(router).await.unwrap();
        md.contains("`coder`") && !md.contains("`researcher`")
    })
    .await;
}

#[tokio::test]
async fn test_shutdown_stops_publishing() {
    let h = harness(None).await;
    h.engine.shutdown().await;
    assert!(h.engine.bus().is_closed());
    assert!(!h.engine.bus().publish(InvalidationEvent::link(
        switchyard_core::domain::link::LinkId::new()
    )));
    // A second shutdown is harmless.
    h.engine.shutdown().await;
}
