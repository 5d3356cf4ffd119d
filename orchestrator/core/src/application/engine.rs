// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Engine
//!
//! Composition root for one process. Owns the invalidation bus and wires
//! every component to it:
//!
//! - the resolver drops cached link views on link events and flushes on lag
//! - the registry re-reads one tool on tool events and fully resyncs on lag
//! - the admission controller drops idle per-link state on link events
//! - a timer resyncs the registry against the tool store periodically
//!
//! [`DelegationEngine::shutdown`] closes the bus, lets the listeners drain
//! what is already queued, then stops the timer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::admission::{AdmissionController, AdmissionTicket, AdmittedError};
use crate::application::capability_registry::CapabilityRegistry;
use crate::application::custom_tools::CustomToolService;
use crate::application::directory::render_delegate_directory;
use crate::application::links::LinkService;
use crate::application::resolution::{Resolution, ResolutionEngine, ResolveRequest};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::errors::DelegationError;
use crate::domain::events::InvalidationEvent;
use crate::domain::link::{AgentId, DelegationLink};
use crate::domain::node_config::NodeConfigManifest;
use crate::domain::repository::{CustomToolRepository, LinkRepository};
use crate::infrastructure::event_bus::{EventBusError, InvalidationBus, InvalidationReceiver};
use crate::infrastructure::secrets::EnvCipher;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The two stores the engine runs against.
#[derive(Clone)]
pub struct EngineStores {
    pub links: Arc<dyn LinkRepository>,
    pub tools: Arc<dyn CustomToolRepository>,
}

pub struct DelegationEngine {
    bus: InvalidationBus,
    registry: Arc<CapabilityRegistry>,
    admission: Arc<AdmissionController>,
    resolver: Arc<ResolutionEngine>,
    links: LinkService,
    tools: CustomToolService,
    cancel: CancellationToken,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    resync: Mutex<Option<JoinHandle<()>>>,
}

impl DelegationEngine {
    /// Build every component, load existing custom tools into the registry
    /// and start the background listeners. Must run inside a tokio runtime.
    pub async fn start(
        config: &NodeConfigManifest,
        stores: EngineStores,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> anyhow::Result<Self> {
        let spec = &config.spec;
        let bus = InvalidationBus::new(spec.bus.capacity);

        let registry = Arc::new(
            CapabilityRegistry::from_config(&spec.tools)
                .context("Configured built-in and MCP tool names must be unique")?,
        );
        registry
            .resync(&*stores.tools)
            .await
            .context("Failed to load custom tools into the capability registry")?;

        let cipher = match &spec.tools.env_key {
            Some(key) => EnvCipher::from_config_value(key)
                .context("Failed to load the tool environment sealing key")?,
            None => EnvCipher::ephemeral(),
        };

        let admission = Arc::new(AdmissionController::new());
        let resolver = Arc::new(ResolutionEngine::new(
            stores.links.clone(),
            admission.clone(),
            embedder,
            spec.resolution.clone(),
            spec.cache.link_ttl(),
        ));

        let cancel = CancellationToken::new();
        let listeners = vec![
            tokio::spawn(listen(
                "resolver",
                bus.subscribe(),
                cancel.clone(),
                {
                    let resolver = resolver.clone();
                    move |event| {
                        let resolver = resolver.clone();
                        async move { resolver.handle_invalidation(&event).await }
                    }
                },
                {
                    let resolver = resolver.clone();
                    move || {
                        let resolver = resolver.clone();
                        async move { resolver.flush_cache() }
                    }
                },
            )),
            tokio::spawn(listen(
                "registry",
                bus.subscribe(),
                cancel.clone(),
                {
                    let registry = registry.clone();
                    let store = stores.tools.clone();
                    move |event: InvalidationEvent| {
                        let registry = registry.clone();
                        let store = store.clone();
                        async move {
                            let Some(tool_id) = event.tool_id() else {
                                return;
                            };
                            if let Err(e) = registry.refresh_tool(&*store, tool_id).await {
                                warn!(tool_id = %tool_id, error = %e, "Failed to refresh custom tool");
                            }
                        }
                    }
                },
                {
                    let registry = registry.clone();
                    let store = stores.tools.clone();
                    move || {
                        let registry = registry.clone();
                        let store = store.clone();
                        async move {
                            if let Err(e) = registry.resync(&*store).await {
                                warn!(error = %e, "Capability registry resync failed");
                            }
                        }
                    }
                },
            )),
            tokio::spawn(listen(
                "admission",
                bus.subscribe(),
                cancel.clone(),
                {
                    let admission = admission.clone();
                    move |event: InvalidationEvent| {
                        let admission = admission.clone();
                        async move {
                            if let Some(link_id) = event.link_id() {
                                admission.evict_if_idle(link_id);
                            }
                        }
                    }
                },
                || async {},
            )),
        ];

        let resync = tokio::spawn(resync_periodically(
            registry.clone(),
            stores.tools.clone(),
            spec.cache.registry_resync(),
            cancel.clone(),
        ));

        info!(
            node = %spec.node.id,
            capabilities = registry.len(),
            link_ttl_secs = spec.cache.link_ttl().as_secs(),
            "Delegation engine started"
        );

        Ok(Self {
            links: LinkService::new(stores.links.clone(), bus.clone()),
            tools: CustomToolService::new(stores.tools, registry.clone(), bus.clone(), cipher),
            bus,
            registry,
            admission,
            resolver,
            cancel,
            listeners: Mutex::new(listeners),
            resync: Mutex::new(Some(resync)),
        })
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn resolver(&self) -> &Arc<ResolutionEngine> {
        &self.resolver
    }

    pub fn links(&self) -> &LinkService {
        &self.links
    }

    pub fn tools(&self) -> &CustomToolService {
        &self.tools
    }

    pub async fn resolve(
        &self,
        from: AgentId,
        request: &ResolveRequest,
    ) -> Result<Resolution, DelegationError> {
        self.resolver.resolve(from, request).await
    }

    pub async fn can_delegate(&self, from: AgentId, to: AgentId) -> Result<bool, DelegationError> {
        self.resolver.can_delegate(from, to).await
    }

    /// Look up the authorizing link and take a slot on it.
    pub async fn admit(
        &self,
        from: AgentId,
        to: AgentId,
    ) -> Result<(DelegationLink, AdmissionTicket), DelegationError> {
        let link = self
            .resolver
            .get_link_between(from, to)
            .await?
            .ok_or(DelegationError::DelegationNotAuthorized { from, to })?;
        let ticket = self.admission.acquire(&link)?;
        Ok((link, ticket))
    }

    /// Run `work` under a slot on the `from → to` link.
    pub async fn run_delegation<F, T, E>(
        &self,
        from: AgentId,
        to: AgentId,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T, AdmittedError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let link = self
            .resolver
            .get_link_between(from, to)
            .await
            .map_err(AdmittedError::Rejected)?
            .ok_or(AdmittedError::Rejected(
                DelegationError::DelegationNotAuthorized { from, to },
            ))?;
        self.admission.run_admitted(&link, timeout, work).await
    }

    /// Markdown directory of `from`'s delegate targets.
    pub async fn delegate_directory(&self, from: AgentId) -> Result<String, DelegationError> {
        let targets = self.resolver.delegate_targets(from).await?;
        Ok(render_delegate_directory(&targets))
    }

    /// Close the bus, drain the listeners, stop the resync timer.
    pub async fn shutdown(&self) {
        self.bus.close();

        let listeners = std::mem::take(&mut *self.listeners.lock());
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(listeners)).await;
        if drained.is_err() {
            warn!("Invalidation listeners did not drain in time; cancelling");
        }
        self.cancel.cancel();

        let resync = self.resync.lock().take();
        if let Some(handle) = resync {
            let _ = handle.await;
        }
        info!("Delegation engine stopped");
    }
}

impl Drop for DelegationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen<H, HF, L, LF>(
    name: &'static str,
    mut receiver: InvalidationReceiver,
    cancel: CancellationToken,
    on_event: H,
    on_lag: L,
) where
    H: Fn(InvalidationEvent) -> HF,
    HF: Future<Output = ()>,
    L: Fn() -> LF,
    LF: Future<Output = ()>,
{
    debug!(listener = name, "Invalidation listener started");
    let mut handled = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => next,
        };
        match next {
            Ok(event) => {
                handled += 1;
                on_event(event).await;
            }
            Err(EventBusError::Lagged(missed)) => {
                warn!(listener = name, missed, "Invalidation listener lagged; resynchronizing");
                metrics::counter!("switchyard_bus_lagged_events_total", "listener" => name)
                    .increment(missed);
                on_lag().await;
            }
            Err(EventBusError::Closed) => break,
            Err(EventBusError::Empty) => {}
        }
    }
    debug!(listener = name, handled, "Invalidation listener stopped");
}

async fn resync_periodically(
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn CustomToolRepository>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period.max(Duration::from_secs(1)));
    // The first tick fires immediately; the registry was just loaded.
    tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = registry.resync(&*store).await {
                    warn!(error = %e, "Periodic capability registry resync failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
