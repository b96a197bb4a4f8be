//! [`Engine`]: orchestrator owning every live [`Host`] in a production and
//! applying configuration snapshots to them.
//!
//! Grounded on `agent_lifecycle_manager.rs` (DI'd trait objects, an
//! `Arc<RwLock<HashMap<...>>>` registry of live units) plus
//! `deployment_manager.rs`/`hot_reload_manager.rs` (dependency-ordered
//! startup, diff-based reload) for the overall shape; the registry/host
//! contract itself is [`crate::router::TargetRegistry`] and
//! [`crate::host::Host`].

pub mod snapshot;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapter::mllp::{MllpInboundAdapter, MllpInboundConfig, MllpOutboundAdapter, MllpOutboundConfig, ReplyCodeActions};
use crate::adapter::{file, http, AdapterError, OutboundAdapter};
use crate::domain::{
    AdapterSettings, AdapterType, Connection, ConnectionKind, HostSettings, ItemConfig, ItemConfigError, ItemKind,
    ItemName,
};
use crate::host::operation::OperationHandler;
use crate::host::{Host, HostError, HostMetrics, MessageHandler};
use crate::router::{RouterConfig, RouterHost, RouterMetrics, TargetRegistry, Transform, ValidationMode};
use crate::trace_store::{TraceStore, TraceWriter};

use snapshot::{ProductionSnapshot, RouterRuleSet, SnapshotError};

/// Errors raised by the engine's control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The snapshot itself failed validation before anything was built.
    #[error("invalid configuration snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),
    /// An item's own cross-field validation failed.
    #[error(transparent)]
    InvalidItem(#[from] ItemConfigError),
    /// No production is deployed under this name.
    #[error("no production named '{0}' is deployed")]
    UnknownProduction(String),
    /// No item of this name exists in the named production.
    #[error("no item named '{0}' in production '{1}'")]
    UnknownItem(String, String),
    /// A host failed to start during deploy/start/reload.
    #[error("item '{item}' failed to start: {source}")]
    HostStartFailed {
        /// The item that failed.
        item: String,
        /// The underlying host error.
        #[source]
        source: HostError,
    },
    /// An adapter could not be built from its settings (bad bind address, etc).
    #[error("item '{item}' adapter failed to start: {source}")]
    AdapterStartFailed {
        /// The item whose adapter failed.
        item: String,
        /// The underlying adapter error.
        #[source]
        source: AdapterError,
    },
}

/// Concurrent `item_name → Host` map, scoped to one production.
///
/// Per SPEC_FULL.md §9 ("the `ServiceRegistry` is per-engine, not
/// per-process"), each deployed production owns its own registry rather
/// than sharing one map across productions.
pub struct ServiceRegistry {
    hosts: DashMap<String, Arc<Host>>,
}

impl ServiceRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self { hosts: DashMap::new() })
    }

    fn insert(&self, name: &ItemName, host: Arc<Host>) {
        self.hosts.insert(name.to_string(), host);
    }

    fn remove(&self, name: &ItemName) {
        self.hosts.remove(name.as_ref());
    }
}

impl TargetRegistry for ServiceRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

/// Snapshot of one item's counters, surfaced through [`Engine::item_metrics`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ItemMetrics {
    /// Envelopes that completed successfully.
    pub processed: u64,
    /// Envelopes dropped by the queue's overflow policy.
    pub dropped: u64,
    /// Times the host has been restarted by its supervisor.
    pub restarts: u64,
    /// Envelopes that ended in an error trace row.
    pub errors: u64,
    /// Router-only: envelopes for which no rule matched and no default applied.
    pub no_match: Option<u64>,
    /// Router-only: envelopes dropped for failing structural validation.
    pub parse_failures: Option<u64>,
    /// Router-only: rules disabled at load time for a parse failure.
    pub disabled_rules: Option<u64>,
}

struct AdapterTask {
    item_name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One deployed production: its live hosts, their registry, and the
/// background ingress tasks feeding them.
struct Production {
    snapshot: ProductionSnapshot,
    registry: Arc<ServiceRegistry>,
    hosts: HashMap<String, Arc<Host>>,
    operation_handlers: HashMap<String, Arc<OperationHandler>>,
    router_metrics: HashMap<String, Arc<RouterMetrics>>,
    host_metrics: HashMap<String, Arc<HostMetrics>>,
    start_order: Vec<String>,
    adapters: Vec<AdapterTask>,
}

/// Orchestrator owning every deployed production's live hosts.
///
/// Holds one shared [`TraceStore`]/[`TraceWriter`] pair across all
/// productions (trace data is project-scoped by `project_id`, not by a
/// separate store per production) and runs a single background
/// [`crate::trace_store::reconciler::SessionReconciler`] over it.
pub struct Engine {
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    productions: RwLock<HashMap<String, Production>>,
    reconciler_handle: JoinHandle<()>,
}

impl Engine {
    /// Builds an engine backed by `trace_store`, with no productions deployed
    /// yet. Spawns the session reconciler immediately.
    #[must_use]
    pub fn new(trace_store: Arc<dyn TraceStore>, reconcile_interval: Duration) -> Self {
        let trace_writer = TraceWriter::spawn(Arc::clone(&trace_store), 1024);
        let reconciler = crate::trace_store::reconciler::SessionReconciler::new(Arc::clone(&trace_store), reconcile_interval);
        let reconciler_handle = reconciler.spawn();
        Self {
            trace_store,
            trace_writer,
            productions: RwLock::new(HashMap::new()),
            reconciler_handle,
        }
    }

    /// Deploys `snapshot` under `project_id`: validates it, builds every
    /// enabled item's host, wires default targets/error targets/routing
    /// rules, and starts every host in dependency order
    /// (operations → processes → services).
    ///
    /// Replaces any production already deployed under the same name — the
    /// caller is responsible for calling [`Engine::stop`] first if a live
    /// cutover rather than a cold redeploy is wanted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSnapshot`]/[`EngineError::InvalidItem`]
    /// if the snapshot itself is malformed, or
    /// [`EngineError::HostStartFailed`]/[`EngineError::AdapterStartFailed`]
    /// if a host or its adapter could not start — in which case every host
    /// already started for this deploy is stopped, in reverse start order,
    /// before the error is returned.
    #[instrument(skip(self, snapshot), fields(project_id = %project_id))]
    pub async fn deploy(&self, project_id: impl Into<String>, snapshot: ProductionSnapshot) -> Result<(), EngineError> {
        let project_id = project_id.into();
        snapshot.validate()?;
        for item in &snapshot.items {
            item.validate()?;
        }

        let registry = ServiceRegistry::new();
        let mut production = Production {
            snapshot,
            registry,
            hosts: HashMap::new(),
            operation_handlers: HashMap::new(),
            router_metrics: HashMap::new(),
            host_metrics: HashMap::new(),
            start_order: Vec::new(),
            adapters: Vec::new(),
        };

        self.build_all_hosts(&project_id, &mut production)?;
        self.wire_error_targets(&production);
        production.start_order = start_order(&production.snapshot);

        if let Err(err) = self.start_production(&project_id, &mut production).await {
            self.stop_production(&mut production).await;
            return Err(err);
        }

        self.productions.write().await.insert(project_id, production);
        Ok(())
    }

    fn build_all_hosts(&self, project_id: &str, production: &mut Production) -> Result<(), EngineError> {
        let items: Vec<ItemConfig> = production.snapshot.items.iter().filter(|i| i.enabled).cloned().collect();
        for item in &items {
            let (host, operation_handler, router_metrics, host_metrics) =
                self.build_host(project_id, item, &production.snapshot, &production.registry)?;
            production.registry.insert(&item.name, Arc::clone(&host));
            production.hosts.insert(item.name.to_string(), host);
            production.host_metrics.insert(item.name.to_string(), host_metrics);
            if let Some(handler) = operation_handler {
                production.operation_handlers.insert(item.name.to_string(), handler);
            }
            if let Some(metrics) = router_metrics {
                production.router_metrics.insert(item.name.to_string(), metrics);
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn build_host(
        &self,
        project_id: &str,
        item: &ItemConfig,
        snapshot: &ProductionSnapshot,
        registry: &Arc<ServiceRegistry>,
    ) -> Result<(Arc<Host>, Option<Arc<OperationHandler>>, Option<Arc<RouterMetrics>>, Arc<HostMetrics>), EngineError> {
        let item_kind_str = match item.kind {
            ItemKind::Service => "service",
            ItemKind::Process => "process",
            ItemKind::Operation => "operation",
        };

        let (handler, operation_handler, router_metrics): (Arc<dyn MessageHandler>, Option<Arc<OperationHandler>>, Option<Arc<RouterMetrics>>) =
            match item.kind {
                ItemKind::Operation => {
                    let adapter = build_outbound_adapter(item).map_err(|source| EngineError::AdapterStartFailed {
                        item: item.name.to_string(),
                        source,
                    })?;
                    let op_handler = Arc::new(OperationHandler::new(
                        adapter,
                        Arc::clone(&self.trace_store),
                        Arc::clone(&self.trace_writer),
                        project_id,
                        item.name.to_string(),
                    ));
                    (Arc::clone(&op_handler) as Arc<dyn MessageHandler>, Some(op_handler), None)
                }
                ItemKind::Process => {
                    let rule_set = rules_for(snapshot, &item.name);
                    let default_targets = default_targets_for(item, snapshot, ConnectionKind::Standard);
                    let bad_message_handler = item
                        .properties
                        .get("bad_message_handler")
                        .and_then(|name| ItemName::try_from(name.clone()).ok());
                    let validation_mode = match item.properties.get("validation_mode").map(String::as_str) {
                        Some("warn") => ValidationMode::Warn,
                        Some("error") => ValidationMode::Error,
                        _ => ValidationMode::None,
                    };
                    let config = RouterConfig {
                        name: item.name.clone(),
                        project_id: project_id.to_string(),
                        rules: rule_set,
                        default_targets,
                        validation_mode,
                        bad_message_handler,
                        transforms: HashMap::<String, Transform>::new(),
                    };
                    let router = RouterHost::new(config, Arc::clone(registry) as Arc<dyn TargetRegistry>, Arc::clone(&self.trace_store), Arc::clone(&self.trace_writer));
                    let metrics = router.metrics();
                    (router as Arc<dyn MessageHandler>, None, Some(metrics))
                }
                ItemKind::Service => {
                    let default_targets = default_targets_for(item, snapshot, ConnectionKind::Standard);
                    let forward = Arc::new(ForwardHandler {
                        targets: default_targets,
                        registry: Arc::clone(registry),
                    });
                    (forward as Arc<dyn MessageHandler>, None, None)
                }
            };

        let host = Host::new(
            item.name.clone(),
            project_id,
            item_kind_str,
            item.host_settings.clone(),
            handler,
            Arc::clone(&self.trace_store),
        );
        let host_metrics = host.metrics();
        Ok((host, operation_handler, router_metrics, host_metrics))
    }

    fn wire_error_targets(&self, production: &Production) {
        for (name, handler) in &production.operation_handlers {
            let item = production.snapshot.items.iter().find(|i| i.name.as_ref() == name);
            let Some(item) = item else { continue };
            let error_target = default_targets_for(item, &production.snapshot, ConnectionKind::Error)
                .into_iter()
                .next();
            let resolved = error_target.and_then(|name| production.hosts.get(name.as_ref())).cloned();
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                handler.set_error_target(resolved).await;
            });
        }
    }

    async fn start_production(&self, project_id: &str, production: &mut Production) -> Result<(), EngineError> {
        let mut started: Vec<String> = Vec::new();
        for name in production.start_order.clone() {
            let Some(host) = production.hosts.get(&name) else { continue };
            host.start().await.map_err(|source| EngineError::HostStartFailed {
                item: name.clone(),
                source,
            })?;
            started.push(name.clone());

            if let Some(item) = production.snapshot.items.iter().find(|i| i.name.as_ref() == name) {
                if let Some(task) = self
                    .spawn_inbound_adapter(project_id, item, Arc::clone(host), &production.registry)
                    .await
                {
                    match task {
                        Ok(task) => production.adapters.push(task),
                        Err(source) => {
                            return Err(EngineError::AdapterStartFailed {
                                item: name,
                                source,
                            });
                        }
                    }
                }
            }
        }
        info!(count = started.len(), "production started");
        Ok(())
    }

    async fn stop_production(&self, production: &mut Production) {
        for task in production.adapters.drain(..) {
            task.cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), task.handle).await.is_err() {
                warn!(item = %task.item_name, "adapter task did not stop within timeout");
            }
        }
        for name in production.start_order.iter().rev() {
            if let Some(host) = production.hosts.get(name) {
                if let Err(err) = host.stop().await {
                    warn!(item = %name, error = %err, "error stopping host during shutdown");
                }
            }
        }
    }

    async fn spawn_inbound_adapter(
        &self,
        project_id: &str,
        item: &ItemConfig,
        target: Arc<Host>,
        registry: &Arc<ServiceRegistry>,
    ) -> Option<Result<AdapterTask, AdapterError>> {
        let cancel = CancellationToken::new();
        let item_name = item.name.to_string();
        match &item.adapter_settings {
            AdapterSettings::MllpInbound {
                port,
                host,
                max_connections,
                read_timeout_secs,
                ack_mode,
                bad_message_handler,
            } => {
                let config = MllpInboundConfig {
                    bind_host: host.clone(),
                    port: *port,
                    max_connections: *max_connections,
                    read_timeout: Duration::from_secs(*read_timeout_secs),
                    ack_mode: *ack_mode,
                };
                let bad_message_target = bad_message_handler
                    .as_ref()
                    .and_then(|name| Self::resolve_peer(registry, name));
                let adapter = Arc::new(MllpInboundAdapter::new(
                    config,
                    target,
                    bad_message_target,
                    Arc::clone(&self.trace_store),
                    Arc::clone(&self.trace_writer),
                    project_id,
                    item_name.clone(),
                ));
                Some(self.spawn_serve_task(item_name, cancel, adapter).await)
            }
            AdapterSettings::FileInbound {
                directory,
                poll_interval_secs,
                archive_directory,
                file_glob,
            } => {
                let config = file::FileInboundConfig {
                    directory: directory.into(),
                    poll_interval: Duration::from_secs(*poll_interval_secs),
                    archive_directory: archive_directory.clone().map(std::convert::Into::into),
                    file_glob: file_glob.clone(),
                };
                let adapter = Arc::new(file::FileInboundAdapter::new(
                    config,
                    target,
                    Arc::clone(&self.trace_store),
                    Arc::clone(&self.trace_writer),
                    project_id,
                    item_name.clone(),
                ));
                Some(self.spawn_serve_task(item_name, cancel, adapter).await)
            }
            AdapterSettings::HttpInbound { port, path } => {
                let config = http::HttpInboundConfig { port: *port, path: path.clone() };
                let adapter = Arc::new(http::HttpInboundAdapter::new(
                    config,
                    target,
                    Arc::clone(&self.trace_store),
                    Arc::clone(&self.trace_writer),
                    project_id,
                    item_name.clone(),
                ));
                Some(self.spawn_serve_task(item_name, cancel, adapter).await)
            }
            AdapterSettings::MllpOutbound { .. } | AdapterSettings::FileOutbound { .. } | AdapterSettings::HttpOutbound { .. } | AdapterSettings::None => None,
        }
    }

    /// Looks up a peer host for wiring an inbound adapter's
    /// `bad_message_handler` at construction time: unlike operation error
    /// targets (wired post-hoc via [`OperationHandler::set_error_target`]),
    /// an inbound adapter takes its bad-message target by value, so it must
    /// already exist in `registry`. Operations/processes are started (and
    /// so registered) before any service's adapter is spawned, so this
    /// resolves for any name declared earlier in `start_order`.
    fn resolve_peer(registry: &ServiceRegistry, name: &ItemName) -> Option<Arc<Host>> {
        registry.resolve(name.as_ref())
    }

    /// Spawns `adapter.serve` in the background and waits for it to signal
    /// that setup (bind/directory-create/etc.) succeeded before returning,
    /// so a setup failure surfaces here as `Err` instead of only being
    /// logged from inside the spawned task.
    async fn spawn_serve_task<A>(
        &self,
        item_name: String,
        cancel: CancellationToken,
        adapter: Arc<A>,
    ) -> Result<AdapterTask, AdapterError>
    where
        A: Serve + Send + Sync + 'static,
    {
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let task_cancel = cancel.clone();
        let task_item = item_name.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = adapter.serve(task_cancel, ready_tx).await {
                error!(item = %task_item, error = %err, "inbound adapter stopped with error");
            }
        });
        match ready_rx.await {
            Ok(Ok(())) => Ok(AdapterTask {
                item_name,
                cancel,
                handle,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AdapterError::StartFailed(
                "adapter task ended before signaling it was ready".to_string(),
            )),
        }
    }

    /// Stops every host in a production LIFO and cancels its adapter tasks,
    /// leaving the production deployed (hosts/registry retained) so
    /// [`Engine::start`] can resume it later.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProduction`] if nothing is deployed
    /// under `project_id`.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn stop(&self, project_id: &str) -> Result<(), EngineError> {
        let mut productions = self.productions.write().await;
        let production = productions
            .get_mut(project_id)
            .ok_or_else(|| EngineError::UnknownProduction(project_id.to_string()))?;
        self.stop_production(production).await;
        Ok(())
    }

    /// Resumes a production previously [`Engine::stop`]ped, starting every
    /// host in the same dependency order deploy used.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProduction`] if nothing is deployed
    /// under `project_id`, or [`EngineError::HostStartFailed`]/
    /// [`EngineError::AdapterStartFailed`] if a host fails to restart.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn start(&self, project_id: &str) -> Result<(), EngineError> {
        let mut productions = self.productions.write().await;
        let production = productions
            .get_mut(project_id)
            .ok_or_else(|| EngineError::UnknownProduction(project_id.to_string()))?;
        self.start_production(project_id, production).await
    }

    /// Applies `new_snapshot` to an already-deployed production: items
    /// present only in the old snapshot are stopped and discarded; items
    /// present only in the new one are built and started last; items whose
    /// configuration changed are either reloaded in place (settings-only
    /// changes) or rebuilt (adapter/rule changes Host cannot apply live).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProduction`] if nothing is deployed
    /// under `project_id`, plus the same validation/start errors as
    /// [`Engine::deploy`].
    #[instrument(skip(self, new_snapshot), fields(project_id = %project_id))]
    pub async fn reload(&self, project_id: &str, new_snapshot: ProductionSnapshot) -> Result<(), EngineError> {
        new_snapshot.validate()?;
        for item in &new_snapshot.items {
            item.validate()?;
        }

        let mut productions = self.productions.write().await;
        let production = productions
            .get_mut(project_id)
            .ok_or_else(|| EngineError::UnknownProduction(project_id.to_string()))?;

        let old_by_name: HashMap<String, &ItemConfig> =
            production.snapshot.items.iter().map(|i| (i.name.to_string(), i)).collect();
        let new_by_name: HashMap<String, &ItemConfig> =
            new_snapshot.items.iter().map(|i| (i.name.to_string(), i)).collect();
        let old_names: HashSet<&String> = old_by_name.keys().collect();
        let new_names: HashSet<&String> = new_by_name.keys().collect();

        let removed: Vec<String> = old_names.difference(&new_names).map(|s| (*s).clone()).collect();
        let added: Vec<String> = new_names.difference(&old_names).map(|s| (*s).clone()).collect();
        let common: Vec<String> = old_names.intersection(&new_names).map(|s| (*s).clone()).collect();

        for name in &removed {
            if let Some(host) = production.hosts.remove(name) {
                if let Err(err) = host.stop().await {
                    warn!(item = %name, error = %err, "error stopping removed item");
                }
            }
            production.registry.remove(&ItemName::try_from(name.clone()).unwrap_or_else(|_| panic!("previously-valid item name")));
            production.operation_handlers.remove(name);
            production.router_metrics.remove(name);
            production.host_metrics.remove(name);
        }

        for name in &common {
            let old_item = old_by_name[name];
            let new_item = new_by_name[name];
            if serde_json::to_value(old_item).ok() == serde_json::to_value(new_item).ok() {
                continue;
            }
            if old_item.kind == new_item.kind
                && serde_json::to_value(&old_item.adapter_settings).ok() == serde_json::to_value(&new_item.adapter_settings).ok()
                && old_item.kind != ItemKind::Process
            {
                if let Some(host) = production.hosts.get(name) {
                    host.reload_in_place(new_item.host_settings.clone())
                        .await
                        .map_err(|source| EngineError::HostStartFailed { item: name.clone(), source })?;
                }
                continue;
            }
            // Adapter settings or routing rules changed in a way Host cannot
            // apply live: rebuild the host from scratch.
            if let Some(host) = production.hosts.remove(name) {
                let _ = host.stop().await;
            }
            production.operation_handlers.remove(name);
            production.router_metrics.remove(name);
            production.host_metrics.remove(name);
            production.registry.remove(&new_item.name);

            let (host, op_handler, router_metrics, host_metrics) =
                self.build_host(project_id, new_item, &new_snapshot, &production.registry)?;
            production.registry.insert(&new_item.name, Arc::clone(&host));
            production.hosts.insert(name.clone(), Arc::clone(&host));
            production.host_metrics.insert(name.clone(), host_metrics);
            if let Some(handler) = op_handler {
                production.operation_handlers.insert(name.clone(), handler);
            }
            if let Some(metrics) = router_metrics {
                production.router_metrics.insert(name.clone(), metrics);
            }
            host.start().await.map_err(|source| EngineError::HostStartFailed { item: name.clone(), source })?;
        }

        production.snapshot = new_snapshot.clone();

        for name in &added {
            let item = new_by_name[name];
            if !item.enabled {
                continue;
            }
            let (host, op_handler, router_metrics, host_metrics) =
                self.build_host(project_id, item, &new_snapshot, &production.registry)?;
            production.registry.insert(&item.name, Arc::clone(&host));
            production.hosts.insert(name.clone(), Arc::clone(&host));
            production.host_metrics.insert(name.clone(), host_metrics);
            if let Some(handler) = op_handler {
                production.operation_handlers.insert(name.clone(), handler);
            }
            if let Some(metrics) = router_metrics {
                production.router_metrics.insert(name.clone(), metrics);
            }
            host.start().await.map_err(|source| EngineError::HostStartFailed { item: name.clone(), source })?;
        }

        self.wire_error_targets(production);
        production.start_order = start_order(&production.snapshot);
        info!(added = added.len(), removed = removed.len(), "production reloaded");
        Ok(())
    }

    /// Reports every deployed production's current `host_name → host_state` map.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProduction`] if nothing is deployed
    /// under `project_id`.
    pub async fn status(&self, project_id: &str) -> Result<HashMap<String, crate::domain::HostState>, EngineError> {
        let productions = self.productions.read().await;
        let production = productions
            .get(project_id)
            .ok_or_else(|| EngineError::UnknownProduction(project_id.to_string()))?;
        let mut out = HashMap::new();
        for (name, host) in &production.hosts {
            out.insert(name.clone(), host.state().await);
        }
        Ok(out)
    }

    /// Reports one item's counters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownProduction`] or [`EngineError::UnknownItem`].
    pub async fn item_metrics(&self, project_id: &str, item_name: &str) -> Result<ItemMetrics, EngineError> {
        let productions = self.productions.read().await;
        let production = productions
            .get(project_id)
            .ok_or_else(|| EngineError::UnknownProduction(project_id.to_string()))?;
        let host_metrics = production
            .host_metrics
            .get(item_name)
            .ok_or_else(|| EngineError::UnknownItem(item_name.to_string(), project_id.to_string()))?;
        use std::sync::atomic::Ordering;
        let mut metrics = ItemMetrics {
            processed: host_metrics.processed.load(Ordering::Relaxed),
            dropped: host_metrics.dropped.load(Ordering::Relaxed),
            restarts: host_metrics.restarts.load(Ordering::Relaxed),
            errors: host_metrics.errors.load(Ordering::Relaxed),
            ..ItemMetrics::default()
        };
        if let Some(router_metrics) = production.router_metrics.get(item_name) {
            metrics.no_match = Some(router_metrics.no_match.load(Ordering::Relaxed));
            metrics.parse_failures = Some(router_metrics.parse_failures.load(Ordering::Relaxed));
            metrics.disabled_rules = Some(router_metrics.disabled_rules.load(Ordering::Relaxed));
        }
        Ok(metrics)
    }

    /// Aborts the background session reconciler. Called by the binary on
    /// shutdown after every production has been stopped.
    pub fn shutdown(&self) {
        self.reconciler_handle.abort();
    }
}

/// Narrow trait every inbound adapter's `serve` method satisfies, so
/// [`Engine::spawn_serve_task`] can be generic over the three transports
/// instead of repeating the spawn boilerplate three times.
#[async_trait::async_trait]
trait Serve {
    async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError>;
}

#[async_trait::async_trait]
impl Serve for MllpInboundAdapter {
    async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        MllpInboundAdapter::serve(self, cancel, ready).await
    }
}

#[async_trait::async_trait]
impl Serve for file::FileInboundAdapter {
    async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        file::FileInboundAdapter::serve(self, cancel, ready).await
    }
}

#[async_trait::async_trait]
impl Serve for http::HttpInboundAdapter {
    async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        http::HttpInboundAdapter::serve(self, cancel, ready).await
    }
}

/// Forwards every envelope a `service`-kind host dequeues to its
/// `connections`-derived default targets, unconditionally — services carry
/// no rule language of their own; that is [`RouterHost`]'s job.
struct ForwardHandler {
    targets: Vec<ItemName>,
    registry: Arc<ServiceRegistry>,
}

#[async_trait::async_trait]
impl MessageHandler for ForwardHandler {
    async fn on_message(&self, envelope: crate::domain::MessageEnvelope) -> Result<(), String> {
        for target in &self.targets {
            let Some(host) = self.registry.resolve(target.as_ref()) else {
                warn!(target = %target, "forward target not found");
                continue;
            };
            host.submit(envelope.clone().addressed_to(target.as_ref()))
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok(())
    }
}

fn build_outbound_adapter(item: &ItemConfig) -> Result<Arc<dyn OutboundAdapter>, AdapterError> {
    match &item.adapter_settings {
        AdapterSettings::MllpOutbound {
            ip_address,
            port,
            connect_timeout,
            ack_timeout,
            max_retries,
            retry_interval,
            reply_code_actions,
        } => {
            let actions = ReplyCodeActions::parse(reply_code_actions)
                .map_err(|err| AdapterError::StartFailed(err.to_string()))?;
            let config = MllpOutboundConfig {
                ip_address: ip_address.clone(),
                port: *port,
                connect_timeout: connect_timeout.as_duration(),
                ack_timeout: ack_timeout.as_duration(),
                max_retries: max_retries.as_u32(),
                retry_interval: retry_interval.as_duration(),
                reply_code_actions: actions,
            };
            Ok(Arc::new(MllpOutboundAdapter::new(config)))
        }
        AdapterSettings::FileOutbound { directory, filename_pattern } => Ok(Arc::new(file::FileOutboundAdapter::new(
            directory.into(),
            filename_pattern.clone(),
        ))),
        AdapterSettings::HttpOutbound { url, method, content_type } => {
            let config = http::HttpOutboundConfig {
                url: url.clone(),
                method: method.clone(),
                content_type: content_type.clone(),
                timeout: Duration::from_secs(30),
            };
            Ok(Arc::new(http::HttpOutboundAdapter::new(config)?))
        }
        other => Err(AdapterError::StartFailed(format!("{other:?} is not an outbound adapter"))),
    }
}

fn default_targets_for(item: &ItemConfig, snapshot: &ProductionSnapshot, kind: ConnectionKind) -> Vec<ItemName> {
    snapshot
        .connections
        .iter()
        .filter(|c: &&Connection| c.source_item == item.name && c.kind == kind)
        .map(|c| c.target_item.clone())
        .collect()
}

fn rules_for(snapshot: &ProductionSnapshot, item_name: &ItemName) -> Vec<crate::domain::RoutingRule> {
    snapshot
        .routing_rules
        .iter()
        .find(|rule_set: &&RouterRuleSet| &rule_set.item == item_name)
        .map(|rule_set| rule_set.rules.clone())
        .unwrap_or_default()
}

/// Computes a start order that starts every `operation`-kind item first,
/// then `process`, then `service`, within each group preserving the
/// snapshot's own item order — a conservative cycle-breaking choice per
/// SPEC_FULL.md §4.6, since routing rules can form cycles but startup must
/// not wait on one.
fn start_order(snapshot: &ProductionSnapshot) -> Vec<String> {
    let mut operations = Vec::new();
    let mut processes = Vec::new();
    let mut services = Vec::new();
    for item in &snapshot.items {
        if !item.enabled {
            continue;
        }
        match item.kind {
            ItemKind::Operation => operations.push(item.name.to_string()),
            ItemKind::Process => processes.push(item.name.to_string()),
            ItemKind::Service => services.push(item.name.to_string()),
        }
    }
    operations.extend(processes);
    operations.extend(services);
    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdapterType, ConnectionKind, ItemKind, RuleAction};
    use crate::trace_store::memory::MemoryTraceStore;

    fn item_name(name: &str) -> ItemName {
        ItemName::try_from(name.to_string()).unwrap()
    }

    fn http_operation(name: &str, url: &str) -> ItemConfig {
        ItemConfig {
            name: item_name(name),
            kind: ItemKind::Operation,
            adapter_type: AdapterType::HttpOutbound,
            adapter_settings: AdapterSettings::HttpOutbound {
                url: url.to_string(),
                method: "POST".to_string(),
                content_type: "application/octet-stream".to_string(),
            },
            host_settings: HostSettings::default(),
            enabled: true,
            properties: HashMap::new(),
        }
    }

    fn http_service(name: &str, port: u16) -> ItemConfig {
        ItemConfig {
            name: item_name(name),
            kind: ItemKind::Service,
            adapter_type: AdapterType::HttpInbound,
            adapter_settings: AdapterSettings::HttpInbound {
                port,
                path: "/in".to_string(),
            },
            host_settings: HostSettings::default(),
            enabled: true,
            properties: HashMap::new(),
        }
    }

    fn router_item(name: &str) -> ItemConfig {
        ItemConfig {
            name: item_name(name),
            kind: ItemKind::Process,
            adapter_type: AdapterType::None,
            adapter_settings: AdapterSettings::None,
            host_settings: HostSettings::default(),
            enabled: true,
            properties: HashMap::new(),
        }
    }

    fn base_snapshot() -> ProductionSnapshot {
        ProductionSnapshot {
            production: snapshot::ProductionSettings {
                name: "test".to_string(),
                enabled: true,
                settings: HashMap::new(),
            },
            items: vec![],
            connections: vec![],
            routing_rules: vec![],
        }
    }

    #[tokio::test]
    async fn deploy_starts_hosts_in_dependency_order() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let engine = Engine::new(store, Duration::from_secs(300));

        let mut snapshot = base_snapshot();
        snapshot.items = vec![
            http_service("In", 0),
            router_item("Router"),
            http_operation("Out", "http://127.0.0.1:9/unused"),
        ];
        snapshot.connections = vec![
            Connection {
                source_item: item_name("In"),
                target_item: item_name("Router"),
                kind: ConnectionKind::Standard,
            },
            Connection {
                source_item: item_name("Router"),
                target_item: item_name("Out"),
                kind: ConnectionKind::Standard,
            },
        ];

        engine.deploy("proj1", snapshot).await.unwrap();
        let status = engine.status("proj1").await.unwrap();
        assert_eq!(status.len(), 3);
        assert!(status.values().all(|s| *s == crate::domain::HostState::Running));

        engine.stop("proj1").await.unwrap();
        let status = engine.status("proj1").await.unwrap();
        assert!(status.values().all(|s| *s == crate::domain::HostState::Stopped));
        engine.shutdown();
    }

    #[tokio::test]
    async fn deploy_rejects_duplicate_item_names() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let engine = Engine::new(store, Duration::from_secs(300));
        let mut snapshot = base_snapshot();
        snapshot.items = vec![http_service("Dup", 0), http_service("Dup", 1)];
        let err = engine.deploy("proj2", snapshot).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidSnapshot(_)));
        engine.shutdown();
    }

    #[tokio::test]
    async fn reload_adds_and_removes_items() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let engine = Engine::new(store, Duration::from_secs(300));

        let mut snapshot = base_snapshot();
        snapshot.items = vec![http_operation("Out", "http://127.0.0.1:9/unused")];
        engine.deploy("proj3", snapshot.clone()).await.unwrap();

        snapshot.items.push(http_service("In", 0));
        engine.reload("proj3", snapshot.clone()).await.unwrap();
        assert_eq!(engine.status("proj3").await.unwrap().len(), 2);

        snapshot.items.retain(|i| i.name.as_ref() != "In");
        engine.reload("proj3", snapshot).await.unwrap();
        assert_eq!(engine.status("proj3").await.unwrap().len(), 1);

        engine.stop("proj3").await.unwrap();
        engine.shutdown();
    }

    #[tokio::test]
    async fn item_metrics_reports_router_counters() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let engine = Engine::new(store, Duration::from_secs(300));
        let mut snapshot = base_snapshot();
        let mut router = router_item("Router");
        router.host_settings.target_names = vec![];
        snapshot.items = vec![router];
        snapshot.routing_rules = vec![RouterRuleSet {
            item: item_name("Router"),
            rules: vec![crate::domain::RoutingRule {
                name: "always".to_string(),
                priority: crate::domain::Priority::default(),
                enabled: true,
                condition: String::new(),
                action: RuleAction::Send,
                targets: vec![],
                transform_name: None,
            }],
        }];
        engine.deploy("proj4", snapshot).await.unwrap();
        let metrics = engine.item_metrics("proj4", "Router").await.unwrap();
        assert!(metrics.no_match.is_some());
        engine.stop("proj4").await.unwrap();
        engine.shutdown();
    }
}
