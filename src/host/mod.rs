//! [`Host`]: the lifecycle unit wrapping one item's adapter, queue, worker
//! pool and restart supervisor.
//!
//! Grounded on the teacher's `MessageRouterImpl` (`message_router/router.rs`)
//! for the worker-pool/`AtomicBool` state flags/`Semaphore`-backed
//! concurrency shape, and on `AgentLifecycleManager`
//! (`agent_lifecycle_manager.rs`) for the DI'd supervisor and
//! `Arc<RwLock<HashMap<...>>>` live-state bookkeeping.

pub mod operation;
pub mod restart;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Direction, HeaderStatus, HostSettings, HostState, ItemName, MessageEnvelope, MessageHeader};
use crate::queue::{BoundedQueue, OverflowPolicy, PutOutcome, QueueError};
use crate::trace_store::{TraceStore, TraceWriter};

use restart::RestartSupervisor;

/// Errors a [`Host`] can raise from its lifecycle/`submit` operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// `start`/`stop`/`pause`/`resume` was called from a state that forbids it.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// The state the host was in.
        from: HostState,
        /// The state the caller attempted to enter.
        to: HostState,
    },
    /// The adapter could not acquire its resources (bind/connect/open).
    #[error("adapter failed to start: {0}")]
    AdapterStartFailed(String),
    /// `submit` was rejected by the queue.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    /// The target item named by a forward does not exist.
    #[error("target not found: {0}")]
    TargetNotFound(ItemName),
}

/// One unit of work a worker processes: an envelope plus the handler that
/// knows what to do with it.
///
/// A [`Host`] is generic over this handler so the same worker-pool/restart
/// machinery backs MLLP/File/HTTP adapters and [`crate::router::RouterHost`]
/// alike.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one envelope; errors are classified by the caller and
    /// written to the trace store, never propagated as panics.
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String>;
}

/// Counters a host keeps for its own supervisor logic and for the `item_metrics`
/// control-surface endpoint.
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// Envelopes that completed successfully.
    pub processed: AtomicU64,
    /// Envelopes that were dropped by the queue's overflow policy.
    pub dropped: AtomicU64,
    /// Times the host has been restarted by its supervisor.
    pub restarts: AtomicU64,
    /// Envelopes that ended in an error trace row.
    pub errors: AtomicU64,
}

/// One running worker task plus the token that tells it to stop after its
/// current envelope rather than mid-flight.
struct Worker {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

/// The lifecycle unit wrapping one item's adapter, queue, worker pool and
/// restart supervisor.
pub struct Host {
    name: ItemName,
    project_id: String,
    item_kind: String,
    settings: RwLock<HostSettings>,
    state: RwLock<HostState>,
    queue: RwLock<Arc<BoundedQueue>>,
    handler: Arc<dyn MessageHandler>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    workers: RwLock<Vec<Worker>>,
    supervisor: RestartSupervisor,
    metrics: Arc<HostMetrics>,
}

impl Host {
    /// Builds a new host in the `Created` state; call [`Host::start`] to
    /// begin processing.
    #[must_use]
    pub fn new(
        name: ItemName,
        project_id: impl Into<String>,
        item_kind: impl Into<String>,
        settings: HostSettings,
        handler: Arc<dyn MessageHandler>,
        trace_store: Arc<dyn TraceStore>,
    ) -> Arc<Self> {
        let queue = BoundedQueue::new(
            settings.queue_capacity.as_usize(),
            settings.queue_discipline,
            settings.overflow_policy,
        );
        let supervisor = RestartSupervisor::new(
            settings.restart_policy,
            settings.max_restarts,
            settings.restart_delay,
        );
        let trace_writer = TraceWriter::spawn(Arc::clone(&trace_store), 256);
        Arc::new(Self {
            name,
            project_id: project_id.into(),
            item_kind: item_kind.into(),
            settings: RwLock::new(settings),
            state: RwLock::new(HostState::Created),
            queue: RwLock::new(queue),
            handler,
            trace_store,
            trace_writer,
            workers: RwLock::new(Vec::new()),
            supervisor,
            metrics: Arc::new(HostMetrics::default()),
        })
    }

    /// This host's item name.
    #[must_use]
    pub fn name(&self) -> &ItemName {
        &self.name
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> HostState {
        *self.state.read().await
    }

    /// Snapshot of this host's counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<HostMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn transition(&self, next: HostState) -> Result<(), HostError> {
        let mut guard = self.state.write().await;
        if !guard.can_transition_to(next) {
            return Err(HostError::InvalidTransition {
                from: *guard,
                to: next,
            });
        }
        *guard = next;
        Ok(())
    }

    /// Starts the host: transitions `Created`/`Stopped` → `Starting` →
    /// `Running`, spawning `pool_size` workers against the current queue.
    #[instrument(skip(self), fields(item_name = %self.name))]
    pub async fn start(self: &Arc<Self>) -> Result<(), HostError> {
        self.transition(HostState::Starting).await?;
        self.spawn_workers().await;
        self.transition(HostState::Running).await?;
        info!("host started");
        Ok(())
    }

    async fn spawn_workers(self: &Arc<Self>) {
        let pool_size = self.settings.read().await.pool_size.as_usize();
        let mut workers = self.workers.write().await;
        for _ in 0..pool_size {
            workers.push(self.spawn_one_worker());
        }
    }

    /// Spawns one worker. It keeps pulling from the current queue until
    /// either the queue closes or `stop` is cancelled, and checks `stop`
    /// only between envelopes so a shrinking pool never interrupts an
    /// envelope already in flight.
    fn spawn_one_worker(self: &Arc<Self>) -> Worker {
        let this = Arc::clone(self);
        let stop = CancellationToken::new();
        let worker_stop = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                let queue = Arc::clone(&*this.queue.read().await);
                tokio::select! {
                    () = worker_stop.cancelled() => break,
                    result = queue.get() => match result {
                        Ok(envelope) => this.process_one(envelope).await,
                        Err(QueueError::Closed) => break,
                        Err(err) => {
                            warn!(error = %err, "worker get() failed unexpectedly");
                            break;
                        }
                    },
                }
            }
        });
        Worker { handle, stop }
    }

    #[instrument(skip(self, envelope), fields(item_name = %self.name, message_id = %envelope.message_id))]
    async fn process_one(self: &Arc<Self>, envelope: MessageEnvelope) {
        match self.handler.on_message(envelope).await {
            Ok(()) => {
                self.metrics.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %reason, "message handler failed");
                self.supervisor.record_failure();
                self.spawn_restart_cycle();
            }
        }
    }

    /// Drives the restart policy's `Error → restart-with-delay →
    /// Error-after-max_restarts` cycle for one fatal fault.
    ///
    /// Workers never crash outright in this runtime (a handler failure is
    /// caught and classified, not unwound), so "restart" here means the
    /// host-level state/metrics cycle the policy describes: the host is
    /// marked `Error` (new `submit`s are rejected) for `restart_delay`,
    /// then returns to `Running` if the policy still allows it. If another
    /// fault already started this cycle, the `Error` transition below
    /// fails and this call is a no-op.
    fn spawn_restart_cycle(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if this.transition(HostState::Error).await.is_err() {
                return;
            }
            warn!(item_name = %this.name, "host entering error state after fatal fault");
            match this.supervisor.should_restart().await {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    if this.transition(HostState::Starting).await.is_err() {
                        return;
                    }
                    if this.transition(HostState::Running).await.is_err() {
                        return;
                    }
                    this.metrics.restarts.fetch_add(1, Ordering::Relaxed);
                    info!(item_name = %this.name, "host restarted after fatal fault");
                }
                None => {
                    error!(item_name = %this.name, "restart policy exhausted; host remains in error");
                }
            }
        });
    }

    /// Submits one envelope to this host's queue, honoring the overflow
    /// policy. Writes a dropped-envelope trace row when the policy evicts
    /// or discards, per the queue-overflow testable property.
    #[instrument(skip(self, envelope), fields(item_name = %self.name))]
    pub async fn submit(&self, envelope: MessageEnvelope) -> Result<(), HostError> {
        if !self.state().await.accepts_submit() {
            return Err(HostError::InvalidTransition {
                from: self.state().await,
                to: HostState::Running,
            });
        }
        let queue = Arc::clone(&*self.queue.read().await);
        match queue.put(envelope).await? {
            PutOutcome::Enqueued => Ok(()),
            PutOutcome::EnqueuedEvicting { victim } => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(victim_message_id = %victim.message_id, "evicted envelope under drop_oldest");
                self.record_dropped_envelope(*victim, "queue_overflow").await;
                Ok(())
            }
            PutOutcome::Discarded => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Writes the single dropped-envelope trace row required whenever an
    /// envelope is discarded outside of normal processing — queue-overflow
    /// eviction or a queue reconfiguration that could not carry it over.
    async fn record_dropped_envelope(&self, victim: MessageEnvelope, reason: &str) {
        let body_id = match self
            .trace_store
            .store_body(&victim.raw_payload, &victim.content_type, &victim.schema_version)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to persist dropped-envelope body");
                return;
            }
        };
        let mut header = MessageHeader::new_pending(
            &self.project_id,
            self.name.as_ref(),
            &self.item_kind,
            Direction::Inbound,
            None,
            body_id,
            "Raw",
        );
        header.finish(HeaderStatus::Error, Some(reason.to_string()));
        self.trace_writer.record_header(header);
    }

    /// Pauses dequeuing without closing the queue; `submit` continues to
    /// accept work.
    pub async fn pause(&self) -> Result<(), HostError> {
        self.transition(HostState::Paused).await
    }

    /// Resumes dequeuing after [`Host::pause`].
    pub async fn resume(&self) -> Result<(), HostError> {
        self.transition(HostState::Running).await
    }

    /// Applies a new configuration in place.
    ///
    /// If only settings that do not touch the adapter changed (pool size,
    /// queue capacity/discipline/overflow, targets), workers are resized
    /// without dropping in-flight envelopes: surplus workers finish their
    /// current envelope and exit, new ones are spawned to grow the pool.
    /// Adapter-affecting changes are the caller's responsibility (stop then
    /// start); see `crate::engine`'s reload diff.
    #[instrument(skip(self, new_settings), fields(item_name = %self.name))]
    pub async fn reload_in_place(self: &Arc<Self>, new_settings: HostSettings) -> Result<(), HostError> {
        let queue_changed = {
            let current = self.settings.read().await;
            current.queue_capacity != new_settings.queue_capacity
                || current.queue_discipline != new_settings.queue_discipline
                || current.overflow_policy != new_settings.overflow_policy
        };
        if queue_changed {
            let new_queue = BoundedQueue::new(
                new_settings.queue_capacity.as_usize(),
                new_settings.queue_discipline,
                new_settings.overflow_policy,
            );
            let old_queue = {
                let mut guard = self.queue.write().await;
                std::mem::replace(&mut *guard, Arc::clone(&new_queue))
            };
            for leftover in old_queue.drain().await {
                let message_id = leftover.message_id;
                let traced = leftover.clone();
                match new_queue.put(leftover).await {
                    Ok(PutOutcome::Enqueued) => {}
                    Ok(PutOutcome::EnqueuedEvicting { victim }) => {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        self.record_dropped_envelope(*victim, "queue_overflow").await;
                    }
                    Ok(PutOutcome::Discarded) => {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(%message_id, "envelope dropped migrating into reconfigured queue");
                        self.record_dropped_envelope(traced, "queue_reconfigured").await;
                    }
                    Err(err) => {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(%message_id, error = %err, "failed to migrate envelope into reconfigured queue");
                        self.record_dropped_envelope(traced, "queue_reconfigured").await;
                    }
                }
            }
        }
        let target_pool_size = new_settings.pool_size.as_usize();
        *self.settings.write().await = new_settings;
        self.resize_pool(target_pool_size).await;
        info!("host reloaded in place");
        Ok(())
    }

    async fn resize_pool(self: &Arc<Self>, target: usize) {
        let mut workers = self.workers.write().await;
        if workers.len() < target {
            while workers.len() < target {
                workers.push(self.spawn_one_worker());
            }
        } else {
            while workers.len() > target {
                if let Some(worker) = workers.pop() {
                    // Signal rather than abort: the worker checks `stop`
                    // only between envelopes, so whatever it is currently
                    // processing still runs to completion.
                    worker.stop.cancel();
                }
            }
        }
    }

    /// Closes the queue to new `put`s, waits up to `graceful_shutdown_timeout`
    /// for workers to drain, then cancels remaining workers.
    #[instrument(skip(self), fields(item_name = %self.name))]
    pub async fn stop(self: &Arc<Self>) -> Result<(), HostError> {
        self.transition(HostState::Stopping).await?;
        let timeout = self.settings.read().await.graceful_shutdown_timeout.as_duration();
        let queue = Arc::clone(&*self.queue.read().await);
        queue.close().await;

        let mut workers = self.workers.write().await;
        let drained = std::mem::take(&mut *workers);
        let (stops, handles): (Vec<_>, Vec<_>) = drained.into_iter().map(|w| (w.stop, w.handle)).unzip();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!("graceful shutdown timed out; cancelling remaining workers");
            for stop in stops {
                stop.cancel();
            }
        }
        for leftover in queue.drain().await {
            warn!(message_id = %leftover.message_id, "envelope interrupted by shutdown");
        }
        self.supervisor.record_clean_exit();
        self.transition(HostState::Stopped).await?;
        info!("host stopped");
        Ok(())
    }

    /// True if this host's overflow policy would accept a `put` right now.
    pub async fn would_accept(&self) -> bool {
        let queue = Arc::clone(&*self.queue.read().await);
        queue.len().await < queue.capacity() || matches!(
            self.settings.read().await.overflow_policy,
            OverflowPolicy::DropOldest | OverflowPolicy::DropNew | OverflowPolicy::Block
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::domain::{MaxRestarts, PoolSize, QueueCapacity, RestartDelaySecs, RestartPolicy};
    use crate::trace_store::memory::MemoryTraceStore;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new_inbound("application/octet-stream", "1.0", b"hello".to_vec())
    }

    struct FailsEveryTime {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for FailsEveryTime {
        async fn on_message(&self, _envelope: MessageEnvelope) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("handler always fails".to_string())
        }
    }

    #[tokio::test]
    async fn fatal_fault_cycles_through_error_and_restarts() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let settings = HostSettings {
            restart_policy: RestartPolicy::OnFailure,
            restart_delay: RestartDelaySecs::try_new(0).unwrap(),
            max_restarts: MaxRestarts::try_new(5).unwrap(),
            ..HostSettings::default()
        };
        let handler = Arc::new(FailsEveryTime { calls: AtomicUsize::new(0) });
        let host = Host::new(
            ItemName::try_from("Flaky".to_string()).unwrap(),
            "proj",
            "operation",
            settings,
            handler,
            store,
        );
        host.start().await.unwrap();
        host.submit(envelope()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(host.metrics().restarts.load(Ordering::SeqCst), 1);
        assert_eq!(host.state().await, HostState::Running);
    }

    #[tokio::test]
    async fn restart_policy_never_leaves_host_in_error() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let settings = HostSettings {
            restart_policy: RestartPolicy::Never,
            ..HostSettings::default()
        };
        let handler = Arc::new(FailsEveryTime { calls: AtomicUsize::new(0) });
        let host = Host::new(
            ItemName::try_from("NeverRestart".to_string()).unwrap(),
            "proj",
            "operation",
            settings,
            handler,
            store,
        );
        host.start().await.unwrap();
        host.submit(envelope()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(host.metrics().restarts.load(Ordering::SeqCst), 0);
        assert_eq!(host.state().await, HostState::Error);
    }

    struct SlowCapture {
        delay: Duration,
        received: Arc<TokioMutex<Vec<MessageEnvelope>>>,
    }

    #[async_trait]
    impl MessageHandler for SlowCapture {
        async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String> {
            tokio::time::sleep(self.delay).await;
            self.received.lock().await.push(envelope);
            Ok(())
        }
    }

    #[tokio::test]
    async fn reload_in_place_migrates_queued_envelopes_on_capacity_change() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let settings = HostSettings {
            pool_size: PoolSize::try_new(1).unwrap(),
            queue_capacity: QueueCapacity::try_new(4).unwrap(),
            ..HostSettings::default()
        };
        let host = Host::new(
            ItemName::try_from("Queued".to_string()).unwrap(),
            "proj",
            "service",
            settings,
            Arc::new(SlowCapture {
                delay: Duration::from_millis(150),
                received: Arc::clone(&received),
            }),
            store,
        );
        host.start().await.unwrap();

        // The one worker picks this up immediately and sleeps, leaving the
        // queue to hold whatever is submitted next.
        host.submit(envelope()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        host.submit(envelope()).await.unwrap();

        let reconfigured = HostSettings {
            pool_size: PoolSize::try_new(1).unwrap(),
            queue_capacity: QueueCapacity::try_new(8).unwrap(),
            ..HostSettings::default()
        };
        host.reload_in_place(reconfigured).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(received.lock().await.len(), 2);
        assert_eq!(host.metrics().dropped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shrinking_pool_lets_in_flight_workers_finish() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let settings = HostSettings {
            pool_size: PoolSize::try_new(2).unwrap(),
            ..HostSettings::default()
        };
        let host = Host::new(
            ItemName::try_from("Pool".to_string()).unwrap(),
            "proj",
            "service",
            settings,
            Arc::new(SlowCapture {
                delay: Duration::from_millis(150),
                received: Arc::clone(&received),
            }),
            store,
        );
        host.start().await.unwrap();
        host.submit(envelope()).await.unwrap();
        host.submit(envelope()).await.unwrap();
        // Give both workers a chance to dequeue their envelope before the
        // pool shrinks out from under them.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shrunk = HostSettings {
            pool_size: PoolSize::try_new(1).unwrap(),
            ..HostSettings::default()
        };
        host.reload_in_place(shrunk).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(received.lock().await.len(), 2);
    }
}
