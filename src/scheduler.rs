use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::batch::{normalize_tags, Batch, BatchReply, BatchTracker};
use crate::config::SchedulerConfig;
use crate::controller::{Adjustment, ConcurrencyController};
use crate::error::LoadError;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::registry::AssetRegistry;
use crate::state::AssetTable;
use crate::types::{
    AssetId, AssetStatus, BatchId, BatchOutcome, LoadOptions, SchedulerEvent, SchedulerSnapshot,
};
use crate::{log_debug, log_for, log_info, log_warn};

// --- Command enum ---

pub enum SchedulerCommand {
    Submit {
        tags: Vec<String>,
        options: LoadOptions,
        settle: BatchReply,
        reply: oneshot::Sender<BatchId>,
    },
    Tick {
        delta_secs: f64,
    },
    SetBaseConcurrency {
        base: usize,
        reply: oneshot::Sender<()>,
    },
    SetPhaseConcurrency {
        phase: Option<usize>,
        reply: oneshot::Sender<()>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
}

// --- BatchTicket ---

/// A registered batch. Await `wait` for its settlement.
#[derive(Debug)]
pub struct BatchTicket {
    id: BatchId,
    rx: oneshot::Receiver<Result<BatchOutcome, LoadError>>,
}

impl BatchTicket {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub async fn wait(self) -> Result<BatchOutcome, LoadError> {
        self.rx.await.map_err(|_| LoadError::SchedulerShutDown)?
    }
}

// --- SchedulerHandle ---

#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    async fn send_command<T>(
        &self,
        command: SchedulerCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, LoadError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| LoadError::SchedulerShutDown)?;
        rx.await.map_err(|_| LoadError::SchedulerShutDown)
    }

    /// Register a batch for `tags` and return once its loads are enqueued.
    ///
    /// Tags are trimmed and deduplicated; blank tags are dropped. A batch that
    /// matches no assets is already settled when the ticket is returned.
    pub async fn submit<S: AsRef<str>>(
        &self,
        tags: &[S],
        options: LoadOptions,
    ) -> Result<BatchTicket, LoadError> {
        let (settle, settle_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        let id = self
            .send_command(
                SchedulerCommand::Submit {
                    tags: normalize_tags(tags),
                    options,
                    settle,
                    reply,
                },
                rx,
            )
            .await?;
        Ok(BatchTicket { id, rx: settle_rx })
    }

    /// Load every asset carrying any of `tags` and wait for the batch to settle.
    pub async fn load_by_tags<S: AsRef<str>>(
        &self,
        tags: &[S],
        options: LoadOptions,
    ) -> Result<BatchOutcome, LoadError> {
        self.submit(tags, options).await?.wait().await
    }

    /// Per-frame controller input.
    pub async fn tick(&self, delta_secs: f64) -> Result<(), LoadError> {
        self.sender
            .send(SchedulerCommand::Tick { delta_secs })
            .await
            .map_err(|_| LoadError::SchedulerShutDown)
    }

    pub async fn set_base_concurrency(&self, base: usize) -> Result<(), LoadError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SchedulerCommand::SetBaseConcurrency { base, reply }, rx)
            .await
    }

    pub async fn set_phase_concurrency(&self, phase: Option<usize>) -> Result<(), LoadError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SchedulerCommand::SetPhaseConcurrency { phase, reply }, rx)
            .await
    }

    pub async fn clear_phase_concurrency(&self) -> Result<(), LoadError> {
        self.set_phase_concurrency(None).await
    }

    /// Cancel every live batch. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> Result<usize, LoadError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SchedulerCommand::CancelAll { reply }, rx)
            .await
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, LoadError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SchedulerCommand::GetSnapshot { reply }, rx)
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }
}

// --- Actor implementation ---

type LoadResult = (AssetId, Result<(), String>);

struct SchedulerState<R> {
    registry: Arc<R>,
    assets: AssetTable,
    queue: PriorityQueue,
    batches: BatchTracker,
    controller: ConcurrencyController,
    /// Single-flight set: at most one registry load per asset id.
    loading: HashSet<AssetId>,
    in_flight: JoinSet<LoadResult>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl<R: AssetRegistry + 'static> SchedulerState<R> {
    fn publish(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_concurrency(&self) {
        self.publish(SchedulerEvent::ConcurrencyChanged {
            current: self.controller.current(),
            base: self.controller.base(),
            cap: self.controller.effective_cap(),
        });
    }

    /// Start queued loads until the concurrency cap is reached.
    fn drain(&mut self) {
        if self.controller.clamp_to_cap() {
            self.publish_concurrency();
        }

        while self.loading.len() < self.controller.current() {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            if self.assets.status(entry.asset) != AssetStatus::Queued {
                continue;
            }
            self.start_load(entry);
        }
    }

    fn start_load(&mut self, entry: QueueEntry) {
        let asset = entry.asset;
        self.assets.set_status(asset, AssetStatus::Loading);
        self.loading.insert(asset);

        if self.registry.has_resource(asset) {
            log_for!(Debug, asset, "already resident, completing on next tick");
            self.in_flight.spawn(async move {
                tokio::task::yield_now().await;
                (asset, Ok(()))
            });
            return;
        }

        log_for!(
            Debug,
            asset,
            "dispatching (priority {}, {}, {}/{} slots)",
            entry.priority,
            entry.batch,
            self.loading.len(),
            self.controller.current()
        );
        let load = self.registry.load(asset);
        self.in_flight.spawn(async move {
            let result = tokio::spawn(load)
                .await
                .unwrap_or_else(|e| Err(format!("load task panicked: {}", e)));
            (asset, result)
        });
    }

    fn settle_batch(&mut self, id: BatchId) {
        if let Some(mut batch) = self.batches.remove(id) {
            match &batch.error {
                Some(err) => log_for!(Debug, id, "settled with error: {}", err),
                None => log_for!(Debug, id, "settled ({}/{})", batch.loaded, batch.total),
            }
            batch.settle();
        }
    }
}

fn handle_submit<R: AssetRegistry + 'static>(
    state: &mut SchedulerState<R>,
    tags: Vec<String>,
    options: LoadOptions,
    settle: BatchReply,
) -> BatchId {
    let id = state.batches.allocate_id();
    let mut batch = Batch::new(id, tags, options, settle);

    let mut unique: BTreeSet<AssetId> = BTreeSet::new();
    for tag in &batch.tags {
        unique.extend(state.registry.find_by_tag(tag));
    }
    batch.total = unique.len();

    let mut enqueued = 0usize;
    for asset in unique {
        if state.registry.has_resource(asset) {
            batch.loaded += 1;
            continue;
        }

        let previous = state.assets.status(asset);
        state.assets.entry(asset).dependents.insert(id);

        match previous {
            AssetStatus::Idle | AssetStatus::Loaded | AssetStatus::Error => {
                if previous != AssetStatus::Idle {
                    log_for!(Debug, asset, "re-queueing (was {})", previous);
                    state.assets.reopen(asset);
                } else if state.registry.is_loading(asset) {
                    log_for!(Debug, asset, "already loading in registry, joining");
                }
                state.assets.set_status(asset, AssetStatus::Queued);
                state.queue.push(QueueEntry {
                    asset,
                    priority: batch.priority,
                    batch: id,
                });
                enqueued += 1;
            }
            AssetStatus::Queued => {
                if state.queue.raise_priority(asset, batch.priority, id) {
                    log_for!(Debug, asset, "raised to priority {}", batch.priority);
                }
            }
            AssetStatus::Loading => {}
        }
    }

    log_debug!(
        "{} tags={:?} total={} resident={} enqueued={}",
        id,
        batch.tags,
        batch.total,
        batch.loaded,
        enqueued
    );

    if batch.loaded > 0 {
        let progress = batch.progress();
        batch.notify(&progress);
        state.publish(SchedulerEvent::BatchProgress(progress));
    }

    if batch.is_complete() {
        batch.settle();
    } else {
        state.batches.insert(batch);
    }

    state.queue.sort();
    state.drain();
    id
}

fn handle_load_result<R: AssetRegistry + 'static>(
    state: &mut SchedulerState<R>,
    asset: AssetId,
    result: Result<(), String>,
) {
    state.loading.remove(&asset);
    let failure = result.err();

    match &failure {
        None => state.controller.record_success(),
        Some(message) => {
            log_for!(Warn, asset, "load failed: {}", message);
            state.controller.record_failure();
        }
    }

    let dependents = state.assets.finish(asset, failure.is_none());
    for batch_id in dependents {
        let (progress, complete) = {
            let Some(batch) = state.batches.get_mut(batch_id) else {
                continue;
            };
            if batch.cancelled {
                continue;
            }
            batch.record(asset, failure.as_deref());
            let progress = batch.progress();
            batch.notify(&progress);
            (progress, batch.is_complete())
        };
        state.publish(SchedulerEvent::BatchProgress(progress));
        if complete {
            state.settle_batch(batch_id);
        }
    }

    let progress = state.assets.progress();
    state.publish(SchedulerEvent::GlobalProgress {
        loaded: progress.loaded,
        total: progress.total,
        errors: progress.errors,
        asset,
        error: failure,
    });

    state.drain();
}

fn handle_tick<R: AssetRegistry + 'static>(state: &mut SchedulerState<R>, delta_secs: f64) {
    match state
        .controller
        .on_frame(delta_secs, state.loading.len())
    {
        Adjustment::Unchanged => {}
        Adjustment::Decreased => {
            log_info!(
                "Frame pressure: concurrency lowered to {} (cap {})",
                state.controller.current(),
                state.controller.effective_cap()
            );
            state.publish_concurrency();
        }
        Adjustment::Increased => {
            log_info!(
                "Frames stable: concurrency raised to {} (cap {})",
                state.controller.current(),
                state.controller.effective_cap()
            );
            state.publish_concurrency();
            state.drain();
        }
    }
}

fn handle_set_base<R: AssetRegistry + 'static>(state: &mut SchedulerState<R>, base: usize) {
    state.controller.set_base(base);
    log_info!(
        "Base concurrency set to {} (cap {}, current {})",
        state.controller.base(),
        state.controller.effective_cap(),
        state.controller.current()
    );
    state.publish_concurrency();
    state.drain();
}

fn handle_set_phase<R: AssetRegistry + 'static>(state: &mut SchedulerState<R>, phase: Option<usize>) {
    state.controller.set_phase(phase);
    match phase {
        Some(n) => log_info!(
            "Phase concurrency set to {} (cap {})",
            n,
            state.controller.effective_cap()
        ),
        None => log_info!(
            "Phase concurrency cleared (cap {})",
            state.controller.effective_cap()
        ),
    }
    state.publish_concurrency();
    state.drain();
}

fn handle_cancel_all<R: AssetRegistry + 'static>(state: &mut SchedulerState<R>) -> usize {
    let cleared = state.queue.clear();
    state.assets.requeue_as_idle(&cleared);
    let cancelled = state.batches.cancel_all();
    state.assets.clear_dependents();
    if cancelled > 0 || !cleared.is_empty() {
        log_info!(
            "Cancelled {} batch(es), dropped {} queued load(s), {} still in flight",
            cancelled,
            cleared.len(),
            state.loading.len()
        );
    }
    cancelled
}

fn handle_get_snapshot<R: AssetRegistry + 'static>(state: &SchedulerState<R>) -> SchedulerSnapshot {
    SchedulerSnapshot {
        current_concurrency: state.controller.current(),
        base_concurrency: state.controller.base(),
        phase_concurrency: state.controller.phase(),
        effective_cap: state.controller.effective_cap(),
        spike_count: state.controller.spike_count(),
        recovery_count: state.controller.recovery_count(),
        in_flight: state.loading.len(),
        queued: state.queue.len(),
        live_batches: state.batches.len(),
        progress: state.assets.progress(),
        assets: state.assets.statuses(),
    }
}

// --- Actor loop ---

async fn run_scheduler<R: AssetRegistry + 'static>(
    mut rx: mpsc::Receiver<SchedulerCommand>,
    registry: Arc<R>,
    config: SchedulerConfig,
    events: broadcast::Sender<SchedulerEvent>,
) {
    let mut state = SchedulerState {
        registry,
        assets: AssetTable::new(),
        queue: PriorityQueue::new(),
        batches: BatchTracker::new(),
        controller: ConcurrencyController::new(&config),
        loading: HashSet::new(),
        in_flight: JoinSet::new(),
        events,
    };

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    SchedulerCommand::Submit {
                        tags,
                        options,
                        settle,
                        reply,
                    } => {
                        let id = handle_submit(&mut state, tags, options, settle);
                        let _ = reply.send(id);
                    }
                    SchedulerCommand::Tick { delta_secs } => {
                        handle_tick(&mut state, delta_secs);
                    }
                    SchedulerCommand::SetBaseConcurrency { base, reply } => {
                        handle_set_base(&mut state, base);
                        let _ = reply.send(());
                    }
                    SchedulerCommand::SetPhaseConcurrency { phase, reply } => {
                        handle_set_phase(&mut state, phase);
                        let _ = reply.send(());
                    }
                    SchedulerCommand::CancelAll { reply } => {
                        let cancelled = handle_cancel_all(&mut state);
                        let _ = reply.send(cancelled);
                    }
                    SchedulerCommand::GetSnapshot { reply } => {
                        let _ = reply.send(handle_get_snapshot(&state));
                    }
                }
            }
            Some(joined) = state.in_flight.join_next(), if !state.in_flight.is_empty() => {
                match joined {
                    Ok((asset, result)) => handle_load_result(&mut state, asset, result),
                    Err(e) => log_warn!("Load watcher task ended unexpectedly: {}", e),
                }
            }
        }
    }

    // Shutdown: every handle dropped. Reject whatever is still waiting.
    handle_cancel_all(&mut state);
}

// --- Spawn ---

pub fn spawn_scheduler<R: AssetRegistry + 'static>(
    registry: Arc<R>,
    config: SchedulerConfig,
) -> (SchedulerHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.scheduler.command_capacity.max(1));
    let (events, _) = broadcast::channel(config.scheduler.event_capacity.max(1));

    let task_handle = tokio::spawn(run_scheduler(rx, registry, config, events.clone()));

    (
        SchedulerHandle {
            sender: tx,
            events,
        },
        task_handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockAssetRegistry;

    #[tokio::test]
    async fn spawn_scheduler_returns_joinhandle() {
        let registry = Arc::new(MockAssetRegistry::new());
        let (handle, task_handle) = spawn_scheduler(registry, SchedulerConfig::default());

        // Dropping the handle closes the channel, which stops the actor.
        drop(handle);

        let result = task_handle.await;
        assert!(
            result.is_ok(),
            "JoinHandle should resolve to Ok(()), got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn shutdown_rejects_pending_batches() {
        let registry = Arc::new(MockAssetRegistry::new().with_tag("a", &[1]));
        let (handle, task_handle) = spawn_scheduler(registry, SchedulerConfig::default());

        let ticket = handle.submit(&["a"], LoadOptions::default()).await.unwrap();
        drop(handle);
        task_handle.await.unwrap();

        assert_eq!(ticket.wait().await, Err(LoadError::Cancelled));
    }

    #[tokio::test]
    async fn handle_reports_shutdown_after_actor_exits() {
        let registry = Arc::new(MockAssetRegistry::new());
        let (handle, task_handle) = spawn_scheduler(registry, SchedulerConfig::default());
        task_handle.abort();
        let _ = task_handle.await;

        assert_eq!(handle.snapshot().await, Err(LoadError::SchedulerShutDown));
        assert_eq!(handle.tick(0.016).await, Err(LoadError::SchedulerShutDown));
    }
}
