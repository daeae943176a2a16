//! The async write-back engine itself (component K, §4.K). Owns the dirty
//! cache, the bounded task queue, a fixed pool of land workers and the
//! optional adaptive tuner control loop.
//!
//! The engine never blocks a caller's `submit_*` on I/O: queueing an
//! `EntityHandle` and flipping its header is synchronous, and the actual
//! SQL only happens on a worker once a batch is due.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_std::channel::{self, Receiver, Sender};
use common::bundle::TaskBundle;
use common::errors::*;
use common::TaggedError;
use entity::EntityState;
use parking_lot::RwLock;
use sql::{LandExecutor, SqlRecord};

use crate::handle::EntityHandle;
use crate::task::{LandStats, LandStatsSnapshot, LandTask, Operation};
use crate::tuner::{adjust, AdaptiveOptions, TunableParams};

#[derive(Debug, Clone)]
pub struct LandEngineOptions {
    pub land_threads: usize,
    pub batch_size: usize,
    pub land_interval: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub queue_capacity: usize,
    pub shutdown_grace_window: Duration,
    pub adaptive: AdaptiveOptions,
}

impl Default for LandEngineOptions {
    fn default() -> Self {
        Self {
            land_threads: 4,
            batch_size: 200,
            land_interval: Duration::from_millis(50),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            queue_capacity: 10_000,
            shutdown_grace_window: Duration::from_secs(5),
            adaptive: AdaptiveOptions::default(),
        }
    }
}

/// A task resolved against the entity's live state at flush time, grouped
/// by operation so the group can go through a single batch SQL call
/// (§4.K "the single heaviest-weighted component").
struct Resolved<T> {
    primary_key: String,
    handle: EntityHandle<T>,
    dirty_fields: Vec<&'static str>,
    snapshot: T,
}

pub struct LandEngine<T: SqlRecord + Clone + Send + Sync + 'static> {
    executor: Arc<dyn LandExecutor<T>>,
    dirty_cache: RwLock<HashMap<String, EntityHandle<T>>>,
    sender: Sender<LandTask>,
    receiver: Receiver<LandTask>,
    params: Arc<TunableParams>,
    options: LandEngineOptions,
    stats: Arc<LandStats>,
    shutting_down: Arc<AtomicBool>,
    force_close: Arc<AtomicBool>,
    workers: RwLock<Option<TaskBundle<'static>>>,
}

impl<T: SqlRecord + Clone + Send + Sync + 'static> LandEngine<T> {
    pub fn start(executor: Arc<dyn LandExecutor<T>>, options: LandEngineOptions) -> Arc<Self> {
        let (sender, receiver) = channel::bounded(options.queue_capacity.max(1));
        let params = TunableParams::new(options.land_interval, options.batch_size);
        let engine = Arc::new(Self {
            executor,
            dirty_cache: RwLock::new(HashMap::new()),
            sender,
            receiver,
            params,
            options,
            stats: Arc::new(LandStats::default()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            force_close: Arc::new(AtomicBool::new(false)),
            workers: RwLock::new(None),
        });

        let mut bundle = TaskBundle::new();
        for worker_id in 0..engine.options.land_threads {
            let engine = engine.clone();
            bundle.add(async move {
                engine.worker_loop(worker_id).await;
            });
        }
        if engine.options.adaptive.enabled {
            let engine = engine.clone();
            bundle.add(async move {
                engine.tuner_loop().await;
            });
        }
        *engine.workers.write() = Some(bundle);
        engine
    }

    pub fn stats(&self) -> LandStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue_depth(&self) -> usize {
        self.sender.len()
    }

    pub fn is_in_dirty_cache(&self, primary_key: &str) -> bool {
        self.dirty_cache.read().contains_key(primary_key)
    }

    /// Deleted entities stay in the dirty cache until their land task
    /// finishes, but they're gone from the caller's point of view
    /// (§3 "Entity": `DELETED` is terminal). `is_deleted` is the escape
    /// hatch for code that needs to observe that transitional state.
    pub fn get_dirty(&self, primary_key: &str) -> Option<EntityHandle<T>> {
        let handle = self.dirty_cache.read().get(primary_key).cloned()?;
        if self.is_deleted(&handle) {
            None
        } else {
            Some(handle)
        }
    }

    pub fn get_all_dirty(&self) -> Vec<EntityHandle<T>> {
        self.dirty_cache
            .read()
            .values()
            .filter(|h| !self.is_deleted(h))
            .cloned()
            .collect()
    }

    pub fn is_deleted(&self, handle: &EntityHandle<T>) -> bool {
        handle.with(|e| e.header().state() == EntityState::Deleted)
    }

    fn enqueue(&self, task: LandTask) {
        if self.sender.try_send(task).is_err() {
            // Queue is full: the entity is still flagged `in_land_queue` and
            // stays in the dirty cache, so the next call that notices (or a
            // background sweep, not modeled here) can retry enqueueing it.
            log::warn!("land queue is full, dropping a task until backlog drains");
        }
    }

    /// Records a brand-new or resurrected entity. Safe to call more than
    /// once on the same handle while it's still queued (§3 "Entity"
    /// invariants: a second `submitInsert` before the first lands is a
    /// no-op).
    pub fn submit_insert(&self, handle: &EntityHandle<T>) {
        let primary_key = handle.primary_key();
        let enqueue_version = handle.with_mut(|e| {
            let header = e.header_mut();
            match header.state() {
                EntityState::Transient | EntityState::Deleted => {
                    header.set_state(EntityState::New);
                }
                EntityState::New => {}
                EntityState::Persistent => return None,
            }
            if header.is_in_land_queue() {
                None
            } else {
                header.set_in_land_queue(true);
                Some(header.version())
            }
        });

        if let Some(version) = enqueue_version {
            self.dirty_cache.write().insert(primary_key.clone(), handle.clone());
            self.enqueue(LandTask { primary_key, enqueue_version: version });
        }
    }

    /// Records a change to an already-persistent entity. Returns an error
    /// if the entity has never been landed (§4.K: `submitUpdate` requires
    /// `PERSISTENT`).
    pub fn submit_update(&self, handle: &EntityHandle<T>) -> Result<()> {
        let primary_key = handle.primary_key();
        let outcome = handle.with_mut(|e| {
            let header = e.header_mut();
            if header.state() != EntityState::Persistent {
                return Err(());
            }
            if header.is_in_land_queue() {
                Ok(None)
            } else {
                header.set_in_land_queue(true);
                Ok(Some(header.version()))
            }
        });

        let enqueue_version = outcome.map_err(|_| -> Error {
            TaggedError::new(common::ErrorKind::Conflict, "submitUpdate requires a PERSISTENT entity").into()
        })?;

        if let Some(version) = enqueue_version {
            self.dirty_cache.write().insert(primary_key.clone(), handle.clone());
            self.enqueue(LandTask { primary_key, enqueue_version: version });
        }
        Ok(())
    }

    /// Marks an entity for removal. A `NEW` entity that was never landed
    /// simply disappears (no SQL round-trip); a `PERSISTENT` one that
    /// already has a task in flight doesn't get a second task queued — the
    /// in-flight worker re-reads live state at flush time and will see
    /// `DELETED` and run the delete itself (§9 open-question resolution).
    pub fn submit_delete(&self, handle: &EntityHandle<T>) {
        let primary_key = handle.primary_key();
        let enqueue_version = handle.with_mut(|e| {
            let header = e.header_mut();
            match header.state() {
                EntityState::New => {
                    header.set_state(EntityState::Deleted);
                    None
                }
                EntityState::Persistent => {
                    header.set_state(EntityState::Deleted);
                    if header.is_in_land_queue() {
                        None
                    } else {
                        header.set_in_land_queue(true);
                        Some(header.version())
                    }
                }
                EntityState::Transient | EntityState::Deleted => None,
            }
        });

        if let Some(version) = enqueue_version {
            self.dirty_cache.write().insert(primary_key.clone(), handle.clone());
            self.enqueue(LandTask { primary_key, enqueue_version: version });
        }
    }

    /// Drains in-flight workers within a grace window, then force-closes:
    /// anything a worker is still retrying past the deadline is abandoned
    /// and logged as lost writes rather than left to hang `shutdown`
    /// forever against a dead database (§4.K "Failure semantics").
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sender.close();

        let bundle = match self.workers.write().take() {
            Some(bundle) => bundle,
            None => return, // already shut down
        };

        let outcome = futures::future::select(
            Box::pin(bundle.join()),
            Box::pin(async_std::task::sleep(self.options.shutdown_grace_window)),
        )
        .await;

        if let futures::future::Either::Right((_, remaining_join)) = outcome {
            log::warn!("land engine shutdown grace window elapsed, forcing workers closed");
            self.force_close.store(true, Ordering::SeqCst);
            remaining_join.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let interval = self.params.interval();
            let batch_size = self.params.batch_size();
            let mut batch = Vec::with_capacity(batch_size);

            let first = futures::future::select(
                Box::pin(self.receiver.recv()),
                Box::pin(async_std::task::sleep(interval)),
            )
            .await;
            match first {
                futures::future::Either::Left((Ok(task), _)) => batch.push(task),
                futures::future::Either::Left((Err(_), _)) => break, // channel closed, draining done
                futures::future::Either::Right((_, _)) => continue, // nothing arrived this tick
            }
            while batch.len() < batch_size {
                match self.receiver.try_recv() {
                    Ok(task) => batch.push(task),
                    Err(_) => break,
                }
            }

            log::debug!("land worker {} flushing {} task(s)", worker_id, batch.len());
            self.process_batch(batch).await;

            if self.shutting_down.load(Ordering::SeqCst) && self.receiver.is_empty() {
                break;
            }
        }
    }

    async fn tuner_loop(self: Arc<Self>) {
        loop {
            async_std::task::sleep(self.options.adaptive.control_period).await;
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            adjust(&self.params, &self.options.adaptive, self.queue_depth());
        }
    }

    /// Resolves every task against the entity's live state, groups the
    /// survivors by operation and lands each group through one batch SQL
    /// call instead of one statement per row (§4.K).
    pub(crate) async fn process_batch(&self, tasks: Vec<LandTask>) {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();

        for task in tasks {
            let handle = match self.dirty_cache.read().get(&task.primary_key).cloned() {
                Some(handle) => handle,
                None => continue,
            };

            // §4.K: a task whose enqueue-time version no longer matches the
            // entity's current version was superseded by a later submit
            // that already queued its own (fresher) task; skip it rather
            // than landing stale data.
            let plan = handle.with(|e| {
                let header = e.header();
                if header.version() != task.enqueue_version {
                    return None;
                }
                match header.state() {
                    EntityState::New => Some(Some((Operation::Insert, Vec::new()))),
                    EntityState::Persistent if header.is_dirty() => {
                        let fields: Vec<&'static str> = header.dirty_fields().iter().copied().collect();
                        Some(Some((Operation::Update, fields)))
                    }
                    // A `NEW` entity that never landed has no database row to
                    // delete (version 0): it vanishes without a SQL call.
                    EntityState::Deleted if header.version() > 0 => Some(Some((Operation::Delete, Vec::new()))),
                    _ => Some(None),
                }
            });

            let (operation, dirty_fields) = match plan {
                None => {
                    self.stats.skipped_stale.fetch_add(1, Ordering::Relaxed);
                    self.finalize(&handle, &task.primary_key);
                    continue;
                }
                Some(None) => {
                    self.finalize(&handle, &task.primary_key);
                    continue;
                }
                Some(Some(plan)) => plan,
            };

            let snapshot = handle.snapshot();
            let resolved = Resolved {
                primary_key: task.primary_key,
                handle,
                dirty_fields,
                snapshot,
            };

            match operation {
                Operation::Insert => inserts.push(resolved),
                Operation::Update => updates.push(resolved),
                Operation::Delete => deletes.push(resolved),
            }
        }

        if !inserts.is_empty() {
            self.land_group(Operation::Insert, inserts).await;
        }
        if !updates.is_empty() {
            self.land_group(Operation::Update, updates).await;
        }
        if !deletes.is_empty() {
            self.land_group(Operation::Delete, deletes).await;
        }
    }

    /// Runs one operation's batch to completion: retries the still-failing
    /// rows (shrinking the batch each round) up to `max_retries`, then
    /// gives up on whatever's left. Bails out immediately once
    /// `force_close` is set so a shutdown grace-window timeout doesn't
    /// keep a worker retrying against a dead database forever.
    async fn land_group(&self, operation: Operation, mut pending: Vec<Resolved<T>>) {
        let mut attempt = 0u32;
        loop {
            if pending.is_empty() {
                return;
            }
            if self.force_close.load(Ordering::SeqCst) {
                self.abandon_as_lost(operation, pending);
                return;
            }

            let results = self.run_batch(operation, &pending).await;
            let mut retry = Vec::new();
            for (item, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(()) => {
                        self.stats.lands.fetch_add(1, Ordering::Relaxed);
                        self.apply_success(&item, operation);
                        self.finalize(&item.handle, &item.primary_key);
                    }
                    Err(err) => {
                        log::warn!(
                            "land task for {} ({:?}) failed on attempt {}: {}",
                            item.primary_key,
                            operation,
                            attempt + 1,
                            err
                        );
                        retry.push(item);
                    }
                }
            }

            if retry.is_empty() {
                return;
            }
            attempt += 1;
            if attempt > self.options.max_retries {
                self.stats.failures.fetch_add(retry.len() as u64, Ordering::Relaxed);
                self.abandon_as_lost(operation, retry);
                return;
            }
            self.stats.retries.fetch_add(retry.len() as u64, Ordering::Relaxed);
            async_std::task::sleep(self.options.retry_base_delay * attempt).await;
            pending = retry;
        }
    }

    async fn run_batch(&self, operation: Operation, items: &[Resolved<T>]) -> Vec<Result<()>> {
        match operation {
            Operation::Insert => {
                let records: Vec<&T> = items.iter().map(|i| &i.snapshot).collect();
                self.executor.insert_batch(&records).await
            }
            Operation::Update => {
                let records: Vec<(&T, &[&'static str])> =
                    items.iter().map(|i| (&i.snapshot, i.dirty_fields.as_slice())).collect();
                self.executor.update_partial_batch(&records).await
            }
            Operation::Delete => {
                let records: Vec<&T> = items.iter().map(|i| &i.snapshot).collect();
                self.executor.delete_batch(&records).await
            }
        }
    }

    fn apply_success(&self, item: &Resolved<T>, operation: Operation) {
        item.handle.with_mut(|e| {
            let header = e.header_mut();
            match operation {
                Operation::Insert => {
                    header.set_state(EntityState::Persistent);
                    header.clear_changes();
                }
                Operation::Update => header.clear_specific(&item.dirty_fields),
                Operation::Delete => header.clear_changes(),
            }
            header.sync_version();
        });
    }

    /// Everything still failing once `max_retries` is exhausted, or still
    /// pending when the shutdown grace window elapses, is abandoned: the
    /// full payload is logged so an operator can replay it manually
    /// (§4.K "Failure semantics": "lost writes" with the full entity
    /// payload).
    fn abandon_as_lost(&self, operation: Operation, items: Vec<Resolved<T>>) {
        self.stats.lost_writes.fetch_add(items.len() as u64, Ordering::Relaxed);
        for item in &items {
            log::error!(
                "lost write for {} ({:?}): {}",
                item.primary_key,
                operation,
                describe_payload(&item.snapshot)
            );
        }
        for item in items {
            self.finalize(&item.handle, &item.primary_key);
        }
    }

    fn finalize(&self, handle: &EntityHandle<T>, primary_key: &str) {
        let evict = handle.with_mut(|e| {
            let header = e.header_mut();
            header.set_in_land_queue(false);
            match header.state() {
                EntityState::Deleted => true,
                EntityState::Persistent => !header.is_dirty(),
                _ => false,
            }
        });
        if evict {
            self.dirty_cache.write().remove(primary_key);
        }
    }
}

fn describe_payload<T: SqlRecord>(record: &T) -> String {
    T::columns()
        .iter()
        .map(|column| format!("{}={:?}", column, record.column_value(column)))
        .collect::<Vec<_>>()
        .join(", ")
}
