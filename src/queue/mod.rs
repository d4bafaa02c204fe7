pub mod events;
pub mod store;
mod worker;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;

use crate::models::{Profile, QueueItem, QueueStatus};
use crate::profiles::ProfileLookup;
use crate::resolver::DependencyResolver;
use crate::supervisor::JobExecutor;
use events::{QueueEvent, QueueEventKind};
use store::{QueueSnapshot, QueueStore, StoreError};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnqueueError {
    #[error("profile {0} not found")]
    UnknownProfile(i64),
    #[error("app id must be a non-empty number, got {0:?}")]
    InvalidAppId(String),
    #[error("app {app_id} is already queued for profile {profile_id} (item {existing})")]
    Duplicate {
        profile_id: i64,
        app_id: String,
        existing: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Let the running job finish on its own.
    AfterCurrent,
    /// Terminate the running job through the supervisor's cancellation path.
    CancelCurrent,
}

/// Collaborators the queue runs against.
pub struct QueueDeps {
    pub store: QueueStore,
    pub profiles: Arc<dyn ProfileLookup>,
    pub executor: Arc<dyn JobExecutor>,
    pub resolver: DependencyResolver,
    pub history_limit: usize,
}

/// Serializes update jobs into a single execution stream.
///
/// Cheap to clone; all clones share the same queue and worker.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    store: QueueStore,
    profiles: Arc<dyn ProfileLookup>,
    executor: Arc<dyn JobExecutor>,
    resolver: DependencyResolver,
    history_limit: usize,
    events: broadcast::Sender<QueueEvent>,
    wake: Notify,
    worker: Mutex<WorkerSlot>,
    degraded: AtomicBool,
}

/// Lifecycle of the worker loop. The lock around it is only held briefly;
/// nothing awaits the loop itself while holding it.
enum WorkerSlot {
    Idle,
    Running(WorkerHandle),
    /// Stop requested; the loop is finishing its current item.
    Stopping {
        cancel: watch::Sender<bool>,
        done: watch::Receiver<bool>,
    },
}

struct WorkerHandle {
    stop: watch::Sender<bool>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: Vec<QueueItem>,
    /// Most recent first.
    history: Vec<QueueItem>,
    next_id: i64,
    next_order: i64,
    /// Profiles whose dependencies were already expanded in this batch.
    resolved: HashSet<i64>,
}

impl QueueState {
    fn from_snapshot(snapshot: QueueSnapshot) -> (Self, bool) {
        let now = Utc::now();
        let mut changed = false;
        let mut queue = Vec::with_capacity(snapshot.queue.len());
        let mut recovered = Vec::new();

        for mut item in snapshot.queue {
            match item.status {
                QueueStatus::Pending => queue.push(item),
                QueueStatus::Running => {
                    tracing::warn!("Item {} (app {}) was running at shutdown", item.id, item.app_id);
                    item.mark_error(now, "interrupted by restart");
                    recovered.push(item);
                    changed = true;
                }
                QueueStatus::Completed | QueueStatus::Error => {
                    recovered.push(item);
                    changed = true;
                }
            }
        }

        let mut history = snapshot.history;
        for item in recovered {
            history.insert(0, item);
        }

        let all = queue.iter().chain(history.iter());
        let next_id = all.clone().map(|i| i.id).max().unwrap_or(0) + 1;
        let next_order = all.map(|i| i.order).max().unwrap_or(0) + 1;

        let state = Self {
            queue,
            history,
            next_id,
            next_order,
            resolved: HashSet::new(),
        };
        (state, changed)
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.queue.clone(),
            history: self.history.clone(),
        }
    }

    fn find_active(&self, profile_id: i64, app_id: &str) -> Option<&QueueItem> {
        self.queue
            .iter()
            .find(|i| i.profile_id == profile_id && i.app_id == app_id && i.status.is_active())
    }

    fn is_running(&self) -> bool {
        self.queue.iter().any(|i| i.status == QueueStatus::Running)
    }
}

impl QueueManager {
    /// Load persisted state and recover from an unclean shutdown. Does not
    /// start the worker.
    pub async fn open(deps: QueueDeps) -> Result<Self, StoreError> {
        let snapshot = deps.store.load_or_recover().await?;
        let (state, changed) = QueueState::from_snapshot(snapshot);
        tracing::info!(
            "Queue loaded from {}: {} pending, {} in history",
            deps.store.path().display(),
            state.queue.len(),
            state.history.len()
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let manager = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                store: deps.store,
                profiles: deps.profiles,
                executor: deps.executor,
                resolver: deps.resolver,
                history_limit: deps.history_limit.max(1),
                events,
                wake: Notify::new(),
                worker: Mutex::new(WorkerSlot::Idle),
                degraded: AtomicBool::new(false),
            }),
        };

        if changed {
            let mut state = manager.inner.state.lock().await;
            manager.inner.trim_history(&mut state);
            manager.inner.persist(&state.snapshot()).await;
        }

        Ok(manager)
    }

    pub async fn enqueue(
        &self,
        profile_id: i64,
        app_id: &str,
        is_main_app: bool,
    ) -> Result<QueueItem, EnqueueError> {
        let profile = self
            .inner
            .profiles
            .get_profile(profile_id)
            .await
            .ok_or(EnqueueError::UnknownProfile(profile_id))?;
        self.inner.push_item(&profile, app_id, is_main_app, None).await
    }

    /// Remove a pending item. Running and unknown items are left alone.
    pub async fn remove(&self, id: i64) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(pos) = state
            .queue
            .iter()
            .position(|i| i.id == id && i.status == QueueStatus::Pending)
        else {
            return false;
        };

        let item = state.queue.remove(pos);
        tracing::info!("Removed item {} (app {})", item.id, item.app_id);
        self.inner.commit(&state, QueueEventKind::Removed { id }).await;
        true
    }

    /// Drop every pending item. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let before = state.queue.len();
        state.queue.retain(|i| i.status != QueueStatus::Pending);
        let count = before - state.queue.len();

        if count > 0 {
            tracing::info!("Cleared {count} pending item(s)");
            self.inner.commit(&state, QueueEventKind::Cleared { count }).await;
        }
        count
    }

    pub async fn queue(&self) -> Vec<QueueItem> {
        self.inner.state.lock().await.queue.clone()
    }

    pub async fn history(&self) -> Vec<QueueItem> {
        self.inner.state.lock().await.history.clone()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Read the persisted copy, as another process would see it.
    pub async fn load_from_durable_store(&self) -> Result<QueueSnapshot, StoreError> {
        self.inner.store.load().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// True while the last write to disk failed.
    pub fn durability_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Relaxed)
    }

    /// True while the loop runs, including while a stop waits on the current item.
    pub async fn is_processing(&self) -> bool {
        match &*self.inner.worker.lock().await {
            WorkerSlot::Idle => false,
            WorkerSlot::Running(handle) => !handle.task.is_finished(),
            WorkerSlot::Stopping { .. } => true,
        }
    }

    /// Spawn the worker loop, or wake it if it is already running. Returns
    /// false without starting anything while a stop is still in progress.
    pub async fn start_processing(&self) -> bool {
        let mut worker = self.inner.worker.lock().await;
        match &*worker {
            WorkerSlot::Running(handle) if !handle.task.is_finished() => {
                self.inner.wake.notify_one();
                return true;
            }
            WorkerSlot::Stopping { .. } => {
                tracing::info!("Queue is still stopping, not starting");
                return false;
            }
            _ => {}
        }

        let (stop, stop_rx) = watch::channel(false);
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(worker::run(self.inner.clone(), stop_rx, cancel_rx));
        *worker = WorkerSlot::Running(WorkerHandle { stop, cancel, task });
        drop(worker);

        tracing::info!("Queue processing started");
        let state = self.inner.state.lock().await;
        self.inner.publish(&state, QueueEventKind::ProcessingStarted);
        true
    }

    /// Halt the worker loop and wait for it. The running item, if any, is
    /// recorded as Completed or Error first; pending items stay queued.
    ///
    /// A second call while a stop is in progress waits for the same stop, and
    /// can escalate it with `StopMode::CancelCurrent`.
    pub async fn stop_processing(&self, mode: StopMode) {
        let mut done = {
            let mut worker = self.inner.worker.lock().await;
            match std::mem::replace(&mut *worker, WorkerSlot::Idle) {
                WorkerSlot::Idle => return,
                WorkerSlot::Stopping { cancel, done } => {
                    if mode == StopMode::CancelCurrent {
                        let _ = cancel.send(true);
                    }
                    let waiter = done.clone();
                    *worker = WorkerSlot::Stopping { cancel, done };
                    waiter
                }
                WorkerSlot::Running(WorkerHandle { stop, cancel, task }) => {
                    {
                        // Flip the flag under the state lock so the loop either already
                        // claimed its next item or will see the stop before claiming.
                        let _state = self.inner.state.lock().await;
                        let _ = stop.send(true);
                        if mode == StopMode::CancelCurrent {
                            let _ = cancel.send(true);
                        }
                    }

                    let (done_tx, done) = watch::channel(false);
                    let waiter = done.clone();
                    *worker = WorkerSlot::Stopping { cancel, done };
                    // Joined on its own task so a dropped caller cannot leave the slot stuck.
                    tokio::spawn(join_worker(self.inner.clone(), task, done_tx, mode));
                    waiter
                }
            }
        };

        let _ = done.wait_for(|stopped| *stopped).await;
    }
}

async fn join_worker(
    inner: Arc<Inner>,
    task: JoinHandle<()>,
    done: watch::Sender<bool>,
    mode: StopMode,
) {
    if let Err(e) = task.await {
        tracing::error!("Queue worker ended abnormally: {e}");
    }

    {
        let mut worker = inner.worker.lock().await;
        if matches!(*worker, WorkerSlot::Stopping { .. }) {
            *worker = WorkerSlot::Idle;
        }
    }

    tracing::info!("Queue processing stopped ({mode:?})");
    {
        let state = inner.state.lock().await;
        inner.publish(&state, QueueEventKind::ProcessingStopped);
    }
    done.send_replace(true);
}

impl Inner {
    async fn push_item(
        &self,
        profile: &Profile,
        app_id: &str,
        is_main_app: bool,
        parent_app_id: Option<String>,
    ) -> Result<QueueItem, EnqueueError> {
        let app_id = app_id.trim();
        if app_id.is_empty() || !app_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EnqueueError::InvalidAppId(app_id.to_string()));
        }

        // Manifest lookup happens before taking the lock.
        let app_name = self.app_name(profile, app_id).await;

        let mut state = self.state.lock().await;
        if let Some(existing) = state.find_active(profile.id, app_id) {
            return Err(EnqueueError::Duplicate {
                profile_id: profile.id,
                app_id: app_id.to_string(),
                existing: existing.id,
            });
        }

        let item = QueueItem {
            id: state.next_id,
            profile_id: profile.id,
            app_id: app_id.to_string(),
            parent_app_id,
            profile_name: profile.name.clone(),
            app_name,
            order: state.next_order,
            is_main_app,
            status: QueueStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: String::new(),
        };
        state.next_id += 1;
        state.next_order += 1;
        state.queue.push(item.clone());

        tracing::info!(
            "Queued item {} (profile {}, app {}, order {})",
            item.id,
            item.profile_id,
            item.app_id,
            item.order
        );
        self.commit(&state, QueueEventKind::Enqueued { id: item.id }).await;
        drop(state);

        self.wake.notify_one();
        Ok(item)
    }

    async fn app_name(&self, profile: &Profile, app_id: &str) -> String {
        self.resolver
            .manifests()
            .read_manifest(&profile.steamapps_dir(), app_id)
            .await
            .and_then(|m| m.name().map(str::to_string))
            .unwrap_or_else(|| format!("App {app_id}"))
    }

    /// Claim the oldest pending item unless a stop was requested.
    async fn claim_next(&self, stop: &watch::Receiver<bool>) -> Option<QueueItem> {
        let mut state = self.state.lock().await;
        if *stop.borrow() {
            return None;
        }
        if state.is_running() {
            tracing::error!("Refusing to start a second item while one is running");
            return None;
        }

        let item = state
            .queue
            .iter_mut()
            .filter(|i| i.status == QueueStatus::Pending)
            .min_by_key(|i| i.order)?;
        item.mark_running(Utc::now());
        let claimed = item.clone();

        self.commit(&state, QueueEventKind::Started { id: claimed.id }).await;
        Some(claimed)
    }

    /// Move a running item to history with its terminal state.
    async fn finish(&self, id: i64, outcome: Result<(), String>) {
        let mut state = self.state.lock().await;
        let Some(pos) = state.queue.iter().position(|i| i.id == id) else {
            tracing::error!("Finished item {id} is no longer in the queue");
            return;
        };

        let mut item = state.queue.remove(pos);
        let now = Utc::now();
        match outcome {
            Ok(()) => item.mark_completed(now),
            Err(e) => item.mark_error(now, e),
        }
        let status = item.status;
        state.history.insert(0, item);
        self.trim_history(&mut state);

        self.commit(&state, QueueEventKind::Finished { id, status }).await;
    }

    fn trim_history(&self, state: &mut QueueState) {
        if state.history.len() > self.history_limit {
            let dropped = state.history.len() - self.history_limit;
            state.history.truncate(self.history_limit);
            tracing::debug!("Dropped {dropped} old history item(s)");
        }
    }

    /// Queue the dependencies of a completed primary item, once per profile per batch.
    async fn expand_dependencies(&self, parent: &QueueItem, profile: &Profile) {
        if !self.state.lock().await.resolved.insert(profile.id) {
            return;
        }

        let deps = self
            .resolver
            .resolve_dependencies(&profile.install_directory, &parent.app_id)
            .await;

        for dep in deps {
            match self
                .push_item(profile, &dep, false, Some(parent.app_id.clone()))
                .await
            {
                Ok(child) => tracing::info!(
                    "Queued dependency {} of app {} as item {}",
                    dep,
                    parent.app_id,
                    child.id
                ),
                Err(EnqueueError::Duplicate { .. }) => {
                    tracing::debug!("Dependency {dep} already queued")
                }
                Err(e) => tracing::warn!("Could not queue dependency {dep}: {e}"),
            }
        }
    }

    async fn end_batch(&self) {
        self.state.lock().await.resolved.clear();
    }

    /// Persist and publish. Callers hold the state lock, which keeps disk
    /// writes in mutation order.
    async fn commit(&self, state: &QueueState, kind: QueueEventKind) {
        let snapshot = state.snapshot();
        self.persist(&snapshot).await;
        let _ = self.events.send(QueueEvent { kind, snapshot });
    }

    fn publish(&self, state: &QueueState, kind: QueueEventKind) {
        let _ = self.events.send(QueueEvent {
            kind,
            snapshot: state.snapshot(),
        });
    }

    async fn persist(&self, snapshot: &QueueSnapshot) {
        match self.store.save(snapshot).await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("Queue persistence recovered");
                }
            }
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::error!("Queue persistence failed, keeping in-memory state: {e}");
            }
        }
    }
}
