//! Task Scheduler
//!
//! Concurrency-bounded registry of in-flight acquisition tasks, deduplicated
//! by media item. The scheduler is the single catch boundary: strategy errors
//! never propagate across it, they become the `error` status plus a persisted
//! message. Every status transition on a task-owned item is mirrored to the
//! journal before the task settles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::decode::DecodePipeline;
use crate::error::{AcquireError, AcquireResult};
use crate::journal::Journal;
use crate::media::{MediaId, MediaStatus, ProviderKind, TaskId};
use crate::strategy::{AcquisitionStrategy, SharedMediaItem, TaskContext};

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently executing tasks
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

// =============================================================================
// Task Registry
// =============================================================================

/// Read-only view of a registered task
#[derive(Clone, Debug)]
pub struct TaskInfo {
    /// Task id
    pub id: TaskId,
    /// Owning media item id
    pub media_id: MediaId,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// True when dispatched, false while waiting in FIFO order
    pub executing: bool,
}

struct TaskEntry {
    task_id: TaskId,
    item: SharedMediaItem,
    token: CancelToken,
    provider: ProviderKind,
    executing: bool,
    created_at: DateTime<Utc>,
}

/// Shared mutable scheduler state; the one critical section. Admit, cancel,
/// and complete all race from UI events and stream callbacks, so every
/// mutation goes through this lock, never held across an await.
struct SchedulerState {
    registry: HashMap<MediaId, TaskEntry>,
    queue: VecDeque<MediaId>,
    executing: usize,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Concurrency-bounded acquisition task scheduler
#[derive(Clone)]
pub struct TaskScheduler {
    state: Arc<Mutex<SchedulerState>>,
    strategies: Arc<HashMap<ProviderKind, Arc<dyn AcquisitionStrategy>>>,
    journal: Arc<dyn Journal>,
    decode: Arc<dyn DecodePipeline>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Creates a scheduler dispatching to the given strategies
    pub fn new(
        strategies: Vec<Arc<dyn AcquisitionStrategy>>,
        journal: Arc<dyn Journal>,
        decode: Arc<dyn DecodePipeline>,
        config: SchedulerConfig,
    ) -> Self {
        let strategies = strategies
            .into_iter()
            .map(|s| (s.provider(), s))
            .collect::<HashMap<_, _>>();

        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                registry: HashMap::new(),
                queue: VecDeque::new(),
                executing: 0,
            })),
            strategies: Arc::new(strategies),
            journal,
            decode,
            config,
        }
    }

    /// Submits an acquisition task for the item.
    ///
    /// Fails with [`AcquireError::AlreadyRunning`] when a task for the same
    /// media item is registered. Dispatches immediately under the concurrency
    /// ceiling, otherwise the task waits in FIFO order.
    pub async fn submit(&self, item: SharedMediaItem) -> AcquireResult<TaskId> {
        let (media_id, provider, status) = {
            let m = item.read().await;
            (m.id.clone(), m.source.provider(), m.status)
        };

        let provider = provider.ok_or_else(|| AcquireError::UnsupportedSource(media_id.clone()))?;
        if !self.strategies.contains_key(&provider) {
            return Err(AcquireError::Internal(format!(
                "no strategy registered for provider {}",
                provider
            )));
        }
        if status != MediaStatus::Pending {
            return Err(AcquireError::Internal(format!(
                "submit requires a pending item, got {}",
                status
            )));
        }

        let task_id = ulid::Ulid::new().to_string();
        let dispatch = {
            let mut state = self.state.lock().unwrap();
            if state.registry.contains_key(&media_id) {
                return Err(AcquireError::AlreadyRunning(media_id));
            }

            let dispatch = state.executing < self.config.max_concurrent;
            state.registry.insert(
                media_id.clone(),
                TaskEntry {
                    task_id: task_id.clone(),
                    item: item.clone(),
                    token: CancelToken::new(),
                    provider,
                    executing: dispatch,
                    created_at: Utc::now(),
                },
            );
            if dispatch {
                state.executing += 1;
            } else {
                state.queue.push_back(media_id.clone());
                tracing::debug!(%media_id, "concurrency ceiling reached, task queued");
            }
            dispatch
        };

        if dispatch {
            self.spawn_task(media_id);
        }
        Ok(task_id)
    }

    /// Cancels a task. Succeeds only while the owning item is exactly
    /// `Pending`; the remote cancel call happens first, and local state is
    /// only touched once the remote accepted (at-most-once, no partial
    /// cancel).
    pub async fn cancel(&self, task_id: &str) -> AcquireResult<()> {
        let (media_id, item, token, provider) = {
            let state = self.state.lock().unwrap();
            let (media_id, entry) = state
                .registry
                .iter()
                .find(|(_, e)| e.task_id == task_id)
                .ok_or_else(|| AcquireError::TaskNotFound(task_id.to_string()))?;
            (
                media_id.clone(),
                entry.item.clone(),
                entry.token.clone(),
                entry.provider,
            )
        };

        let (status, job_id) = {
            let m = item.read().await;
            (
                m.status,
                m.source.job_record().map(|r| r.job_id.clone()),
            )
        };
        if status != MediaStatus::Pending {
            return Err(AcquireError::NotCancellable {
                id: media_id,
                status,
            });
        }
        let job_id = job_id.ok_or_else(|| AcquireError::MissingJobId(media_id.clone()))?;

        let strategy = self
            .strategies
            .get(&provider)
            .cloned()
            .ok_or_else(|| {
                AcquireError::Internal(format!("no strategy registered for provider {}", provider))
            })?;

        // Remote first: a failed remote cancel leaves all local state alone.
        let accepted = strategy.cancel_remote(&job_id).await?;
        if !accepted {
            return Err(AcquireError::RemoteCancelFailed(format!(
                "remote refused to cancel job {}",
                job_id
            )));
        }

        let snapshot = {
            let mut m = item.write().await;
            // The task may have taken the running transition while the remote
            // cancel was in flight. The running strategy will observe the
            // remote cancellation and settle the task itself; local state
            // stays untouched here.
            if m.status != MediaStatus::Pending {
                tracing::warn!(%media_id, %task_id, status = %m.status, "item advanced during remote cancel");
                return Err(AcquireError::NotCancellable {
                    id: media_id,
                    status: m.status,
                });
            }
            m.transition(MediaStatus::Cancelled)?;
            m.clone()
        };
        if let Err(e) = self.journal.save_meta_file(&snapshot).await {
            tracing::error!(%media_id, error = %e, "failed to journal cancellation");
        }

        token.cancel();
        self.settle(&media_id, task_id);

        tracing::info!(%media_id, %task_id, "acquisition task cancelled");
        Ok(())
    }

    /// Number of currently executing tasks
    pub fn executing_count(&self) -> usize {
        self.state.lock().unwrap().executing
    }

    /// Number of tasks waiting for a slot
    pub fn queued_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Returns true when a task is registered for the media item
    pub fn is_registered(&self, media_id: &str) -> bool {
        self.state.lock().unwrap().registry.contains_key(media_id)
    }

    /// Returns true when no task is registered at all
    pub fn is_idle(&self) -> bool {
        self.state.lock().unwrap().registry.is_empty()
    }

    /// Snapshot of all registered tasks
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.state
            .lock()
            .unwrap()
            .registry
            .iter()
            .map(|(media_id, e)| TaskInfo {
                id: e.task_id.clone(),
                media_id: media_id.clone(),
                created_at: e.created_at,
                executing: e.executing,
            })
            .collect()
    }

    fn spawn_task(&self, media_id: MediaId) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_task(media_id).await;
        });
    }

    async fn run_task(self, media_id: MediaId) {
        let (task_id, item, token, provider) = {
            let state = self.state.lock().unwrap();
            match state.registry.get(&media_id) {
                Some(e) => (e.task_id.clone(), e.item.clone(), e.token.clone(), e.provider),
                None => return,
            }
        };

        tracing::info!(%media_id, %task_id, %provider, "acquisition task started");

        match self.execute(&item, &token, provider).await {
            Ok(()) => {
                tracing::info!(%media_id, %task_id, "acquisition task completed");
            }
            Err(e) => self.handle_failure(&item, &token, e).await,
        }

        self.settle(&media_id, &task_id);
    }

    /// The single catch boundary realized per strategy: prepares the
    /// artifact, persists it, walks the item through decode to `ready`.
    async fn execute(
        &self,
        item: &SharedMediaItem,
        token: &CancelToken,
        provider: ProviderKind,
    ) -> AcquireResult<()> {
        let strategy = self
            .strategies
            .get(&provider)
            .cloned()
            .ok_or_else(|| {
                AcquireError::Internal(format!("no strategy registered for provider {}", provider))
            })?;

        let ctx = TaskContext {
            item: item.clone(),
            journal: self.journal.clone(),
            token: token.clone(),
        };

        token.check()?;
        let prepared = strategy.prepare_artifact(&ctx).await?;
        token.check()?;

        let media_id = { item.read().await.id.clone() };
        if prepared.need_artifact_write {
            self.journal
                .save_media_file(&prepared.artifact, &media_id)
                .await?;
        }

        // Cache-hit and re-fetch paths never saw a remote running tick; walk
        // them through asyncprocessing so the edge set stays closed.
        let snapshot = {
            let mut m = item.write().await;
            if m.status == MediaStatus::Pending {
                m.transition(MediaStatus::AsyncProcessing)?;
            }
            m.transition(MediaStatus::Decoding)?;
            m.media_type = prepared.resulting_media_type;
            m.clone()
        };
        if prepared.need_journal_write {
            self.journal.save_meta_file(&snapshot).await?;
        }

        let decoded = tokio::select! {
            d = self.decode.process_media(&snapshot, &prepared.artifact) => d?,
            _ = token.cancelled() => return Err(AcquireError::Cancelled),
        };

        let snapshot = {
            let mut m = item.write().await;
            m.duration_frames = decoded.duration_frames;
            m.runtime.decoded = Some(decoded.metadata);
            m.runtime.progress = 100.0;
            m.runtime.error_message = None;
            m.transition(MediaStatus::Ready)?;
            m.clone()
        };
        // The settled state is mirrored unconditionally; the pre-write flag
        // only covers the mirrors before decode. A reload must see `ready`,
        // not the state the journal happened to hold at submission.
        self.journal.save_meta_file(&snapshot).await?;

        Ok(())
    }

    /// Converts an escaping error into the `error` status plus a durable
    /// journal record, so a reload never re-attempts a known-dead job blindly.
    async fn handle_failure(&self, item: &SharedMediaItem, token: &CancelToken, err: AcquireError) {
        if token.is_cancelled() {
            // The cancel path already transitioned and journaled this item.
            tracing::debug!(error = %err, "task ended after local cancellation");
            return;
        }

        let snapshot = {
            let mut m = item.write().await;
            match &err {
                AcquireError::RemoteJobCancelled => {
                    // Remote-side cancellation: only a still-pending item can
                    // take the cancelled edge, anything further records it as
                    // an error.
                    if m.transition(MediaStatus::Cancelled).is_err() {
                        let _ = m.fail("remote job was cancelled");
                    }
                }
                _ => {
                    let _ = m.fail(err.to_string());
                }
            }
            m.clone()
        };

        // Failure must be durable even when the strategy asked for no
        // pre-write.
        if let Err(journal_err) = self.journal.save_meta_file(&snapshot).await {
            tracing::error!(media_id = %snapshot.id, error = %journal_err, "failed to journal task failure");
        }

        tracing::error!(media_id = %snapshot.id, error = %err, "acquisition task failed");
    }

    /// Removes a settled task and dispatches queued work into freed slots.
    /// Idempotent: whichever of the run path and the cancel path gets here
    /// first wins, the other is a no-op.
    fn settle(&self, media_id: &str, task_id: &str) {
        let to_spawn: Vec<MediaId> = {
            let mut state = self.state.lock().unwrap();
            let matches = state
                .registry
                .get(media_id)
                .map(|e| e.task_id == task_id)
                .unwrap_or(false);
            if !matches {
                return;
            }

            let entry = state.registry.remove(media_id).unwrap();
            if entry.executing {
                state.executing -= 1;
            } else {
                state.queue.retain(|id| id != media_id);
            }

            let mut ids = Vec::new();
            while state.executing < self.config.max_concurrent {
                let Some(next) = state.queue.pop_front() else {
                    break;
                };
                if let Some(e) = state.registry.get_mut(&next) {
                    e.executing = true;
                    state.executing += 1;
                    ids.push(next);
                }
            }
            ids
        };

        for id in to_spawn {
            self.spawn_task(id);
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("executing", &self.executing_count())
            .field("queued", &self.queued_count())
            .finish_non_exhaustive()
    }
}
