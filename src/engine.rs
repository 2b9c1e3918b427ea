//! Acquisition Engine
//!
//! Facade over the two provider pools: a streaming pool shared by generation
//! and speech recognition, and a separate polling pool for BizyAir GPU jobs.
//! Also owns the load-time audit that rebuilds runtime state from the
//! journal.

use std::sync::Arc;

use crate::decode::DecodePipeline;
use crate::error::{AcquireError, AcquireResult};
use crate::journal::Journal;
use crate::media::{MediaItem, MediaStatus, ProviderKind, TaskId};
use crate::remote::RemoteJobApi;
use crate::scheduler::{SchedulerConfig, TaskInfo, TaskScheduler};
use crate::strategy::{
    AsrStrategy, BizyAirStrategy, GenerationStrategy, PollPolicy, SharedMediaItem,
};
use crate::stream::ReconnectPolicy;

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Concurrency ceiling for the streaming pool (generation + asr)
    pub stream_concurrency: usize,
    /// Concurrency ceiling for the GPU polling pool
    pub gpu_concurrency: usize,
    /// Reconnect policy for streaming providers
    pub reconnect: ReconnectPolicy,
    /// Poll policy for the GPU provider
    pub poll: PollPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_concurrency: 3,
            gpu_concurrency: 2,
            reconnect: ReconnectPolicy::default(),
            poll: PollPolicy::default(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Entry point for media acquisition
pub struct AcquisitionEngine {
    stream_pool: TaskScheduler,
    gpu_pool: TaskScheduler,
    journal: Arc<dyn Journal>,
}

impl AcquisitionEngine {
    /// Creates an engine with both provider pools wired to the remote API
    pub fn new(
        api: Arc<dyn RemoteJobApi>,
        journal: Arc<dyn Journal>,
        decode: Arc<dyn DecodePipeline>,
        config: EngineConfig,
    ) -> Self {
        let stream_pool = TaskScheduler::new(
            vec![
                Arc::new(GenerationStrategy::new(
                    api.clone(),
                    config.reconnect.clone(),
                )) as Arc<dyn crate::strategy::AcquisitionStrategy>,
                Arc::new(AsrStrategy::new(api.clone(), config.reconnect.clone())),
            ],
            journal.clone(),
            decode.clone(),
            SchedulerConfig {
                max_concurrent: config.stream_concurrency,
            },
        );

        let gpu_pool = TaskScheduler::new(
            vec![Arc::new(BizyAirStrategy::new(api, config.poll.clone()))
                as Arc<dyn crate::strategy::AcquisitionStrategy>],
            journal.clone(),
            decode,
            SchedulerConfig {
                max_concurrent: config.gpu_concurrency,
            },
        );

        Self {
            stream_pool,
            gpu_pool,
            journal,
        }
    }

    /// Submits an item for acquisition, routed to its provider pool.
    ///
    /// Items parked in `error` or `missing` are moved back to `pending`
    /// first; that edge is the manual retry path.
    pub async fn submit(&self, item: SharedMediaItem) -> AcquireResult<TaskId> {
        let provider = {
            let mut m = item.write().await;
            if matches!(m.status, MediaStatus::Error | MediaStatus::Missing) {
                m.runtime.error_message = None;
                m.transition(MediaStatus::Pending)?;
            }
            m.source
                .provider()
                .ok_or_else(|| AcquireError::UnsupportedSource(m.id.clone()))?
        };

        match provider {
            ProviderKind::Generation | ProviderKind::SpeechRecognition => {
                self.stream_pool.submit(item).await
            }
            ProviderKind::BizyAir => self.gpu_pool.submit(item).await,
        }
    }

    /// Cancels a task in whichever pool owns it
    pub async fn cancel(&self, task_id: &str) -> AcquireResult<()> {
        match self.stream_pool.cancel(task_id).await {
            Err(AcquireError::TaskNotFound(_)) => self.gpu_pool.cancel(task_id).await,
            other => other,
        }
    }

    /// Load-time audit for an item restored from the journal.
    ///
    /// Rebuilds runtime state, moves items persisted mid-acquisition back to
    /// `pending` so they can be resubmitted, and downgrades `ready` to
    /// `missing` when the artifact file disappeared from under the journal.
    /// The downgraded status is mirrored back best-effort so the next load
    /// agrees.
    pub async fn recover_on_load(&self, item: &mut MediaItem) {
        item.reset_runtime_for_load();
        item.reset_in_flight_on_load();

        if item.status == MediaStatus::Ready
            && !self.journal.verify_media_file_exists(&item.id).await
        {
            item.mark_missing_on_load();
            if let Err(e) = self.journal.save_meta_file(item).await {
                tracing::error!(media_id = %item.id, error = %e, "failed to journal missing status");
            }
        }
    }

    /// Snapshot of all registered tasks across both pools
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks = self.stream_pool.tasks();
        tasks.extend(self.gpu_pool.tasks());
        tasks
    }

    /// Returns true when neither pool has registered tasks
    pub fn is_idle(&self) -> bool {
        self.stream_pool.is_idle() && self.gpu_pool.is_idle()
    }
}

impl std::fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("stream_pool", &self.stream_pool)
            .field("gpu_pool", &self.gpu_pool)
            .finish_non_exhaustive()
    }
}
