//! Acquisition Strategies
//!
//! One strategy per provider, all sharing the same contract: classify the
//! resume scenario, materialize the artifact, and report what the scheduler
//! still has to persist. Submitting a brand-new remote job is the calling
//! layer's concern; a job id must exist before an item reaches the engine.

mod asr;
mod bizyair;
mod generation;

pub use asr::AsrStrategy;
pub use bizyair::{BizyAirStrategy, PollPolicy};
pub use generation::GenerationStrategy;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cancel::CancelToken;
use crate::error::{AcquireError, AcquireResult};
use crate::journal::Journal;
use crate::media::{
    JobRecord, MediaId, MediaItem, MediaStatus, MediaType, ProviderKind, RemoteJobStatus,
    SourceOrigin,
};
use crate::remote::RemoteJobApi;
use crate::stream::{ProgressObserver, ReconnectPolicy, ReconnectingConsumer};

/// Shared handle to a media item owned by a running task
pub type SharedMediaItem = Arc<RwLock<MediaItem>>;

// =============================================================================
// Contract
// =============================================================================

/// Output of a successful preparation
#[derive(Clone, Debug)]
pub struct PreparedArtifact {
    /// Raw artifact bytes for the decode pipeline
    pub artifact: Vec<u8>,
    /// Media type the artifact resolves to
    pub resulting_media_type: MediaType,
    /// Whether the scheduler must mirror metadata to the journal before
    /// decode; the settled state is mirrored regardless
    pub need_journal_write: bool,
    /// Whether the scheduler must persist the artifact bytes
    pub need_artifact_write: bool,
}

/// Provider-specific acquisition behavior
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Provider pool this strategy serves
    fn provider(&self) -> ProviderKind;

    /// Resolves one of the three resume scenarios and materializes the
    /// local artifact. Must never panic across the scheduler boundary;
    /// any error is converted to the `error` status by the caller.
    async fn prepare_artifact(&self, ctx: &TaskContext) -> AcquireResult<PreparedArtifact>;

    /// Remote-cancel call; true when the remote accepted the cancellation
    async fn cancel_remote(&self, job_id: &str) -> AcquireResult<bool>;
}

// =============================================================================
// Task Context
// =============================================================================

/// Per-task view handed to a strategy: the owned item, the journal, and the
/// cancellation token. A strategy never outlives the task's removal.
#[derive(Clone)]
pub struct TaskContext {
    /// The media item this task exclusively owns
    pub item: SharedMediaItem,
    /// Persistence collaborator
    pub journal: Arc<dyn Journal>,
    /// Cancellation token for this task
    pub token: CancelToken,
}

impl TaskContext {
    /// Cloned snapshot of the current item state
    pub async fn snapshot(&self) -> MediaItem {
        self.item.read().await.clone()
    }

    /// Media id of the owned item
    pub async fn media_id(&self) -> MediaId {
        self.item.read().await.id.clone()
    }

    /// Cloned job record, or `UnsupportedSource` for local sources
    pub async fn job_record(&self) -> AcquireResult<JobRecord> {
        let item = self.item.read().await;
        item.source
            .job_record()
            .cloned()
            .ok_or_else(|| AcquireError::UnsupportedSource(item.id.clone()))
    }

    /// Mutates the persisted job record in place
    pub async fn update_job_record(&self, f: impl FnOnce(&mut JobRecord) + Send) {
        let mut item = self.item.write().await;
        if let Some(record) = item.source.job_record_mut() {
            f(record);
        }
    }

    /// One-time `Pending -> AsyncProcessing` transition, mirrored to the
    /// journal. Idempotent: a reconnect that re-observes a running job is a
    /// no-op here.
    pub async fn mark_processing(&self) -> AcquireResult<()> {
        let snapshot = {
            let mut item = self.item.write().await;
            if item.status != MediaStatus::Pending {
                return Ok(());
            }
            item.transition(MediaStatus::AsyncProcessing)?;
            item.clone()
        };
        self.journal.save_meta_file(&snapshot).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressObserver for TaskContext {
    async fn on_running(&self) -> AcquireResult<()> {
        self.mark_processing().await
    }

    async fn on_progress(&self, status: RemoteJobStatus, progress: f32, _message: Option<&str>) {
        let mut item = self.item.write().await;
        item.runtime.progress = progress.clamp(0.0, 100.0);
        if let Some(record) = item.source.job_record_mut() {
            record.remote_status = status;
        }
    }
}

// =============================================================================
// Resume Scenario Classification
// =============================================================================

/// The three mutually exclusive starting points, in fixed priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeScenario {
    /// A downloaded artifact already exists on durable storage
    CacheHit,
    /// The persisted record carries a terminal success result, artifact gone
    Refetch,
    /// Non-terminal remote job: re-attach progress tracking
    Reconnect,
}

/// Classifies which resume scenario applies to the item.
///
/// Cache hit wins over everything else so a reload with an intact artifact
/// performs zero network calls. A persisted terminal failure is surfaced
/// directly rather than re-attempted.
pub async fn classify_resume(
    journal: &dyn Journal,
    item: &MediaItem,
) -> AcquireResult<ResumeScenario> {
    if journal.verify_media_file_exists(&item.id).await {
        return Ok(ResumeScenario::CacheHit);
    }

    let record = item
        .source
        .job_record()
        .ok_or_else(|| AcquireError::UnsupportedSource(item.id.clone()))?;

    if record.has_complete_result() {
        return Ok(ResumeScenario::Refetch);
    }

    if record.job_id.is_empty() {
        return Err(AcquireError::MissingJobId(item.id.clone()));
    }

    match record.remote_status {
        RemoteJobStatus::Failed => Err(AcquireError::RemoteJobFailed(
            record
                .error
                .clone()
                .unwrap_or_else(|| "remote job failed".to_string()),
        )),
        RemoteJobStatus::Cancelled => Err(AcquireError::RemoteJobCancelled),
        // Succeeded without a locator cannot be re-fetched.
        RemoteJobStatus::Succeeded => Err(AcquireError::RemoteJobFailed(
            "terminal result lost: no result locator persisted".to_string(),
        )),
        RemoteJobStatus::Queued | RemoteJobStatus::Running => Ok(ResumeScenario::Reconnect),
    }
}

/// Gates only the pre-decode journal mirrors: a cache hit on a project-load
/// item skips them, everything else gets a pre-write. The scheduler mirrors
/// the settled state unconditionally.
pub(crate) fn journal_write_needed(origin: SourceOrigin, scenario: ResumeScenario) -> bool {
    !(scenario == ResumeScenario::CacheHit && origin == SourceOrigin::ProjectLoad)
}

// =============================================================================
// Shared Streaming / Materialization Helpers
// =============================================================================

/// Runs the reconnecting consumer for the item's job and records the terminal
/// success result on the source record.
pub(crate) async fn acquire_via_stream(
    ctx: &TaskContext,
    api: &dyn RemoteJobApi,
    policy: &ReconnectPolicy,
) -> AcquireResult<serde_json::Value> {
    let record = ctx.job_record().await?;

    let consumer = ReconnectingConsumer::new(api, policy.clone(), ctx.token.clone());
    let payload = consumer
        .consume(&record.job_id, ctx)
        .await?
        .ok_or_else(|| {
            AcquireError::RemoteJobFailed("terminal success carried no result payload".to_string())
        })?;

    let url = payload
        .get("url")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let payload_clone = payload.clone();
    ctx.update_job_record(move |record| {
        record.remote_status = RemoteJobStatus::Succeeded;
        record.result_url = url;
        record.result_payload = Some(payload_clone);
        record.error = None;
    })
    .await;

    Ok(payload)
}

/// Turns a terminal result payload into artifact bytes: download when it
/// carries a URL, otherwise serialize the inline payload.
pub(crate) async fn materialize_result(
    api: &dyn RemoteJobApi,
    payload: &serde_json::Value,
) -> AcquireResult<Vec<u8>> {
    if let Some(url) = payload.get("url").and_then(|v| v.as_str()) {
        return api.download(url).await;
    }
    Ok(serde_json::to_vec(payload)?)
}

/// Re-materializes from a persisted terminal record without re-polling
pub(crate) async fn refetch_result(
    api: &dyn RemoteJobApi,
    record: &JobRecord,
) -> AcquireResult<Vec<u8>> {
    if let Some(url) = &record.result_url {
        return api.download(url).await;
    }
    if let Some(payload) = &record.result_payload {
        return materialize_result(api, payload).await;
    }
    Err(AcquireError::RemoteJobFailed(
        "no persisted result to re-fetch".to_string(),
    ))
}

/// Media type hint carried in the job request parameters
pub(crate) fn media_type_from_params(params: &serde_json::Value, default: MediaType) -> MediaType {
    match params.get("mediaType").and_then(|v| v.as_str()) {
        Some("video") => MediaType::Video,
        Some("image") => MediaType::Image,
        Some("audio") => MediaType::Audio,
        Some("text") => MediaType::Text,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::FsJournal;
    use crate::media::Source;

    fn item_with_record(record: JobRecord) -> MediaItem {
        MediaItem::new("m1", MediaType::Video, Source::AiGeneration(record))
    }

    #[tokio::test]
    async fn test_cache_hit_has_highest_priority() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();
        journal.save_media_file(b"cached", "m1").await.unwrap();

        // Terminal remote result present too; cache hit must still win.
        let mut record = JobRecord::new("j1", serde_json::json!({}));
        record.remote_status = RemoteJobStatus::Succeeded;
        record.result_url = Some("https://x/y.mp4".to_string());

        let scenario = classify_resume(&journal, &item_with_record(record))
            .await
            .unwrap();
        assert_eq!(scenario, ResumeScenario::CacheHit);
    }

    #[tokio::test]
    async fn test_refetch_when_result_persisted_but_artifact_gone() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        let mut record = JobRecord::new("j1", serde_json::json!({}));
        record.remote_status = RemoteJobStatus::Succeeded;
        record.result_payload = Some(serde_json::json!({"segments": []}));

        let scenario = classify_resume(&journal, &item_with_record(record))
            .await
            .unwrap();
        assert_eq!(scenario, ResumeScenario::Refetch);
    }

    #[tokio::test]
    async fn test_reconnect_for_inflight_job() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        let mut record = JobRecord::new("j1", serde_json::json!({}));
        record.remote_status = RemoteJobStatus::Running;

        let scenario = classify_resume(&journal, &item_with_record(record))
            .await
            .unwrap();
        assert_eq!(scenario, ResumeScenario::Reconnect);
    }

    #[tokio::test]
    async fn test_missing_job_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        let err = classify_resume(&journal, &item_with_record(JobRecord::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::MissingJobId(_)));
    }

    #[tokio::test]
    async fn test_persisted_failure_surfaces_directly() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        let mut record = JobRecord::new("j1", serde_json::json!({}));
        record.remote_status = RemoteJobStatus::Failed;
        record.error = Some("gpu quota exceeded".to_string());

        let err = classify_resume(&journal, &item_with_record(record))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::RemoteJobFailed(m) if m.contains("gpu quota")));
    }

    #[test]
    fn test_journal_write_skipped_only_for_loaded_cache_hit() {
        assert!(!journal_write_needed(
            SourceOrigin::ProjectLoad,
            ResumeScenario::CacheHit
        ));
        assert!(journal_write_needed(
            SourceOrigin::UserCreate,
            ResumeScenario::CacheHit
        ));
        assert!(journal_write_needed(
            SourceOrigin::ProjectLoad,
            ResumeScenario::Reconnect
        ));
    }

    #[test]
    fn test_media_type_hint() {
        let params = serde_json::json!({"mediaType": "image"});
        assert_eq!(
            media_type_from_params(&params, MediaType::Video),
            MediaType::Image
        );
        assert_eq!(
            media_type_from_params(&serde_json::json!({}), MediaType::Video),
            MediaType::Video
        );
    }
}
