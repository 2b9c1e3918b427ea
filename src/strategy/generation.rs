//! Generic Remote Generation Strategy
//!
//! Acquisition for AI media-generation jobs with streaming progress.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AcquireResult;
use crate::media::{MediaType, ProviderKind};
use crate::remote::RemoteJobApi;
use crate::stream::ReconnectPolicy;

use super::{
    acquire_via_stream, classify_resume, journal_write_needed, materialize_result,
    media_type_from_params, refetch_result, AcquisitionStrategy, PreparedArtifact, ResumeScenario,
    TaskContext,
};

/// Streaming acquisition for generic generation jobs
pub struct GenerationStrategy {
    api: Arc<dyn RemoteJobApi>,
    policy: ReconnectPolicy,
}

impl GenerationStrategy {
    /// Creates a strategy over the remote API
    pub fn new(api: Arc<dyn RemoteJobApi>, policy: ReconnectPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl AcquisitionStrategy for GenerationStrategy {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Generation
    }

    async fn prepare_artifact(&self, ctx: &TaskContext) -> AcquireResult<PreparedArtifact> {
        let snapshot = ctx.snapshot().await;
        let scenario = classify_resume(&*ctx.journal, &snapshot).await?;
        let record = ctx.job_record().await?;
        let media_type = media_type_from_params(&record.params, MediaType::Video);

        tracing::info!(media_id = %snapshot.id, job_id = %record.job_id, ?scenario, "preparing generation artifact");

        let artifact = match scenario {
            ResumeScenario::CacheHit => ctx.journal.load_media_file(&snapshot.id).await?,
            ResumeScenario::Refetch => refetch_result(&*self.api, &record).await?,
            ResumeScenario::Reconnect => {
                let payload = acquire_via_stream(ctx, &*self.api, &self.policy).await?;
                materialize_result(&*self.api, &payload).await?
            }
        };

        Ok(PreparedArtifact {
            artifact,
            resulting_media_type: media_type,
            need_journal_write: journal_write_needed(snapshot.runtime.origin, scenario),
            need_artifact_write: scenario != ResumeScenario::CacheHit,
        })
    }

    async fn cancel_remote(&self, job_id: &str) -> AcquireResult<bool> {
        self.api.cancel(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::journal::{FsJournal, Journal};
    use crate::media::{JobRecord, MediaItem, RemoteJobStatus, Source, SourceOrigin};
    use crate::remote::{MockJobApi, StreamEvent};
    use std::time::Duration;
    use tokio::sync::RwLock;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter: 0.2,
            max_attempts: Some(5),
        }
    }

    async fn ctx_for(item: MediaItem, dir: &std::path::Path) -> TaskContext {
        TaskContext {
            item: Arc::new(RwLock::new(item)),
            journal: Arc::new(FsJournal::new(dir).unwrap()),
            token: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_performs_zero_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockJobApi::new());

        let mut record = JobRecord::new("j1", serde_json::json!({"mediaType": "video"}));
        record.remote_status = RemoteJobStatus::Succeeded;
        record.result_url = Some("https://x/out.mp4".to_string());
        let mut item = MediaItem::new("m1", MediaType::Video, Source::AiGeneration(record));
        item.runtime.origin = SourceOrigin::ProjectLoad;

        let ctx = ctx_for(item, dir.path()).await;
        ctx.journal.save_media_file(b"cached", "m1").await.unwrap();

        let strategy = GenerationStrategy::new(api.clone(), fast_policy());
        let prepared = strategy.prepare_artifact(&ctx).await.unwrap();

        assert_eq!(prepared.artifact, b"cached");
        assert!(!prepared.need_artifact_write);
        assert!(!prepared.need_journal_write);
        assert!(api.calls().is_empty(), "cache hit must not touch the network");
    }

    #[tokio::test]
    async fn test_refetch_downloads_without_repolling() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockJobApi::new());
        api.set_download("https://x/out.mp4", b"video-bytes".to_vec());

        let mut record = JobRecord::new("j1", serde_json::json!({}));
        record.remote_status = RemoteJobStatus::Succeeded;
        record.result_url = Some("https://x/out.mp4".to_string());
        let item = MediaItem::new("m1", MediaType::Video, Source::AiGeneration(record));

        let ctx = ctx_for(item, dir.path()).await;
        let strategy = GenerationStrategy::new(api.clone(), fast_policy());
        let prepared = strategy.prepare_artifact(&ctx).await.unwrap();

        assert_eq!(prepared.artifact, b"video-bytes");
        assert!(prepared.need_artifact_write);
        assert_eq!(api.calls(), vec!["download:https://x/out.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_streams_then_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockJobApi::new());
        api.push_connection(vec![
            StreamEvent::ProgressUpdate {
                status: RemoteJobStatus::Running,
                progress: 80.0,
                message: None,
            },
            StreamEvent::Final {
                status: RemoteJobStatus::Succeeded,
                message: None,
                result: Some(serde_json::json!({"url": "https://x/done.mp4"})),
            },
        ]);
        api.set_download("https://x/done.mp4", b"finished".to_vec());

        let record = JobRecord::new("j1", serde_json::json!({"mediaType": "video"}));
        let item = MediaItem::new("m1", MediaType::Video, Source::AiGeneration(record));

        let ctx = ctx_for(item, dir.path()).await;
        let strategy = GenerationStrategy::new(api.clone(), fast_policy());
        let prepared = strategy.prepare_artifact(&ctx).await.unwrap();

        assert_eq!(prepared.artifact, b"finished");

        // Terminal result must now be persisted on the record for refetch.
        let record = ctx.job_record().await.unwrap();
        assert_eq!(record.remote_status, RemoteJobStatus::Succeeded);
        assert_eq!(record.result_url.as_deref(), Some("https://x/done.mp4"));
    }
}
