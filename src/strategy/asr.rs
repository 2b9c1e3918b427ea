//! Speech Recognition Strategy
//!
//! Acquisition for remote transcription jobs. The terminal result is the
//! transcript itself, so the artifact is usually the serialized payload
//! rather than a download.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AcquireResult;
use crate::media::{MediaType, ProviderKind};
use crate::remote::RemoteJobApi;
use crate::stream::ReconnectPolicy;

use super::{
    acquire_via_stream, classify_resume, journal_write_needed, materialize_result, refetch_result,
    AcquisitionStrategy, PreparedArtifact, ResumeScenario, TaskContext,
};

/// Streaming acquisition for speech recognition jobs
pub struct AsrStrategy {
    api: Arc<dyn RemoteJobApi>,
    policy: ReconnectPolicy,
}

impl AsrStrategy {
    /// Creates a strategy over the remote API
    pub fn new(api: Arc<dyn RemoteJobApi>, policy: ReconnectPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl AcquisitionStrategy for AsrStrategy {
    fn provider(&self) -> ProviderKind {
        ProviderKind::SpeechRecognition
    }

    async fn prepare_artifact(&self, ctx: &TaskContext) -> AcquireResult<PreparedArtifact> {
        let snapshot = ctx.snapshot().await;
        let scenario = classify_resume(&*ctx.journal, &snapshot).await?;
        let record = ctx.job_record().await?;

        tracing::info!(media_id = %snapshot.id, job_id = %record.job_id, ?scenario, "preparing transcript artifact");

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
            resulting_media_type: MediaType::Text,
            need_journal_write: journal_write_needed(snapshot.runtime.origin, scenario),
            need_artifact_write: scenario != ResumeScenario::CacheHit,
        })
    }

    async fn cancel_remote(&self, job_id: &str) -> AcquireResult<bool> {
        self.api.cancel(job_id).await
    }
}
