//! BizyAir GPU Job Strategy
//!
//! Acquisition for the third-party GPU job service, which exposes no status
//! stream. Progress is tracked by polling under a wall-clock deadline and a
//! consecutive-error budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AcquireError, AcquireResult};
use crate::media::{MediaType, ProviderKind, RemoteJobStatus};
use crate::remote::{PollSnapshot, RemoteJobApi};

use super::{
    classify_resume, journal_write_needed, materialize_result, media_type_from_params,
    refetch_result, AcquisitionStrategy, PreparedArtifact, ResumeScenario, TaskContext,
};

// =============================================================================
// Poll Policy
// =============================================================================

/// Polling configuration for the BizyAir provider
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Delay between polls
    pub interval: Duration,
    /// Wall-clock ceiling for one acquisition; the task fails with a
    /// timeout once exceeded
    pub deadline: Duration,
    /// Consecutive transport failures tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(600),
            max_consecutive_errors: 5,
        }
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Polling acquisition for BizyAir GPU jobs
pub struct BizyAirStrategy {
    api: Arc<dyn RemoteJobApi>,
    policy: PollPolicy,
}

impl BizyAirStrategy {
    /// Creates a strategy over the remote API
    pub fn new(api: Arc<dyn RemoteJobApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    /// Polls the job to completion, returning the terminal snapshot
    async fn poll_until_complete(
        &self,
        ctx: &TaskContext,
        job_id: &str,
    ) -> AcquireResult<PollSnapshot> {
        let started = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            ctx.token.check()?;

            if started.elapsed() > self.policy.deadline {
                return Err(AcquireError::Timeout(format!(
                    "job {} exceeded polling deadline of {}s",
                    job_id,
                    self.policy.deadline.as_secs()
                )));
            }

            let polled = tokio::select! {
                res = self.api.fetch_result(job_id) => res,
                _ = ctx.token.cancelled() => return Err(AcquireError::Cancelled),
            };

            match polled {
                Ok(snapshot) => {
                    consecutive_errors = 0;
                    match snapshot.status {
                        RemoteJobStatus::Queued => {
                            ctx.on_poll_tick(&snapshot).await;
                        }
                        RemoteJobStatus::Running => {
                            ctx.mark_processing().await?;
                            ctx.on_poll_tick(&snapshot).await;
                        }
                        RemoteJobStatus::Succeeded => return Ok(snapshot),
                        RemoteJobStatus::Failed => {
                            return Err(AcquireError::RemoteJobFailed(
                                snapshot
                                    .message
                                    .unwrap_or_else(|| "remote job failed".to_string()),
                            ))
                        }
                        RemoteJobStatus::Cancelled => return Err(AcquireError::RemoteJobCancelled),
                    }
                }
                Err(e) if e.is_transport() => {
                    consecutive_errors += 1;
                    tracing::warn!(job_id, consecutive_errors, error = %e, "poll failed");
                    if consecutive_errors >= self.policy.max_consecutive_errors {
                        return Err(AcquireError::Transport(format!(
                            "gave up on job {} after {} consecutive poll errors",
                            job_id, consecutive_errors
                        )));
                    }
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.interval) => {}
                _ = ctx.token.cancelled() => return Err(AcquireError::Cancelled),
            }
        }
    }
}

impl TaskContext {
    /// Progress update from a poll snapshot; last-write-wins
    async fn on_poll_tick(&self, snapshot: &PollSnapshot) {
        let mut item = self.item.write().await;
        if let Some(progress) = snapshot.progress {
            item.runtime.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(record) = item.source.job_record_mut() {
            record.remote_status = snapshot.status;
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for BizyAirStrategy {
    fn provider(&self) -> ProviderKind {
        ProviderKind::BizyAir
    }

    async fn prepare_artifact(&self, ctx: &TaskContext) -> AcquireResult<PreparedArtifact> {
        let snapshot = ctx.snapshot().await;
        let scenario = classify_resume(&*ctx.journal, &snapshot).await?;
        let record = ctx.job_record().await?;
        let media_type = media_type_from_params(&record.params, MediaType::Video);

        tracing::info!(media_id = %snapshot.id, job_id = %record.job_id, ?scenario, "preparing gpu job artifact");

        let artifact = match scenario {
            ResumeScenario::CacheHit => ctx.journal.load_media_file(&snapshot.id).await?,
            ResumeScenario::Refetch => refetch_result(&*self.api, &record).await?,
            ResumeScenario::Reconnect => {
                let terminal = self.poll_until_complete(ctx, &record.job_id).await?;

                let url = terminal.result_url.clone();
                let payload = terminal.result_payload.clone();
                ctx.update_job_record({
                    let url = url.clone();
                    let payload = payload.clone();
                    move |record| {
                        record.remote_status = RemoteJobStatus::Succeeded;
                        record.result_url = url;
                        record.result_payload = payload;
                        record.error = None;
                    }
                })
                .await;

                if let Some(url) = url {
                    self.api.download(&url).await?
                } else if let Some(payload) = payload {
                    materialize_result(&*self.api, &payload).await?
                } else {
                    return Err(AcquireError::RemoteJobFailed(
                        "completed gpu job carried no result".to_string(),
                    ));
                }
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
