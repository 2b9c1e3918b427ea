//! Reconnecting Stream Consumer
//!
//! Consumes the typed progress-event stream for one remote job, reconnecting
//! with exponential backoff and jitter on transport failure and terminating
//! only on a definitive terminal event. The consumer is idempotent to
//! restart: the server is queried by job id, so reconnecting simply
//! re-attaches to current remote state and progress fields are
//! last-write-wins.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::cancel::CancelToken;
use crate::error::{AcquireError, AcquireResult};
use crate::media::RemoteJobStatus;
use crate::remote::{RemoteJobApi, StreamEvent};

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Backoff configuration for stream reconnects
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Base delay for attempt 0
    pub base_delay: Duration,
    /// Cap applied before jitter
    pub max_delay: Duration,
    /// Jitter fraction, e.g. 0.2 for +-20%
    pub jitter: f64,
    /// Optional cap on total reconnect attempts. `None` reconnects forever,
    /// matching the polling path's opposite default; this is a host decision.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt`:
    /// `min(base * 2^attempt, max)` with +-jitter applied after the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis() as u64);

        let spread = self.jitter.clamp(0.0, 1.0);
        let factor = if spread > 0.0 {
            1.0 + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            1.0
        };

        Duration::from_millis((capped as f64 * factor).round() as u64)
    }
}

// =============================================================================
// Progress Observer
// =============================================================================

/// Callback seam between the consumer and the owning strategy/scheduler
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Fired exactly once per consumer lifetime, the first time the remote
    /// status is observed as running.
    async fn on_running(&self) -> AcquireResult<()>;

    /// Fired on every progress tick; last-write-wins
    async fn on_progress(&self, status: RemoteJobStatus, progress: f32, message: Option<&str>);
}

// =============================================================================
// Consumer
// =============================================================================

/// Reconnecting consumer over one logical job status channel
pub struct ReconnectingConsumer<'a> {
    api: &'a dyn RemoteJobApi,
    policy: ReconnectPolicy,
    token: CancelToken,
}

impl<'a> ReconnectingConsumer<'a> {
    /// Creates a consumer bound to a cancellation token
    pub fn new(api: &'a dyn RemoteJobApi, policy: ReconnectPolicy, token: CancelToken) -> Self {
        Self { api, policy, token }
    }

    /// Tracks the job until a terminal event.
    ///
    /// Returns the embedded result payload on success. Transport failures and
    /// server `error` events are absorbed by the reconnect loop; only terminal
    /// events, cancellation, or an exhausted attempt budget end it.
    pub async fn consume(
        &self,
        job_id: &str,
        observer: &dyn ProgressObserver,
    ) -> AcquireResult<Option<serde_json::Value>> {
        let mut attempt: u32 = 0;
        let mut running_signalled = false;

        loop {
            self.token.check()?;

            let opened = tokio::select! {
                res = self.api.open_status_stream(job_id) => res,
                _ = self.token.cancelled() => return Err(AcquireError::Cancelled),
            };

            let mut channel = match opened {
                Ok(channel) => channel,
                Err(e) if e.is_transport() => {
                    tracing::warn!(job_id, attempt, error = %e, "stream open failed");
                    self.backoff(job_id, &mut attempt).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            loop {
                let event = tokio::select! {
                    ev = channel.next_event() => ev,
                    _ = self.token.cancelled() => return Err(AcquireError::Cancelled),
                };

                match event {
                    Ok(Some(StreamEvent::ProgressUpdate {
                        status,
                        progress,
                        message,
                    })) => {
                        if status == RemoteJobStatus::Running && !running_signalled {
                            observer.on_running().await?;
                            running_signalled = true;
                        }
                        observer
                            .on_progress(status, progress, message.as_deref())
                            .await;
                    }
                    Ok(Some(StreamEvent::Final {
                        status,
                        message,
                        result,
                    })) => match status {
                        RemoteJobStatus::Succeeded => return Ok(result),
                        RemoteJobStatus::Failed => {
                            return Err(AcquireError::RemoteJobFailed(
                                message.unwrap_or_else(|| "remote job failed".to_string()),
                            ))
                        }
                        RemoteJobStatus::Cancelled => return Err(AcquireError::RemoteJobCancelled),
                        RemoteJobStatus::Queued | RemoteJobStatus::Running => {
                            // Malformed terminal event; treat the channel as broken.
                            tracing::warn!(job_id, ?status, "final event with non-terminal status");
                            break;
                        }
                    },
                    Ok(Some(StreamEvent::Error { message })) => {
                        tracing::warn!(job_id, %message, "server stream error, reconnecting");
                        break;
                    }
                    Ok(Some(StreamEvent::Heartbeat)) => {
                        tracing::trace!(job_id, "heartbeat");
                    }
                    Ok(Some(StreamEvent::NotFound)) => {
                        return Err(AcquireError::RemoteJobFailed(format!(
                            "remote job not found: {}",
                            job_id
                        )));
                    }
                    Ok(None) => {
                        tracing::debug!(job_id, "stream ended without terminal event");
                        break;
                    }
                    Err(e) if e.is_transport() => {
                        tracing::warn!(job_id, error = %e, "stream transport error, reconnecting");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            self.backoff(job_id, &mut attempt).await?;
        }
    }

    /// Sleeps the backoff delay for the current attempt, cancellable
    async fn backoff(&self, job_id: &str, attempt: &mut u32) -> AcquireResult<()> {
        if let Some(max) = self.policy.max_attempts {
            if *attempt >= max {
                return Err(AcquireError::Transport(format!(
                    "gave up on job {} after {} reconnect attempts",
                    job_id, attempt
                )));
            }
        }

        let delay = self.policy.delay_for(*attempt);
        tracing::debug!(job_id, attempt = *attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
        *attempt += 1;

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.token.cancelled() => Err(AcquireError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockJobApi;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        running: AtomicUsize,
        ticks: Mutex<Vec<(RemoteJobStatus, f32)>>,
    }

    #[async_trait]
    impl ProgressObserver for Recorder {
        async fn on_running(&self) -> AcquireResult<()> {
            self.running.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_progress(&self, status: RemoteJobStatus, progress: f32, _message: Option<&str>) {
            self.ticks.lock().unwrap().push((status, progress));
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter: 0.2,
            max_attempts: None,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
            max_attempts: None,
        };

        for attempt in 0..10u32 {
            let capped = (1000u64 * (1 << attempt)).min(60_000);
            let lo = (capped as f64 * 0.8).floor() as u64;
            let hi = (capped as f64 * 1.2).ceil() as u64;
            let delay = policy.delay_for(attempt).as_millis() as u64;
            assert!(
                delay >= lo && delay <= hi,
                "attempt {}: {}ms outside [{}, {}]",
                attempt,
                delay,
                lo,
                hi
            );
        }

        // Cap holds for absurd attempt counts too.
        let delay = policy.delay_for(63).as_millis() as u64;
        assert!(delay <= 72_000);
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: None,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_consume_happy_path_signals_running_once() {
        let api = MockJobApi::new();
        api.push_connection(vec![
            StreamEvent::ProgressUpdate {
                status: RemoteJobStatus::Queued,
                progress: 0.0,
                message: None,
            },
            StreamEvent::ProgressUpdate {
                status: RemoteJobStatus::Running,
                progress: 40.0,
                message: None,
            },
            StreamEvent::Final {
                status: RemoteJobStatus::Succeeded,
                message: None,
                result: Some(serde_json::json!({"url": "https://x/out.mp4"})),
            },
        ]);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), CancelToken::new());
        let result = consumer.consume("j1", &recorder).await.unwrap();

        assert_eq!(
            result,
            Some(serde_json::json!({"url": "https://x/out.mp4"}))
        );
        assert_eq!(recorder.running.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.ticks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_consume_reconnects_through_transport_failures() {
        let api = MockJobApi::new();
        api.push_connect_error("reset 1");
        api.push_connection(vec![StreamEvent::Error {
            message: "server hiccup".to_string(),
        }]);
        api.push_connection(vec![]); // EOF without terminal event
        api.push_connection(vec![StreamEvent::Final {
            status: RemoteJobStatus::Succeeded,
            message: None,
            result: None,
        }]);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), CancelToken::new());
        let result = consumer.consume("j1", &recorder).await.unwrap();

        assert_eq!(result, None);
        // Four stream opens: the failed one plus three successful attaches.
        let opens = api.calls().iter().filter(|c| c.starts_with("stream:")).count();
        assert_eq!(opens, 4);
    }

    #[tokio::test]
    async fn test_consume_terminal_failure_is_not_retried() {
        let api = MockJobApi::new();
        api.push_connection(vec![StreamEvent::Final {
            status: RemoteJobStatus::Failed,
            message: Some("out of credits".to_string()),
            result: None,
        }]);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), CancelToken::new());
        let err = consumer.consume("j1", &recorder).await.unwrap_err();

        assert!(matches!(err, AcquireError::RemoteJobFailed(m) if m.contains("out of credits")));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_consume_remote_cancellation() {
        let api = MockJobApi::new();
        api.push_connection(vec![StreamEvent::Final {
            status: RemoteJobStatus::Cancelled,
            message: None,
            result: None,
        }]);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), CancelToken::new());
        let err = consumer.consume("j1", &recorder).await.unwrap_err();
        assert!(matches!(err, AcquireError::RemoteJobCancelled));
    }

    #[tokio::test]
    async fn test_consume_not_found_is_terminal() {
        let api = MockJobApi::new();
        api.push_connection(vec![StreamEvent::NotFound]);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), CancelToken::new());
        let err = consumer.consume("j-gone", &recorder).await.unwrap_err();

        assert!(matches!(err, AcquireError::RemoteJobFailed(_)));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_consume_cancellation_beats_transport_error() {
        let api = MockJobApi::new(); // every open fails: no scripted connections

        let token = CancelToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, fast_policy(), token);
        let err = consumer.consume("j1", &recorder).await.unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled));
    }

    #[tokio::test]
    async fn test_consume_respects_attempt_budget() {
        let api = MockJobApi::new();
        let mut policy = fast_policy();
        policy.max_attempts = Some(2);

        let recorder = Recorder::default();
        let consumer = ReconnectingConsumer::new(&api, policy, CancelToken::new());
        let err = consumer.consume("j1", &recorder).await.unwrap_err();

        assert!(err.is_transport());
        let opens = api.calls().iter().filter(|c| c.starts_with("stream:")).count();
        assert_eq!(opens, 3); // attempts 0, 1, then budget exhausted
    }
}
