//! Media Item Data Model
//!
//! The unit of work for the acquisition engine: a media item, its provider
//! source record, and the lifecycle state machine every item passes through
//! exactly once per transition.

use serde::{Deserialize, Serialize};

use crate::error::{AcquireError, AcquireResult};

/// Stable media item identifier (content-addressed by the caller)
pub type MediaId = String;

/// Acquisition task identifier
pub type TaskId = String;

// =============================================================================
// Media Type / Status
// =============================================================================

/// Kind of media an item resolves to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
    Audio,
    Text,
    #[default]
    Unknown,
}

/// Authoritative lifecycle status of a media item.
///
/// Transitions are only legal along the edges checked by
/// [`MediaStatus::can_transition`]; anything else is a programming error and
/// is rejected without mutating state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    /// Created, not yet handed to a remote job tracker
    #[default]
    Pending,
    /// Remote job is actively running
    AsyncProcessing,
    /// Artifact acquired, decode pipeline working
    Decoding,
    /// Decode succeeded; renderable metadata exists
    Ready,
    /// Failed with a stored, human-readable message
    Error,
    /// Cancelled by the user (terminal)
    Cancelled,
    /// Journal said ready but the artifact file is gone (load-time only)
    Missing,
}

impl MediaStatus {
    /// Returns true when `next` is a legal edge from this status
    pub fn can_transition(self, next: MediaStatus) -> bool {
        use MediaStatus::*;
        matches!(
            (self, next),
            (Pending, AsyncProcessing)
                | (Pending, Cancelled)
                | (Pending, Error)
                | (AsyncProcessing, Decoding)
                | (AsyncProcessing, Error)
                | (Decoding, Ready)
                | (Decoding, Error)
                | (Error, Pending)
                | (Missing, Pending)
        )
    }

    /// Returns true for statuses this engine will never move an item out of
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaStatus::Ready | MediaStatus::Cancelled)
    }
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaStatus::Pending => "pending",
            MediaStatus::AsyncProcessing => "asyncprocessing",
            MediaStatus::Decoding => "decoding",
            MediaStatus::Ready => "ready",
            MediaStatus::Error => "error",
            MediaStatus::Cancelled => "cancelled",
            MediaStatus::Missing => "missing",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Remote Job Record
// =============================================================================

/// Last known status of the remote job backing a source record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RemoteJobStatus {
    /// Returns true when the remote job will not progress further
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteJobStatus::Succeeded | RemoteJobStatus::Failed | RemoteJobStatus::Cancelled
        )
    }
}

/// Persisted provider-specific job record.
///
/// This is the durable subset: never live handles, streaming progress, or
/// cancellation tokens. Those are runtime-only and reconstructed on reload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Remote job id
    pub job_id: String,
    /// Original request parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Last known remote status
    #[serde(default)]
    pub remote_status: RemoteJobStatus,
    /// Result locator, when the remote job finished with a downloadable URL
    #[serde(default)]
    pub result_url: Option<String>,
    /// Inline result payload, when the remote job returned one
    #[serde(default)]
    pub result_payload: Option<serde_json::Value>,
    /// Stored failure message
    #[serde(default)]
    pub error: Option<String>,
}

impl JobRecord {
    /// Creates a record for a freshly submitted remote job
    pub fn new(job_id: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            job_id: job_id.into(),
            params,
            ..Default::default()
        }
    }

    /// Returns true when a terminal success result is already persisted
    pub fn has_complete_result(&self) -> bool {
        self.remote_status == RemoteJobStatus::Succeeded
            && (self.result_url.is_some() || self.result_payload.is_some())
    }
}

// =============================================================================
// Source
// =============================================================================

/// Which provider pool a source belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Generic remote generation job (streaming progress)
    Generation,
    /// Speech recognition / transcription job (streaming progress)
    SpeechRecognition,
    /// Third-party GPU job service (polling)
    BizyAir,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Generation => write!(f, "generation"),
            ProviderKind::SpeechRecognition => write!(f, "asr"),
            ProviderKind::BizyAir => write!(f, "bizyair"),
        }
    }
}

/// Where a media item's bytes come from.
///
/// Closed union over the four source variants; the compiler enforces
/// completeness when a provider is added.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Source {
    /// File the user picked locally; never goes through the engine
    UserSelected { uri: String },
    /// AI media generation job
    AiGeneration(JobRecord),
    /// Speech recognition job
    Asr(JobRecord),
    /// BizyAir GPU job
    Bizyair(JobRecord),
}

impl Source {
    /// Returns the provider pool for remote-backed sources
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            Source::UserSelected { .. } => None,
            Source::AiGeneration(_) => Some(ProviderKind::Generation),
            Source::Asr(_) => Some(ProviderKind::SpeechRecognition),
            Source::Bizyair(_) => Some(ProviderKind::BizyAir),
        }
    }

    /// Returns the persisted job record for remote-backed sources
    pub fn job_record(&self) -> Option<&JobRecord> {
        match self {
            Source::UserSelected { .. } => None,
            Source::AiGeneration(record) | Source::Asr(record) | Source::Bizyair(record) => {
                Some(record)
            }
        }
    }

    /// Mutable access to the persisted job record
    pub fn job_record_mut(&mut self) -> Option<&mut JobRecord> {
        match self {
            Source::UserSelected { .. } => None,
            Source::AiGeneration(record) | Source::Asr(record) | Source::Bizyair(record) => {
                Some(record)
            }
        }
    }
}

// =============================================================================
// Runtime State
// =============================================================================

/// How the item entered this process; decides whether a cache hit still
/// needs a journal pre-write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceOrigin {
    #[default]
    UserCreate,
    ProjectLoad,
}

/// Non-persisted, per-load runtime state. Rebuilt fresh on every load.
#[derive(Clone, Debug, Default)]
pub struct RuntimeState {
    /// Remote progress, 0-100
    pub progress: f32,
    /// Last failure message for UI display
    pub error_message: Option<String>,
    /// Creation origin
    pub origin: SourceOrigin,
    /// Renderable metadata produced by the decode pipeline
    pub decoded: Option<serde_json::Value>,
}

// =============================================================================
// Media Item
// =============================================================================

/// The unit of acquisition work
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Stable id, content-addressed by the caller
    pub id: MediaId,
    /// Kind of media this item resolves to
    pub media_type: MediaType,
    /// Lifecycle status; mutate only through [`MediaItem::transition`]
    pub status: MediaStatus,
    /// Duration in timeline frames, known after decode
    pub duration_frames: u64,
    /// Provider source record
    pub source: Source,
    /// Runtime-only state, skipped on persist
    #[serde(skip)]
    pub runtime: RuntimeState,
}

impl MediaItem {
    /// Creates a new pending item
    pub fn new(id: impl Into<MediaId>, media_type: MediaType, source: Source) -> Self {
        Self {
            id: id.into(),
            media_type,
            status: MediaStatus::Pending,
            duration_frames: 0,
            source,
            runtime: RuntimeState::default(),
        }
    }

    /// Attempts a status transition.
    ///
    /// Illegal edges are rejected, logged, and leave the item untouched.
    pub fn transition(&mut self, next: MediaStatus) -> AcquireResult<()> {
        if !self.status.can_transition(next) {
            tracing::warn!(
                media_id = %self.id,
                from = %self.status,
                to = %next,
                "rejected illegal media status transition"
            );
            return Err(AcquireError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(media_id = %self.id, from = %self.status, to = %next, "media status transition");
        self.status = next;
        Ok(())
    }

    /// Records a failure message and moves the item to `Error`
    pub fn fail(&mut self, message: impl Into<String>) -> AcquireResult<()> {
        let message = message.into();
        self.runtime.error_message = Some(message.clone());
        if let Some(record) = self.source.job_record_mut() {
            record.error = Some(message);
        }
        self.transition(MediaStatus::Error)
    }

    /// Load-time audit: journal reported `Ready` but the artifact is gone.
    ///
    /// `Missing` is only entered here, never at runtime, so this bypasses the
    /// runtime edge set on purpose.
    pub fn mark_missing_on_load(&mut self) {
        if self.status == MediaStatus::Ready {
            tracing::warn!(media_id = %self.id, "artifact absent on load, marking missing");
            self.status = MediaStatus::Missing;
        }
    }

    /// Load-time reset: an item persisted mid-acquisition resumes from
    /// `Pending`. Only entered on load, so this bypasses the runtime edge
    /// set like [`MediaItem::mark_missing_on_load`].
    pub fn reset_in_flight_on_load(&mut self) {
        if matches!(
            self.status,
            MediaStatus::AsyncProcessing | MediaStatus::Decoding
        ) {
            tracing::debug!(media_id = %self.id, from = %self.status, "in-flight item reset to pending on load");
            self.status = MediaStatus::Pending;
        }
    }

    /// Rebuilds runtime state for an item restored from the journal
    pub fn reset_runtime_for_load(&mut self) {
        self.runtime = RuntimeState {
            origin: SourceOrigin::ProjectLoad,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> MediaItem {
        MediaItem::new(
            "media_001",
            MediaType::Video,
            Source::AiGeneration(JobRecord::new("job_1", serde_json::json!({}))),
        )
    }

    #[test]
    fn test_legal_transition_chain() {
        let mut m = item();
        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.transition(MediaStatus::Decoding).unwrap();
        m.transition(MediaStatus::Ready).unwrap();
        assert_eq!(m.status, MediaStatus::Ready);
    }

    #[test]
    fn test_illegal_transition_rejected_state_unchanged() {
        let mut m = item();
        let err = m.transition(MediaStatus::Ready).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidTransition { .. }));
        assert_eq!(m.status, MediaStatus::Pending);
    }

    #[test]
    fn test_ready_is_terminal() {
        let mut m = item();
        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.transition(MediaStatus::Decoding).unwrap();
        m.transition(MediaStatus::Ready).unwrap();

        assert!(m.transition(MediaStatus::Pending).is_err());
        assert!(m.transition(MediaStatus::Error).is_err());
        assert_eq!(m.status, MediaStatus::Ready);
    }

    #[test]
    fn test_error_allows_manual_retry_only() {
        let mut m = item();
        m.fail("remote exploded").unwrap();
        assert_eq!(m.status, MediaStatus::Error);
        assert_eq!(m.runtime.error_message.as_deref(), Some("remote exploded"));

        m.transition(MediaStatus::Pending).unwrap();
        assert_eq!(m.status, MediaStatus::Pending);
    }

    #[test]
    fn test_missing_entered_only_from_ready_on_load() {
        let mut m = item();
        m.mark_missing_on_load();
        assert_eq!(m.status, MediaStatus::Pending);

        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.transition(MediaStatus::Decoding).unwrap();
        m.transition(MediaStatus::Ready).unwrap();
        m.mark_missing_on_load();
        assert_eq!(m.status, MediaStatus::Missing);

        // Missing allows re-acquisition.
        m.transition(MediaStatus::Pending).unwrap();
    }

    #[test]
    fn test_in_flight_reset_only_touches_interrupted_items() {
        let mut m = item();
        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.reset_in_flight_on_load();
        assert_eq!(m.status, MediaStatus::Pending);

        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.transition(MediaStatus::Decoding).unwrap();
        m.transition(MediaStatus::Ready).unwrap();
        m.reset_in_flight_on_load();
        assert_eq!(m.status, MediaStatus::Ready);
    }

    #[test]
    fn test_runtime_not_persisted() {
        let mut m = item();
        m.runtime.progress = 42.0;
        m.runtime.error_message = Some("x".to_string());

        let json = serde_json::to_string(&m).unwrap();
        let restored: MediaItem = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.runtime.progress, 0.0);
        assert!(restored.runtime.error_message.is_none());
    }

    #[test]
    fn test_job_record_complete_result() {
        let mut record = JobRecord::new("job_1", serde_json::json!({}));
        assert!(!record.has_complete_result());

        record.remote_status = RemoteJobStatus::Succeeded;
        assert!(!record.has_complete_result());

        record.result_url = Some("https://example.com/out.mp4".to_string());
        assert!(record.has_complete_result());
    }

    #[test]
    fn test_source_provider_routing() {
        let user = Source::UserSelected {
            uri: "file:///clip.mp4".to_string(),
        };
        assert_eq!(user.provider(), None);

        let asr = Source::Asr(JobRecord::default());
        assert_eq!(asr.provider(), Some(ProviderKind::SpeechRecognition));

        let gpu = Source::Bizyair(JobRecord::default());
        assert_eq!(gpu.provider(), Some(ProviderKind::BizyAir));
    }
}
