//! Resumable async media acquisition for project-based video editing.
//!
//! Media items backed by remote jobs (AI generation, speech recognition,
//! third-party GPU services) are acquired by background tasks that survive
//! application restarts: progress streams reconnect with jittered backoff,
//! finished results are re-fetched from persisted job records, and intact
//! local artifacts short-circuit the network entirely.
//!
//! The engine enforces one lifecycle state machine per item, bounds
//! concurrency per provider pool, deduplicates tasks by media item, and
//! mirrors every status change to an on-disk journal before a task settles.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::RwLock;
//! use reelcut_acquire::{
//!     AcquisitionEngine, EngineConfig, FsJournal, HttpJobApi, JobRecord, MediaItem, MediaType,
//!     MockDecodePipeline, Source,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpJobApi::new("https://jobs.example.com")?);
//! let journal = Arc::new(FsJournal::new("/tmp/project/media")?);
//! let decode = Arc::new(MockDecodePipeline::new());
//! let engine = AcquisitionEngine::new(api, journal, decode, EngineConfig::default());
//!
//! let item = MediaItem::new(
//!     "media_001",
//!     MediaType::Video,
//!     Source::AiGeneration(JobRecord::new("job_abc", serde_json::json!({"prompt": "sunrise"}))),
//! );
//! let task_id = engine.submit(Arc::new(RwLock::new(item))).await?;
//! # let _ = task_id;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod decode;
pub mod engine;
pub mod error;
pub mod journal;
pub mod media;
pub mod remote;
pub mod scheduler;
pub mod stream;
pub mod strategy;

pub use cancel::CancelToken;
pub use decode::{DecodePipeline, DecodedMedia, MockDecodePipeline};
pub use engine::{AcquisitionEngine, EngineConfig};
pub use error::{AcquireError, AcquireResult};
pub use journal::{FsJournal, Journal};
pub use media::{
    JobRecord, MediaId, MediaItem, MediaStatus, MediaType, ProviderKind, RemoteJobStatus, Source,
    SourceOrigin, TaskId,
};
pub use remote::{HttpJobApi, MockJobApi, PollSnapshot, RemoteJobApi, StreamEvent};
pub use scheduler::{SchedulerConfig, TaskInfo, TaskScheduler};
pub use strategy::{
    AcquisitionStrategy, AsrStrategy, BizyAirStrategy, GenerationStrategy, PollPolicy,
    PreparedArtifact, ResumeScenario, SharedMediaItem, TaskContext,
};
pub use stream::{ProgressObserver, ReconnectPolicy, ReconnectingConsumer};
