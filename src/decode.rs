//! Decode Pipeline Seam
//!
//! External collaborator that turns a finished raw artifact into renderable
//! metadata. Decoding correctness is out of this engine's scope; failure here
//! routes the item to `error` like any other acquisition failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AcquireError, AcquireResult};
use crate::media::MediaItem;

/// Renderable metadata produced by the decode pipeline
#[derive(Clone, Debug)]
pub struct DecodedMedia {
    /// Provider/codec-specific metadata for the renderer
    pub metadata: serde_json::Value,
    /// Item duration in timeline frames
    pub duration_frames: u64,
}

/// Turns a finished raw artifact into renderable metadata
#[async_trait]
pub trait DecodePipeline: Send + Sync {
    /// Invoked exactly once per successful acquisition
    async fn process_media(&self, item: &MediaItem, artifact: &[u8]) -> AcquireResult<DecodedMedia>;
}

// =============================================================================
// Mock Pipeline for Testing
// =============================================================================

/// Recording mock pipeline
#[derive(Debug, Default)]
pub struct MockDecodePipeline {
    calls: AtomicUsize,
    artifacts: Mutex<Vec<Vec<u8>>>,
    fail_with: Mutex<Option<String>>,
}

impl MockDecodePipeline {
    /// Creates a succeeding mock pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every decode fail with the message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Mutex::new(Some(message.into())),
            ..Default::default()
        }
    }

    /// Number of decode invocations seen
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Artifacts handed to the pipeline, in order
    pub fn artifacts(&self) -> Vec<Vec<u8>> {
        self.artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecodePipeline for MockDecodePipeline {
    async fn process_media(&self, item: &MediaItem, artifact: &[u8]) -> AcquireResult<DecodedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.artifacts.lock().unwrap().push(artifact.to_vec());

        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(AcquireError::Decode(message));
        }

        Ok(DecodedMedia {
            metadata: serde_json::json!({
                "mediaId": item.id,
                "bytes": artifact.len(),
            }),
            duration_frames: 300,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{JobRecord, MediaType, Source};

    #[tokio::test]
    async fn test_mock_pipeline_records_calls() {
        let pipeline = MockDecodePipeline::new();
        let item = MediaItem::new(
            "m1",
            MediaType::Video,
            Source::AiGeneration(JobRecord::default()),
        );

        let decoded = pipeline.process_media(&item, b"abc").await.unwrap();
        assert_eq!(decoded.duration_frames, 300);
        assert_eq!(pipeline.call_count(), 1);
        assert_eq!(pipeline.artifacts(), vec![b"abc".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_pipeline_failure() {
        let pipeline = MockDecodePipeline::failing("bad container");
        let item = MediaItem::new(
            "m1",
            MediaType::Video,
            Source::AiGeneration(JobRecord::default()),
        );

        let err = pipeline.process_media(&item, b"abc").await.unwrap_err();
        assert!(matches!(err, AcquireError::Decode(_)));
    }
}
