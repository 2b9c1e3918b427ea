//! Persistence Journal
//!
//! The journal is the sole durable source of truth across reloads. Every
//! status transition on a task-owned media item is mirrored here before the
//! task settles, so a process restart can resume from the last durable state.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{AcquireError, AcquireResult};
use crate::media::MediaItem;

/// Durable per-item storage consumed by the engine.
///
/// Implementations must persist the full current source record; the engine
/// reconstructs all runtime state from it on reload.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Persists the item's metadata (including the source record)
    async fn save_meta_file(&self, item: &MediaItem) -> AcquireResult<bool>;

    /// Returns true when a previously downloaded artifact exists for the id
    async fn verify_media_file_exists(&self, id: &str) -> bool;

    /// Loads the artifact bytes for the id
    async fn load_media_file(&self, id: &str) -> AcquireResult<Vec<u8>>;

    /// Persists artifact bytes under the id
    async fn save_media_file(&self, data: &[u8], id: &str) -> AcquireResult<bool>;
}

// =============================================================================
// Filesystem Journal
// =============================================================================

/// Filesystem-backed journal: `{id}.json` metadata next to `{id}.bin`
/// artifacts under a root directory.
#[derive(Debug, Clone)]
pub struct FsJournal {
    root: PathBuf,
}

impl FsJournal {
    /// Creates a journal rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> AcquireResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_id(id)))
    }

    fn artifact_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", sanitize_id(id)))
    }

    /// Loads a persisted media item, with runtime state rebuilt for load
    pub async fn load_meta_file(&self, id: &str) -> AcquireResult<MediaItem> {
        let bytes = tokio::fs::read(self.meta_path(id))
            .await
            .map_err(|e| AcquireError::Journal(format!("read meta for {}: {}", id, e)))?;
        let mut item: MediaItem = serde_json::from_slice(&bytes)?;
        item.reset_runtime_for_load();
        Ok(item)
    }
}

/// Keeps journal filenames free of path traversal characters
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Journal for FsJournal {
    async fn save_meta_file(&self, item: &MediaItem) -> AcquireResult<bool> {
        let json = serde_json::to_vec_pretty(item)?;
        tokio::fs::write(self.meta_path(&item.id), json)
            .await
            .map_err(|e| AcquireError::Journal(format!("write meta for {}: {}", item.id, e)))?;
        tracing::debug!(media_id = %item.id, status = %item.status, "journaled media item");
        Ok(true)
    }

    async fn verify_media_file_exists(&self, id: &str) -> bool {
        tokio::fs::metadata(self.artifact_path(id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn load_media_file(&self, id: &str) -> AcquireResult<Vec<u8>> {
        tokio::fs::read(self.artifact_path(id))
            .await
            .map_err(|e| AcquireError::Journal(format!("read artifact for {}: {}", id, e)))
    }

    async fn save_media_file(&self, data: &[u8], id: &str) -> AcquireResult<bool> {
        tokio::fs::write(self.artifact_path(id), data)
            .await
            .map_err(|e| AcquireError::Journal(format!("write artifact for {}: {}", id, e)))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{JobRecord, MediaStatus, MediaType, Source, SourceOrigin};

    fn item() -> MediaItem {
        MediaItem::new(
            "media_journal",
            MediaType::Audio,
            Source::Asr(JobRecord::new("job_42", serde_json::json!({"lang": "en"}))),
        )
    }

    #[tokio::test]
    async fn test_meta_roundtrip_rebuilds_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        let mut m = item();
        m.transition(MediaStatus::AsyncProcessing).unwrap();
        m.runtime.progress = 55.0;
        journal.save_meta_file(&m).await.unwrap();

        let restored = journal.load_meta_file("media_journal").await.unwrap();
        assert_eq!(restored.status, MediaStatus::AsyncProcessing);
        assert_eq!(restored.runtime.progress, 0.0);
        assert_eq!(restored.runtime.origin, SourceOrigin::ProjectLoad);
        assert_eq!(restored.source.job_record().unwrap().job_id, "job_42");
    }

    #[tokio::test]
    async fn test_artifact_roundtrip_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        assert!(!journal.verify_media_file_exists("media_journal").await);

        journal
            .save_media_file(b"artifact-bytes", "media_journal")
            .await
            .unwrap();

        assert!(journal.verify_media_file_exists("media_journal").await);
        let bytes = journal.load_media_file("media_journal").await.unwrap();
        assert_eq!(bytes, b"artifact-bytes");
    }

    #[tokio::test]
    async fn test_ids_are_sanitized_for_paths() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FsJournal::new(dir.path()).unwrap();

        journal.save_media_file(b"x", "../evil/id").await.unwrap();
        assert!(journal.verify_media_file_exists("../evil/id").await);
        assert!(!dir.path().parent().unwrap().join("evil").exists());
    }
}
