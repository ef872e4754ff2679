//! Recording file store
//!
//! Coordinates recordings on disk under `<data-dir>/recordings/<id>/`.
//! Listing hides soft-deleted entries; `vacuum` physically removes them
//! and reports the bytes freed. A `max_bytes` cap rejects new recordings
//! once the store is full.

use crate::journal::{
    OriginMetadata, RecordedFrame, RecordingExport, RecordingMeta, RecordingStatus, RollupStats,
    StreamProtocol,
};
use crate::recorder::RecorderSession;
use chrono::Utc;
use mockd_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Store limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreLimits {
    /// Total on-disk budget for recordings; 0 disables the cap.
    pub max_bytes: u64,
    /// Warn when usage crosses this percentage of the cap.
    pub warn_percent: u8,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self { max_bytes: 0, warn_percent: 80 }
    }
}

/// List filter.
#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub protocol: Option<StreamProtocol>,
}

/// Aggregate counters for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub recording: usize,
    pub complete: usize,
    pub soft_deleted: usize,
    pub total_bytes: u64,
}

/// On-disk recording store.
pub struct FileStore {
    root: PathBuf,
    limits: StoreLimits,
    index: RwLock<HashMap<String, RecordingMeta>>,
}

impl FileStore {
    /// Open (and create) the store under `data_dir/recordings`, loading
    /// the index from any recordings already on disk.
    pub async fn open(data_dir: impl AsRef<Path>, limits: StoreLimits) -> Result<Arc<Self>> {
        let root = data_dir.as_ref().join("recordings");
        tokio::fs::create_dir_all(&root).await?;
        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join("meta.json");
            if !meta_path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&meta_path).await {
                Ok(text) => match serde_json::from_str::<RecordingMeta>(&text) {
                    Ok(meta) => {
                        index.insert(meta.id.clone(), meta);
                    }
                    Err(e) => warn!("skipping unreadable recording meta {}: {e}", meta_path.display()),
                },
                Err(e) => warn!("skipping recording dir {}: {e}", entry.path().display()),
            }
        }
        info!(count = index.len(), "recording store opened at {}", root.display());
        Ok(Arc::new(Self { root, limits, index: RwLock::new(index) }))
    }

    /// Begin a new recording session. Fails with `ResourceExhausted`
    /// when the byte cap is reached.
    pub async fn begin(
        &self,
        protocol: StreamProtocol,
        origin: OriginMetadata,
    ) -> Result<RecorderSession> {
        if self.limits.max_bytes > 0 {
            let used = self.total_bytes().await;
            if used >= self.limits.max_bytes {
                return Err(Error::exhausted(format!(
                    "recording store at {used} bytes, cap {}",
                    self.limits.max_bytes
                )));
            }
            let warn_at = self.limits.max_bytes * u64::from(self.limits.warn_percent) / 100;
            if used >= warn_at {
                warn!(
                    used,
                    cap = self.limits.max_bytes,
                    "recording store above warn threshold"
                );
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let meta = RecordingMeta {
            id: id.clone(),
            protocol,
            metadata: origin,
            start_time: Utc::now(),
            end_time: None,
            status: RecordingStatus::Recording,
            stats: RollupStats::default(),
        };
        self.index.write().await.insert(id.clone(), meta.clone());
        // The session owns the journal while recording; `finalize`
        // refreshes the index from its rollup on completion.
        match RecorderSession::open(self.root.join(&id), meta).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.index.write().await.remove(&id);
                Err(e)
            }
        }
    }

    /// Refresh the index entry for a finished session.
    pub async fn finalize(&self, session: &RecorderSession) {
        let meta = session.meta().await;
        self.index.write().await.insert(meta.id.clone(), meta);
    }

    /// List recordings, newest first, hiding soft-deleted entries.
    pub async fn list(&self, filter: &RecordingFilter) -> Vec<RecordingMeta> {
        let index = self.index.read().await;
        let mut result: Vec<RecordingMeta> = index
            .values()
            .filter(|m| m.status != RecordingStatus::Deleted)
            .filter(|m| filter.protocol.is_none_or(|p| m.protocol == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        result
    }

    /// Read one recording's metadata (soft-deleted included).
    pub async fn get(&self, id: &str) -> Result<RecordingMeta> {
        self.index
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("recording {id}")))
    }

    /// Read every journaled frame of a recording, in order.
    pub async fn frames(&self, id: &str) -> Result<Vec<RecordedFrame>> {
        let _ = self.get(id).await?;
        let path = self.root.join(id).join("journal.ndjson");
        let text = tokio::fs::read_to_string(&path).await?;
        let mut frames = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            frames.push(serde_json::from_str(line)?);
        }
        Ok(frames)
    }

    /// Soft-delete: flips the status and hides the recording from
    /// listing. The journal stays on disk until `vacuum`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let meta = index
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("recording {id}")))?;
        meta.status = RecordingStatus::Deleted;
        let meta = meta.clone();
        drop(index);
        let text = serde_json::to_string_pretty(&meta)?;
        tokio::fs::write(self.root.join(id).join("meta.json"), text).await?;
        Ok(())
    }

    /// Physically remove soft-deleted recordings. Returns the number of
    /// recordings removed and the bytes freed.
    pub async fn vacuum(&self) -> Result<(usize, u64)> {
        let deleted: Vec<String> = {
            let index = self.index.read().await;
            index
                .values()
                .filter(|m| m.status == RecordingStatus::Deleted)
                .map(|m| m.id.clone())
                .collect()
        };
        let mut removed = 0usize;
        let mut bytes_freed = 0u64;
        for id in deleted {
            let dir = self.root.join(&id);
            bytes_freed += dir_size(&dir).await;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    self.index.write().await.remove(&id);
                    removed += 1;
                }
                Err(e) => warn!("vacuum could not remove {}: {e}", dir.display()),
            }
        }
        info!(removed, bytes_freed, "recording store vacuumed");
        Ok((removed, bytes_freed))
    }

    /// Full JSON export of one recording.
    pub async fn export(&self, id: &str) -> Result<RecordingExport> {
        let meta = self.get(id).await?;
        let frames = self.frames(id).await?;
        Ok(RecordingExport { meta, frames })
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> StoreStats {
        let index = self.index.read().await;
        let mut stats = StoreStats {
            total: index.len(),
            recording: 0,
            complete: 0,
            soft_deleted: 0,
            total_bytes: 0,
        };
        for meta in index.values() {
            match meta.status {
                RecordingStatus::Recording => stats.recording += 1,
                RecordingStatus::Complete => stats.complete += 1,
                RecordingStatus::Deleted => stats.soft_deleted += 1,
            }
            stats.total_bytes += meta.stats.byte_count;
        }
        stats
    }

    async fn total_bytes(&self) -> u64 {
        dir_size(&self.root).await
    }
}

/// Recursive directory size; unreadable entries count as zero.
async fn dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{FrameDirection, FrameKind};

    async fn store_with_one_recording() -> (tempfile::TempDir, Arc<FileStore>, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreLimits::default()).await.unwrap();
        let session = store
            .begin(StreamProtocol::WebSocket, OriginMetadata {
                path: "/ws/echo".to_string(),
                method: "GET".to_string(),
                host: "localhost".to_string(),
            })
            .await
            .unwrap();
        for i in 0..5 {
            session
                .on_frame(
                    FrameDirection::ServerToClient,
                    FrameKind::Text,
                    format!("f{i}").as_bytes(),
                    None,
                    None,
                )
                .await;
        }
        session.on_close(1000, "bye").await;
        session.on_complete().await.unwrap();
        store.finalize(&session).await;
        let id = session.id().await;
        (dir, store, id)
    }

    #[tokio::test]
    async fn export_shape_and_frame_count() {
        let (_dir, store, id) = store_with_one_recording().await;
        let export = store.export(&id).await.unwrap();
        // 5 data frames plus the close frame.
        assert_eq!(export.meta.stats.frame_count, 6);
        assert_eq!(export.frames.len(), 6);
        for (i, frame) in export.frames.iter().enumerate() {
            assert_eq!(frame.seq, i as u64 + 1);
        }
        let json = serde_json::to_value(&export).unwrap();
        assert!(json["frames"][0]["payload_b64"].is_string());
        assert_eq!(json["status"], "complete");
    }

    #[tokio::test]
    async fn soft_delete_hides_then_vacuum_frees() {
        let (_dir, store, id) = store_with_one_recording().await;
        assert_eq!(store.list(&RecordingFilter::default()).await.len(), 1);

        store.delete(&id).await.unwrap();
        assert!(store.list(&RecordingFilter::default()).await.is_empty());
        // Still readable directly while soft-deleted.
        assert!(store.get(&id).await.is_ok());

        let (removed, bytes) = store.vacuum().await.unwrap();
        assert_eq!(removed, 1);
        assert!(bytes > 0);
        assert!(store.get(&id).await.is_err());
    }

    #[tokio::test]
    async fn vacuum_with_nothing_deleted_is_a_noop() {
        let (_dir, store, _id) = store_with_one_recording().await;
        let (removed, bytes) = store.vacuum().await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(bytes, 0);
    }

    #[tokio::test]
    async fn byte_cap_rejects_new_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreLimits { max_bytes: 1, warn_percent: 80 })
            .await
            .unwrap();
        // First recording consumes the budget...
        let session = store
            .begin(StreamProtocol::WebSocket, OriginMetadata::default())
            .await
            .unwrap();
        session
            .on_frame(FrameDirection::ServerToClient, FrameKind::Text, b"data", None, None)
            .await;
        session.on_complete().await.unwrap();
        store.finalize(&session).await;
        // ...so the next one is rejected.
        let err = store
            .begin(StreamProtocol::WebSocket, OriginMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let (dir, store, id) = store_with_one_recording().await;
        drop(store);
        let reopened = FileStore::open(dir.path(), StoreLimits::default()).await.unwrap();
        let meta = reopened.get(&id).await.unwrap();
        assert_eq!(meta.status, RecordingStatus::Complete);
        assert_eq!(meta.stats.frame_count, 6);
    }

    #[tokio::test]
    async fn protocol_filter() {
        let (_dir, store, _id) = store_with_one_recording().await;
        let ws = store
            .list(&RecordingFilter { protocol: Some(StreamProtocol::WebSocket) })
            .await;
        assert_eq!(ws.len(), 1);
        let sse = store
            .list(&RecordingFilter { protocol: Some(StreamProtocol::Sse) })
            .await;
        assert!(sse.is_empty());
    }
}
