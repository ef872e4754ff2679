//! Active recording sessions
//!
//! One session per recorded connection. Frames are stamped (seq,
//! timestamp) at hook entry under the session's own lock, buffered, and
//! flushed to the ndjson journal in batches. Sessions are fully isolated:
//! session A's hooks never serialize behind session B's.

use crate::journal::{
    FrameDirection, FrameKind, RecordedFrame, RecordingMeta, RecordingStatus, RollupStats,
};
use chrono::Utc;
use mockd_core::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Flush the write buffer once this many frames accumulate.
const FLUSH_THRESHOLD: usize = 32;

struct SessionInner {
    meta: RecordingMeta,
    next_seq: u64,
    byte_count: u64,
    buffer: Vec<String>,
    writer: Option<tokio::fs::File>,
    finalized: bool,
}

/// Handle to one active recording. Clonable; all hooks go through the
/// session's own mutex.
#[derive(Clone)]
pub struct RecorderSession {
    dir: PathBuf,
    inner: Arc<Mutex<SessionInner>>,
}

impl std::fmt::Debug for RecorderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderSession")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl RecorderSession {
    /// Open a session directory and its journal file.
    pub(crate) async fn open(dir: PathBuf, meta: RecordingMeta) -> Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        let writer = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("journal.ndjson"))
            .await?;
        let session = Self {
            dir: dir.clone(),
            inner: Arc::new(Mutex::new(SessionInner {
                meta,
                next_seq: 1,
                byte_count: 0,
                buffer: Vec::new(),
                writer: Some(writer),
                finalized: false,
            })),
        };
        session.write_meta().await?;
        Ok(session)
    }

    /// Recording id.
    pub async fn id(&self) -> String {
        self.inner.lock().await.meta.id.clone()
    }

    /// Record one frame. Seq and timestamp are assigned here, so ordering
    /// within the session follows hook-entry order.
    pub async fn on_frame(
        &self,
        direction: FrameDirection,
        kind: FrameKind,
        payload: &[u8],
        event_name: Option<String>,
        event_id: Option<String>,
    ) {
        let mut inner = self.inner.lock().await;
        if inner.finalized {
            return;
        }
        let frame = RecordedFrame {
            seq: inner.next_seq,
            ts: Utc::now(),
            direction,
            kind,
            payload_b64: payload.to_vec(),
            event_name,
            event_id,
        };
        inner.next_seq += 1;
        inner.byte_count += payload.len() as u64;
        match serde_json::to_string(&frame) {
            Ok(line) => inner.buffer.push(line),
            Err(e) => warn!("failed to encode journal frame: {e}"),
        }
        if inner.buffer.len() >= FLUSH_THRESHOLD {
            if let Err(e) = flush_buffer(&mut inner).await {
                warn!("journal flush failed: {e}");
            }
        }
    }

    /// WebSocket close hook: journals a close frame carrying code+reason.
    pub async fn on_close(&self, code: u16, reason: &str) {
        let payload = format!("{code} {reason}");
        self.on_frame(
            FrameDirection::ClientToServer,
            FrameKind::Close,
            payload.as_bytes(),
            None,
            None,
        )
        .await;
    }

    /// SSE stream start hook.
    pub async fn on_stream_start(&self) {
        debug!("sse recording stream started");
    }

    /// SSE stream end hook: finalizes the recording.
    pub async fn on_stream_end(&self) {
        if let Err(e) = self.on_complete().await {
            warn!("failed to finalize sse recording: {e}");
        }
    }

    /// Flush, write the rollup and flip status to complete. Idempotent.
    pub async fn on_complete(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.finalized {
            return Ok(());
        }
        flush_buffer(&mut inner).await?;
        if let Some(writer) = inner.writer.take() {
            writer.sync_all().await.ok();
        }
        inner.meta.status = RecordingStatus::Complete;
        inner.meta.end_time = Some(Utc::now());
        inner.meta.stats = RollupStats {
            frame_count: inner.next_seq - 1,
            byte_count: inner.byte_count,
        };
        inner.finalized = true;
        let meta = inner.meta.clone();
        drop(inner);
        self.persist_meta(&meta).await
    }

    /// Finalized metadata snapshot.
    pub async fn meta(&self) -> RecordingMeta {
        self.inner.lock().await.meta.clone()
    }

    async fn write_meta(&self) -> Result<()> {
        let meta = self.inner.lock().await.meta.clone();
        self.persist_meta(&meta).await
    }

    async fn persist_meta(&self, meta: &RecordingMeta) -> Result<()> {
        let text = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(self.dir.join("meta.json"), text).await?;
        Ok(())
    }
}

async fn flush_buffer(inner: &mut SessionInner) -> Result<()> {
    if inner.buffer.is_empty() {
        return Ok(());
    }
    let mut chunk = inner.buffer.join("\n");
    chunk.push('\n');
    inner.buffer.clear();
    if let Some(writer) = inner.writer.as_mut() {
        writer.write_all(chunk.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
