//! Replay sessions
//!
//! Journaled frames are emitted back on demand. Pure mode paces frames at
//! their original inter-arrival intervals scaled by `timing_scale`
//! (2.0 = double speed); triggered mode emits exactly one frame per
//! external nudge and idles in between.

use crate::journal::RecordedFrame;
use crate::store::FileStore;
use mockd_core::{Error, Result, ShutdownToken};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Replay pacing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    Pure,
    Triggered,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    Pending,
    Running,
    Complete,
    Stopped,
}

/// Request to start a replay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    pub recording_id: String,
    pub mode: String,
    /// Speed factor for pure mode; 1.0 replays in real time.
    #[serde(default = "default_scale")]
    pub timing_scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Client-visible session state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySession {
    pub id: String,
    pub recording_id: String,
    pub mode: ReplayMode,
    pub status: ReplayStatus,
    /// Next frame to emit (0-based).
    pub cursor: u64,
    pub total_frames: u64,
}

struct SessionState {
    session: ReplaySession,
    frames: Arc<Vec<RecordedFrame>>,
    emitter: mpsc::UnboundedSender<RecordedFrame>,
    driver: Option<tokio::task::JoinHandle<()>>,
}

/// Owns all live replay sessions.
pub struct ReplayController {
    store: Arc<FileStore>,
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
    shutdown: ShutdownToken,
}

impl ReplayController {
    pub fn new(store: Arc<FileStore>, shutdown: ShutdownToken) -> Self {
        Self { store, sessions: Arc::new(RwLock::new(HashMap::new())), shutdown }
    }

    /// Validate and start a replay. Returns the session (with
    /// `total_frames` from the rollup) and the receiving end of the
    /// emitted frame stream.
    pub async fn start_replay(
        &self,
        config: ReplayConfig,
    ) -> Result<(ReplaySession, mpsc::UnboundedReceiver<RecordedFrame>)> {
        let mode = match config.mode.as_str() {
            "pure" => ReplayMode::Pure,
            "triggered" => ReplayMode::Triggered,
            other => {
                return Err(Error::validation(format!("invalid replay mode {other:?}")));
            }
        };
        let meta = self
            .store
            .get(&config.recording_id)
            .await
            .map_err(|_| Error::not_found(format!("recording {}", config.recording_id)))?;
        let frames = Arc::new(self.store.frames(&config.recording_id).await?);

        let session = ReplaySession {
            id: uuid::Uuid::new_v4().to_string(),
            recording_id: config.recording_id.clone(),
            mode,
            status: if mode == ReplayMode::Pure { ReplayStatus::Running } else { ReplayStatus::Pending },
            cursor: 0,
            total_frames: meta.stats.frame_count,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = SessionState {
            session: session.clone(),
            frames: Arc::clone(&frames),
            emitter: tx.clone(),
            driver: None,
        };

        if mode == ReplayMode::Pure {
            let sessions = Arc::clone(&self.sessions);
            let session_id = session.id.clone();
            let scale = if config.timing_scale > 0.0 { config.timing_scale } else { 1.0 };
            let mut shutdown = self.shutdown.clone();
            state.driver = Some(tokio::spawn(async move {
                drive_pure(sessions, session_id, frames, tx, scale, &mut shutdown).await;
            }));
        }

        info!(
            session = %session.id,
            recording = %session.recording_id,
            ?mode,
            "replay session started"
        );
        self.sessions.write().await.insert(session.id.clone(), state);
        Ok((session, rx))
    }

    /// Triggered mode: emit the next frame. Returns the frame, or `None`
    /// once the journal is exhausted (session flips to complete).
    pub async fn next(&self, session_id: &str) -> Result<Option<RecordedFrame>> {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found(format!("replay session {session_id}")))?;
        if state.session.mode != ReplayMode::Triggered {
            return Err(Error::validation("session is not in triggered mode"));
        }
        let cursor = state.session.cursor as usize;
        if cursor >= state.frames.len() {
            state.session.status = ReplayStatus::Complete;
            return Ok(None);
        }
        let frame = state.frames[cursor].clone();
        state.session.cursor += 1;
        state.session.status = if state.session.cursor as usize == state.frames.len() {
            ReplayStatus::Complete
        } else {
            // Idle until the next nudge.
            ReplayStatus::Pending
        };
        let _ = state.emitter.send(frame.clone());
        Ok(Some(frame))
    }

    /// Stop and remove a session. Idempotent: unknown ids succeed.
    pub async fn stop_replay(&self, session_id: &str) {
        if let Some(state) = self.sessions.write().await.remove(session_id) {
            if let Some(driver) = state.driver {
                driver.abort();
            }
            debug!(session = session_id, "replay session stopped");
        }
    }

    /// Live sessions.
    pub async fn list_sessions(&self) -> Vec<ReplaySession> {
        self.sessions.read().await.values().map(|s| s.session.clone()).collect()
    }

    /// Current state of one session.
    pub async fn get_session(&self, session_id: &str) -> Result<ReplaySession> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.session.clone())
            .ok_or_else(|| Error::not_found(format!("replay session {session_id}")))
    }
}

/// Pure-mode driver: sleeps each original inter-frame gap divided by the
/// scale, emitting frames until exhaustion, stop, or shutdown.
async fn drive_pure(
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
    session_id: String,
    frames: Arc<Vec<RecordedFrame>>,
    tx: mpsc::UnboundedSender<RecordedFrame>,
    scale: f64,
    shutdown: &mut ShutdownToken,
) {
    let mut previous_ts = None;
    for (i, frame) in frames.iter().enumerate() {
        if let Some(prev) = previous_ts {
            let gap: chrono::Duration = frame.ts - prev;
            let millis = gap.num_milliseconds().max(0) as f64 / scale;
            let sleep = Duration::from_millis(millis as u64);
            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                () = shutdown.cancelled() => return,
            }
        }
        previous_ts = Some(frame.ts);
        if tx.send(frame.clone()).is_err() {
            break;
        }
        if let Some(state) = sessions.write().await.get_mut(&session_id) {
            state.session.cursor = i as u64 + 1;
        } else {
            // Session was stopped out from under us.
            return;
        }
    }
    if let Some(state) = sessions.write().await.get_mut(&session_id) {
        state.session.status = ReplayStatus::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{FrameDirection, FrameKind, OriginMetadata, StreamProtocol};
    use crate::store::StoreLimits;

    async fn seeded_store(frame_count: usize) -> (tempfile::TempDir, Arc<FileStore>, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreLimits::default()).await.unwrap();
        let session = store
            .begin(StreamProtocol::WebSocket, OriginMetadata::default())
            .await
            .unwrap();
        for i in 0..frame_count {
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
        session.on_complete().await.unwrap();
        store.finalize(&session).await;
        let id = session.id().await;
        (dir, store, id)
    }

    #[tokio::test]
    async fn triggered_mode_emits_one_frame_per_nudge() {
        let (_dir, store, recording_id) = seeded_store(3).await;
        let controller = ReplayController::new(store, ShutdownToken::never());
        let (session, _rx) = controller
            .start_replay(ReplayConfig {
                recording_id,
                mode: "triggered".to_string(),
                timing_scale: 1.0,
            })
            .await
            .unwrap();
        assert_eq!(session.status, ReplayStatus::Pending);
        assert_eq!(session.total_frames, 3);

        let f1 = controller.next(&session.id).await.unwrap().unwrap();
        assert_eq!(f1.seq, 1);
        assert_eq!(controller.get_session(&session.id).await.unwrap().status, ReplayStatus::Pending);

        controller.next(&session.id).await.unwrap().unwrap();
        let f3 = controller.next(&session.id).await.unwrap().unwrap();
        assert_eq!(f3.seq, 3);
        assert_eq!(
            controller.get_session(&session.id).await.unwrap().status,
            ReplayStatus::Complete
        );
        assert!(controller.next(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pure_mode_emits_all_frames_in_order() {
        let (_dir, store, recording_id) = seeded_store(4).await;
        let controller = ReplayController::new(store, ShutdownToken::never());
        let (session, mut rx) = controller
            .start_replay(ReplayConfig {
                recording_id,
                mode: "pure".to_string(),
                timing_scale: 100.0,
            })
            .await
            .unwrap();
        assert_eq!(session.status, ReplayStatus::Running);

        let mut seqs = Vec::new();
        while let Some(frame) = rx.recv().await {
            seqs.push(frame.seq);
            if seqs.len() == 4 {
                break;
            }
        }
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unknown_recording_and_mode_errors() {
        let (_dir, store, recording_id) = seeded_store(1).await;
        let controller = ReplayController::new(store, ShutdownToken::never());

        let err = controller
            .start_replay(ReplayConfig {
                recording_id: "missing".to_string(),
                mode: "pure".to_string(),
                timing_scale: 1.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = controller
            .start_replay(ReplayConfig {
                recording_id,
                mode: "warp".to_string(),
                timing_scale: 1.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_dir, store, recording_id) = seeded_store(2).await;
        let controller = ReplayController::new(store, ShutdownToken::never());
        let (session, _rx) = controller
            .start_replay(ReplayConfig {
                recording_id,
                mode: "triggered".to_string(),
                timing_scale: 1.0,
            })
            .await
            .unwrap();

        controller.stop_replay(&session.id).await;
        controller.stop_replay(&session.id).await;
        assert!(controller.list_sessions().await.is_empty());
    }
}
