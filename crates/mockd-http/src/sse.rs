//! Server-Sent Events streaming
//!
//! When a matched mock's response declares an `sse` block, the handler
//! responds with `text/event-stream` and emits the declared events in
//! order, flushing per event, with `fixedDelay` pacing between them.
//! The stream ends after `maxEvents` (or the whole list), on client
//! disconnect, or on engine shutdown. An attached recorder session
//! journals every emitted event.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream};
use mockd_core::model::SseBlock;
use mockd_core::{RequestFingerprint, ShutdownToken, TemplateContext};
use mockd_recorder::{
    FileStore, FrameDirection, FrameKind, OriginMetadata, RecorderSession, StreamProtocol,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Recorder handle that finalizes the journal when the response stream
/// is dropped — whether it ran to completion or the client disconnected
/// midway. `on_complete` is idempotent, so both paths are safe.
pub(crate) struct SseRecording {
    store: Arc<FileStore>,
    session: RecorderSession,
}

impl SseRecording {
    pub(crate) fn session(&self) -> &RecorderSession {
        &self.session
    }
}

impl Drop for SseRecording {
    fn drop(&mut self) {
        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        tokio::spawn(async move {
            session.on_stream_end().await;
            store.finalize(&session).await;
        });
    }
}

/// Begin a recording session for an SSE response, if the store accepts
/// one (the byte cap may reject it — recording failure never fails the
/// response itself).
pub(crate) async fn start_sse_recording(
    store: &Arc<FileStore>,
    fp: &RequestFingerprint,
) -> Option<Arc<SseRecording>> {
    let origin = OriginMetadata {
        path: fp.path.clone(),
        method: fp.method.clone(),
        host: fp.header("host").unwrap_or_default().to_string(),
    };
    match store.begin(StreamProtocol::Sse, origin).await {
        Ok(session) => {
            session.on_stream_start().await;
            Some(Arc::new(SseRecording { store: Arc::clone(store), session }))
        }
        Err(e) => {
            warn!("sse recording not started: {e}");
            None
        }
    }
}

/// Build the streaming response.
pub(crate) fn sse_response(
    block: SseBlock,
    ctx: TemplateContext,
    recorder: Option<Arc<SseRecording>>,
    shutdown: ShutdownToken,
) -> Response {
    Sse::new(event_stream(block, ctx, recorder, shutdown))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
        .into_response()
}

/// The paced event stream. State carries the event index; dropping the
/// stream (completion or client disconnect) finalizes the recording.
fn event_stream(
    block: SseBlock,
    ctx: TemplateContext,
    recorder: Option<Arc<SseRecording>>,
    shutdown: ShutdownToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let limit = if block.max_events == 0 {
        block.events.len()
    } else {
        block.max_events.min(block.events.len())
    };

    stream::unfold(0usize, move |index| {
        let block = block.clone();
        let ctx = ctx.clone();
        let recorder = recorder.clone();
        let mut shutdown = shutdown.clone();

        Box::pin(async move {
            if index >= limit || shutdown.is_shutdown() {
                return None;
            }

            if block.fixed_delay_ms > 0 && index > 0 {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(block.fixed_delay_ms)) => {}
                    () = shutdown.cancelled() => return None,
                }
            }

            let declared = &block.events[index];
            let data = mockd_core::expand(&declared.data, &ctx);

            if let Some(recording) = &recorder {
                recording
                    .session()
                    .on_frame(
                        FrameDirection::ServerToClient,
                        FrameKind::Event,
                        data.as_bytes(),
                        declared.event.clone(),
                        declared.id.clone(),
                    )
                    .await;
            }

            let mut event = Event::default().data(data);
            if let Some(name) = &declared.event {
                event = event.event(name);
            }
            if let Some(id) = &declared.id {
                event = event.id(id);
            }
            Some((Ok(event), index + 1))
        })
    })
}
