//! Recording → mock conversion
//!
//! Turns a finished recording into a mock definition: WebSocket
//! recordings become script-mode WS mocks replaying the server→client
//! frames at their original pacing; SSE recordings become HTTP mocks
//! with an equivalent `sse` block.

use crate::journal::{FrameDirection, FrameKind, RecordedFrame, RecordingMeta, StreamProtocol};
use mockd_core::model::{
    HttpMatcher, HttpResponseSpec, HttpSpec, Mock, MockSpec, Protocol, SseBlock, SseEvent, WsMode,
    WsScriptFrame, WsSpec,
};
use mockd_core::Result;
use std::collections::HashMap;

/// Build a mock definition from a recording's metadata and frames.
pub fn recording_to_mock(meta: &RecordingMeta, frames: &[RecordedFrame]) -> Result<Mock> {
    let outbound: Vec<&RecordedFrame> = frames
        .iter()
        .filter(|f| f.direction == FrameDirection::ServerToClient && f.kind != FrameKind::Close)
        .collect();

    let mock = match meta.protocol {
        StreamProtocol::WebSocket => {
            let mut script = Vec::with_capacity(outbound.len());
            let mut previous_ts = None;
            for frame in &outbound {
                let delay_ms = previous_ts
                    .map(|prev: chrono::DateTime<chrono::Utc>| {
                        (frame.ts - prev).num_milliseconds().max(0) as u64
                    })
                    .unwrap_or(0);
                previous_ts = Some(frame.ts);
                script.push(WsScriptFrame {
                    data: String::from_utf8_lossy(&frame.payload_b64).into_owned(),
                    delay_ms,
                    binary: frame.kind == FrameKind::Binary,
                });
            }
            Mock {
                id: format!("replay-{}", meta.id),
                name: format!("Replay of {}", meta.id),
                enabled: true,
                protocol: Protocol::WebSocket,
                spec: MockSpec::WebSocket(WsSpec {
                    path: meta.metadata.path.clone(),
                    mode: WsMode::Script,
                    script,
                    close: None,
                }),
                priority: 0,
                workspace: None,
                created_at: None,
            }
        }
        StreamProtocol::Sse => {
            let events = outbound
                .iter()
                .map(|f| SseEvent {
                    event: f.event_name.clone(),
                    id: f.event_id.clone(),
                    data: String::from_utf8_lossy(&f.payload_b64).into_owned(),
                })
                .collect::<Vec<_>>();
            // Median-free approximation: reuse the average gap as the
            // fixed delay between replayed events.
            let fixed_delay_ms = average_gap_ms(&outbound);
            let max_events = events.len();
            Mock {
                id: format!("replay-{}", meta.id),
                name: format!("Replay of {}", meta.id),
                enabled: true,
                protocol: Protocol::Http,
                spec: MockSpec::Http(HttpSpec {
                    matcher: HttpMatcher {
                        method: Some(meta.metadata.method.clone()),
                        path: Some(meta.metadata.path.clone()),
                        ..Default::default()
                    },
                    response: HttpResponseSpec {
                        status: 200,
                        headers: HashMap::new(),
                        body: String::new(),
                        delay_ms: None,
                        sse: Some(SseBlock { events, fixed_delay_ms, max_events }),
                    },
                }),
                priority: 0,
                workspace: None,
                created_at: None,
            }
        }
    };
    mock.validate()?;
    Ok(mock)
}

fn average_gap_ms(frames: &[&RecordedFrame]) -> u64 {
    if frames.len() < 2 {
        return 0;
    }
    let total: i64 = frames
        .windows(2)
        .map(|pair| (pair[1].ts - pair[0].ts).num_milliseconds().max(0))
        .sum();
    (total / (frames.len() as i64 - 1)).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{OriginMetadata, RecordingStatus, RollupStats};
    use chrono::{Duration, Utc};

    fn frame(seq: u64, offset_ms: i64, direction: FrameDirection, payload: &str) -> RecordedFrame {
        RecordedFrame {
            seq,
            ts: Utc::now() + Duration::milliseconds(offset_ms),
            direction,
            kind: FrameKind::Text,
            payload_b64: payload.as_bytes().to_vec(),
            event_name: None,
            event_id: None,
        }
    }

    fn meta(protocol: StreamProtocol) -> RecordingMeta {
        RecordingMeta {
            id: "rec1".to_string(),
            protocol,
            metadata: OriginMetadata {
                path: "/ws/feed".to_string(),
                method: "GET".to_string(),
                host: String::new(),
            },
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            status: RecordingStatus::Complete,
            stats: RollupStats { frame_count: 3, byte_count: 9 },
        }
    }

    #[test]
    fn websocket_recording_becomes_script_mock() {
        let frames = vec![
            frame(1, 0, FrameDirection::ServerToClient, "a"),
            frame(2, 40, FrameDirection::ClientToServer, "ignored"),
            frame(3, 100, FrameDirection::ServerToClient, "b"),
        ];
        let mock = recording_to_mock(&meta(StreamProtocol::WebSocket), &frames).unwrap();
        assert_eq!(mock.protocol, Protocol::WebSocket);
        let MockSpec::WebSocket(spec) = &mock.spec else { panic!("wrong spec") };
        assert_eq!(spec.mode, WsMode::Script);
        assert_eq!(spec.script.len(), 2);
        assert_eq!(spec.script[0].data, "a");
        assert_eq!(spec.script[0].delay_ms, 0);
        assert_eq!(spec.script[1].data, "b");
        assert_eq!(spec.script[1].delay_ms, 100);
    }

    #[test]
    fn sse_recording_becomes_http_sse_mock() {
        let mut frames = vec![
            frame(1, 0, FrameDirection::ServerToClient, "e1"),
            frame(2, 100, FrameDirection::ServerToClient, "e2"),
        ];
        frames[0].kind = FrameKind::Event;
        frames[0].event_name = Some("update".to_string());
        frames[1].kind = FrameKind::Event;
        let mock = recording_to_mock(&meta(StreamProtocol::Sse), &frames).unwrap();
        let MockSpec::Http(spec) = &mock.spec else { panic!("wrong spec") };
        let sse = spec.response.sse.as_ref().unwrap();
        assert_eq!(sse.events.len(), 2);
        assert_eq!(sse.events[0].event.as_deref(), Some("update"));
        assert_eq!(sse.max_events, 2);
    }
}
