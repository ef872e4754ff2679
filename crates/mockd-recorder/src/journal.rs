//! Recording journal types
//!
//! A recording is `meta.json` plus `journal.ndjson` (one frame per line)
//! under `recordings/<id>/`. Frame sequence numbers start at 1 and are
//! strictly increasing with no gaps; timestamps are non-decreasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which stream protocol produced the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamProtocol {
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "sse")]
    Sse,
}

/// Recording lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Complete,
    Deleted,
}

/// Frame direction on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDirection {
    #[serde(rename = "client-server")]
    ClientToServer,
    #[serde(rename = "server-client")]
    ServerToClient,
}

/// Frame payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Text,
    Binary,
    /// SSE event.
    Event,
    /// WebSocket close marker.
    Close,
}

/// One journaled frame. `payload` is raw bytes in memory and base64 on
/// the wire/in the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFrame {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub direction: FrameDirection,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(rename = "payload_b64", with = "base64_bytes")]
    pub payload_b64: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Immutable recording metadata plus rollup stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub id: String,
    pub protocol: StreamProtocol,
    pub metadata: OriginMetadata,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: RecordingStatus,
    pub stats: RollupStats,
}

/// Where the recorded stream came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginMetadata {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub host: String,
}

/// Rollup written at completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupStats {
    pub frame_count: u64,
    pub byte_count: u64,
}

/// Full export document (§6 shape): metadata plus every frame in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingExport {
    #[serde(flatten)]
    pub meta: RecordingMeta,
    pub frames: Vec<RecordedFrame>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_payload_is_base64_on_the_wire() {
        let frame = RecordedFrame {
            seq: 1,
            ts: Utc::now(),
            direction: FrameDirection::ServerToClient,
            kind: FrameKind::Text,
            payload_b64: b"hello".to_vec(),
            event_name: None,
            event_id: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["payload_b64"], "aGVsbG8=");
        assert_eq!(json["type"], "text");
        let back: RecordedFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back.payload_b64, b"hello");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RecordingStatus::Complete).unwrap(), "complete");
        assert_eq!(serde_json::to_value(RecordingStatus::Deleted).unwrap(), "deleted");
    }
}
