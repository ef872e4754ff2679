//! gRPC wire codec
//!
//! Length-prefixed message framing (1-byte compressed flag + 4-byte
//! big-endian length) plus dynamic protobuf encode/decode through
//! `prost-reflect`: configured JSON response shapes become wire messages
//! of the method's output type, and inbound messages are decoded to JSON
//! for matching and templating.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mockd_core::{Error, Result};
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};

/// Canonical gRPC status numbers by name.
pub fn status_code(name: &str) -> i32 {
    match name.to_uppercase().as_str() {
        "OK" => 0,
        "CANCELLED" => 1,
        "UNKNOWN" => 2,
        "INVALID_ARGUMENT" => 3,
        "DEADLINE_EXCEEDED" => 4,
        "NOT_FOUND" => 5,
        "ALREADY_EXISTS" => 6,
        "PERMISSION_DENIED" => 7,
        "RESOURCE_EXHAUSTED" => 8,
        "FAILED_PRECONDITION" => 9,
        "ABORTED" => 10,
        "OUT_OF_RANGE" => 11,
        "UNIMPLEMENTED" => 12,
        "INTERNAL" => 13,
        "UNAVAILABLE" => 14,
        "DATA_LOSS" => 15,
        "UNAUTHENTICATED" => 16,
        _ => 2,
    }
}

/// Wrap an encoded message in a gRPC frame.
pub fn frame(message: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(message.len() + 5);
    out.put_u8(0);
    out.put_u32(message.len() as u32);
    out.put_slice(message);
    out.freeze()
}

/// Incremental frame extractor over the inbound byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if buffered.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < 5 {
            return Ok(None);
        }
        let compressed = self.buffer[0];
        if compressed != 0 {
            return Err(Error::protocol("compressed gRPC frames are not supported"));
        }
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if self.buffer.len() < 5 + length {
            return Ok(None);
        }
        self.buffer.advance(5);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

/// Encode a JSON value as a wire message of the given type.
pub fn encode_message(descriptor: &MessageDescriptor, json: &serde_json::Value) -> Result<Vec<u8>> {
    let json_str = json.to_string();
    let mut deserializer = serde_json::Deserializer::from_str(&json_str);
    let message = DynamicMessage::deserialize(descriptor.clone(), &mut deserializer)
        .map_err(|e| Error::validation(format!(
            "response does not match message {}: {e}",
            descriptor.full_name()
        )))?;
    Ok(message.encode_to_vec())
}

/// Decode a wire message into its JSON form.
pub fn decode_message(descriptor: &MessageDescriptor, bytes: &[u8]) -> Result<serde_json::Value> {
    let message = DynamicMessage::decode(descriptor.clone(), bytes)
        .map_err(|e| Error::protocol(format!("invalid {} message: {e}", descriptor.full_name())))?;
    serde_json::to_value(&message).map_err(Error::from)
}
