//! MQTT 3.1.1 packet encoding and decoding
//!
//! Covers every control packet the broker speaks: CONNECT/CONNACK,
//! PUBLISH and the QoS 1/2 acknowledgment family, SUBSCRIBE/SUBACK,
//! UNSUBSCRIBE/UNSUBACK, PING and DISCONNECT. The codec is split into a
//! pure byte-level layer (testable without sockets) and async
//! read/write adapters over tokio streams.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted packet; CONNECT floods beyond this are cut off.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("invalid QoS level: {0}")]
    InvalidQoS(u8),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("malformed packet")]
    Malformed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ProtocolError::InvalidQoS(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Effective delivery QoS: min of publish and subscription.
    pub fn min_with(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }
}

/// CONNACK return codes (3.1.1 table 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

/// Last Will and Testament carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// A decoded control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        clean_session: bool,
        keep_alive: u16,
        will: Option<Will>,
        username: Option<String>,
        password: Option<Vec<u8>>,
    },
    Connack {
        session_present: bool,
        code: ConnectReturnCode,
    },
    Publish {
        dup: bool,
        qos: QoS,
        retain: bool,
        topic: String,
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    Puback(u16),
    Pubrec(u16),
    Pubrel(u16),
    Pubcomp(u16),
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, QoS)>,
    },
    Suback {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    Unsuback(u16),
    Pingreq,
    Pingresp,
    Disconnect,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize a packet to wire bytes.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let (first, body) = match packet {
        Packet::Connect { client_id, clean_session, keep_alive, will, username, password } => {
            let mut body = Vec::new();
            write_string(&mut body, "MQTT");
            body.push(4); // protocol level 3.1.1
            let mut flags = 0u8;
            if *clean_session {
                flags |= 0x02;
            }
            if let Some(will) = will {
                flags |= 0x04 | (will.qos.as_u8() << 3);
                if will.retain {
                    flags |= 0x20;
                }
            }
            if password.is_some() {
                flags |= 0x40;
            }
            if username.is_some() {
                flags |= 0x80;
            }
            body.push(flags);
            body.extend_from_slice(&keep_alive.to_be_bytes());
            write_string(&mut body, client_id);
            if let Some(will) = will {
                write_string(&mut body, &will.topic);
                write_bytes(&mut body, &will.message);
            }
            if let Some(username) = username {
                write_string(&mut body, username);
            }
            if let Some(password) = password {
                write_bytes(&mut body, password);
            }
            (0x10, body)
        }
        Packet::Connack { session_present, code } => {
            (0x20, vec![u8::from(*session_present), *code as u8])
        }
        Packet::Publish { dup, qos, retain, topic, packet_id, payload } => {
            let mut first = 0x30;
            if *dup {
                first |= 0x08;
            }
            first |= qos.as_u8() << 1;
            if *retain {
                first |= 0x01;
            }
            let mut body = Vec::new();
            write_string(&mut body, topic);
            if *qos != QoS::AtMostOnce {
                body.extend_from_slice(&packet_id.unwrap_or(0).to_be_bytes());
            }
            body.extend_from_slice(payload);
            (first, body)
        }
        Packet::Puback(id) => (0x40, id.to_be_bytes().to_vec()),
        Packet::Pubrec(id) => (0x50, id.to_be_bytes().to_vec()),
        Packet::Pubrel(id) => (0x62, id.to_be_bytes().to_vec()),
        Packet::Pubcomp(id) => (0x70, id.to_be_bytes().to_vec()),
        Packet::Subscribe { packet_id, filters } => {
            let mut body = packet_id.to_be_bytes().to_vec();
            for (filter, qos) in filters {
                write_string(&mut body, filter);
                body.push(qos.as_u8());
            }
            (0x82, body)
        }
        Packet::Suback { packet_id, return_codes } => {
            let mut body = packet_id.to_be_bytes().to_vec();
            body.extend_from_slice(return_codes);
            (0x90, body)
        }
        Packet::Unsubscribe { packet_id, filters } => {
            let mut body = packet_id.to_be_bytes().to_vec();
            for filter in filters {
                write_string(&mut body, filter);
            }
            (0xA2, body)
        }
        Packet::Unsuback(id) => (0xB0, id.to_be_bytes().to_vec()),
        Packet::Pingreq => (0xC0, Vec::new()),
        Packet::Pingresp => (0xD0, Vec::new()),
        Packet::Disconnect => (0xE0, Vec::new()),
    };

    let mut out = vec![first];
    encode_remaining_length(&mut out, body.len());
    out.extend_from_slice(&body);
    out
}

fn encode_remaining_length(out: &mut Vec<u8>, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}

fn write_string(out: &mut Vec<u8>, text: &str) {
    write_bytes(out, text.as_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse one packet from its fixed-header byte and body.
pub fn parse(first: u8, body: &[u8]) -> ProtocolResult<Packet> {
    let packet_type = first >> 4;
    let flags = first & 0x0F;
    let mut cursor = Cursor { data: body, pos: 0 };

    match packet_type {
        1 => parse_connect(&mut cursor),
        2 => {
            let session_present = cursor.take_u8()? & 0x01 != 0;
            let code = match cursor.take_u8()? {
                0 => ConnectReturnCode::Accepted,
                1 => ConnectReturnCode::UnacceptableProtocolVersion,
                2 => ConnectReturnCode::IdentifierRejected,
                3 => ConnectReturnCode::ServerUnavailable,
                4 => ConnectReturnCode::BadUsernamePassword,
                5 => ConnectReturnCode::NotAuthorized,
                _ => return Err(ProtocolError::Malformed),
            };
            Ok(Packet::Connack { session_present, code })
        }
        3 => {
            let dup = flags & 0x08 != 0;
            let qos = QoS::from_u8((flags >> 1) & 0x03)?;
            let retain = flags & 0x01 != 0;
            let topic = cursor.take_string()?;
            let packet_id = if qos != QoS::AtMostOnce {
                Some(cursor.take_u16()?)
            } else {
                None
            };
            let payload = cursor.rest().to_vec();
            Ok(Packet::Publish { dup, qos, retain, topic, packet_id, payload })
        }
        4 => Ok(Packet::Puback(cursor.take_u16()?)),
        5 => Ok(Packet::Pubrec(cursor.take_u16()?)),
        6 => Ok(Packet::Pubrel(cursor.take_u16()?)),
        7 => Ok(Packet::Pubcomp(cursor.take_u16()?)),
        8 => {
            let packet_id = cursor.take_u16()?;
            let mut filters = Vec::new();
            while !cursor.is_empty() {
                let filter = cursor.take_string()?;
                let qos = QoS::from_u8(cursor.take_u8()?)?;
                filters.push((filter, qos));
            }
            if filters.is_empty() {
                return Err(ProtocolError::Malformed);
            }
            Ok(Packet::Subscribe { packet_id, filters })
        }
        9 => {
            let packet_id = cursor.take_u16()?;
            Ok(Packet::Suback { packet_id, return_codes: cursor.rest().to_vec() })
        }
        10 => {
            let packet_id = cursor.take_u16()?;
            let mut filters = Vec::new();
            while !cursor.is_empty() {
                filters.push(cursor.take_string()?);
            }
            Ok(Packet::Unsubscribe { packet_id, filters })
        }
        11 => Ok(Packet::Unsuback(cursor.take_u16()?)),
        12 => Ok(Packet::Pingreq),
        13 => Ok(Packet::Pingresp),
        14 => Ok(Packet::Disconnect),
        other => Err(ProtocolError::InvalidPacketType(other)),
    }
}

fn parse_connect(cursor: &mut Cursor) -> ProtocolResult<Packet> {
    let protocol_name = cursor.take_string()?;
    let protocol_level = cursor.take_u8()?;
    if protocol_name != "MQTT" || protocol_level != 4 {
        return Err(ProtocolError::Malformed);
    }
    let flags = cursor.take_u8()?;
    let clean_session = flags & 0x02 != 0;
    let keep_alive = cursor.take_u16()?;
    let client_id = cursor.take_string()?;

    let will = if flags & 0x04 != 0 {
        let topic = cursor.take_string()?;
        let message = cursor.take_prefixed()?.to_vec();
        Some(Will {
            topic,
            message,
            qos: QoS::from_u8((flags >> 3) & 0x03)?,
            retain: flags & 0x20 != 0,
        })
    } else {
        None
    };
    let username = if flags & 0x80 != 0 {
        Some(cursor.take_string()?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(cursor.take_prefixed()?.to_vec())
    } else {
        None
    };

    Ok(Packet::Connect { client_id, clean_session, keep_alive, will, username, password })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_u8(&mut self) -> ProtocolResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(ProtocolError::Malformed)?;
        self.pos += 1;
        Ok(byte)
    }

    fn take_u16(&mut self) -> ProtocolResult<u16> {
        let hi = self.take_u8()?;
        let lo = self.take_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn take_prefixed(&mut self) -> ProtocolResult<&'a [u8]> {
        let len = self.take_u16()? as usize;
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ProtocolError::Malformed);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_string(&mut self) -> ProtocolResult<String> {
        let bytes = self.take_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Async adapters
// ---------------------------------------------------------------------------

/// Read one full packet from the stream.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Packet> {
    let first = reader.read_u8().await?;
    let length = read_remaining_length(reader).await?;
    if length > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    parse(first, &body)
}

async fn read_remaining_length<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<usize> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    for _ in 0..4 {
        let byte = reader.read_u8().await?;
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(ProtocolError::InvalidRemainingLength)
}

/// Write one packet to the stream.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> ProtocolResult<()> {
    writer.write_all(&encode(packet)).await?;
    writer.flush().await?;
    Ok(())
}
