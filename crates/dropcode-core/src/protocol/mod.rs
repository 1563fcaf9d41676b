//! Dropcode transfer messages and their TCP framing.
//!
//! A logical transfer is one `file-start`, zero or more `file-chunk`, and one
//! `file-end` message on a single link. [`TransferMessage`] is that logical
//! shape; its serde representation is the JSON form legacy browser peers
//! exchange:
//!
//! ```text
//! {"type":"file-start","fileName":"a.txt","totalChunks":3}
//! {"type":"file-chunk","chunk":[...],"totalChunks":3}
//! {"type":"file-end","fileName":"a.txt"}
//! ```
//!
//! ## Frame Format
//!
//! The TCP transport carries messages in frames:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     Dropcode Frame                         │
//! ├────────────┬────────────┬────────────┬─────────────────────┤
//! │   Magic    │  Version   │    Type    │      Length         │
//! │  4 bytes   │  2 bytes   │   1 byte   │      4 bytes        │
//! ├────────────┴────────────┴────────────┴─────────────────────┤
//! │                        Payload                             │
//! │                    (variable length)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x44 0x52 0x50 0x43` ("DRPC")
//! - Version: `0x01 0x00` (1.0)
//! - Type: Message type byte
//! - Length: Payload length in bytes (big-endian)
//!
//! Start, end and handshake payloads are JSON. Chunk payloads are binary:
//! `total_chunks (8 bytes, BE) | data`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::code::PeerId;
use crate::error::{Error, Result};

/// Protocol magic bytes: "DRPC"
pub const MAGIC: [u8; 4] = [0x44, 0x52, 0x50, 0x43];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Size of the fixed prefix in front of chunk bytes
pub const CHUNK_PREFIX_SIZE: usize = 8;

/// Largest chunk that still fits in one frame.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - CHUNK_PREFIX_SIZE;

/// Message types in the Dropcode frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Initial handshake, carries the initiator's peer ID
    Hello = 0x01,
    /// Handshake response, carries the acceptor's peer ID
    HelloAck = 0x02,
    /// Opens a logical transfer
    FileStart = 0x10,
    /// Chunk payload
    FileChunk = 0x11,
    /// Closes a logical transfer
    FileEnd = 0x12,
    /// Error message
    Error = 0xFF,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloAck),
            0x10 => Some(Self::FileStart),
            0x11 => Some(Self::FileChunk),
            0x12 => Some(Self::FileEnd),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// A protocol frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Message type
    pub message_type: MessageType,
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6] = self.message_type as u8;
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::ProtocolError("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);
        if version.0 != crate::PROTOCOL_VERSION.0 {
            return Err(Error::ProtocolError(format!(
                "unsupported protocol version: {}.{}",
                version.0, version.1
            )));
        }

        let message_type = MessageType::from_byte(buf[6])
            .ok_or_else(|| Error::ProtocolError(format!("unknown message type: {:#x}", buf[6])))?;

        let payload_length = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {payload_length} bytes"
            )));
        }

        Ok(Self {
            version,
            message_type,
            payload_length,
        })
    }
}

/// One message of a logical transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferMessage {
    /// Opens a transfer and resets any partial one on the link.
    #[serde(rename = "file-start", rename_all = "camelCase")]
    Start {
        /// Name the receiver saves the file under
        file_name: String,
        /// Number of chunk messages that follow
        total_chunks: u64,
    },
    /// One ordered payload fragment.
    #[serde(rename = "file-chunk", rename_all = "camelCase")]
    Chunk {
        /// Chunk bytes
        chunk: Vec<u8>,
        /// Repeated from `Start` on every chunk
        total_chunks: u64,
    },
    /// Closes the transfer; the receiver finalizes whatever it buffered.
    #[serde(rename = "file-end", rename_all = "camelCase")]
    End {
        /// Name the receiver saves the file under
        file_name: String,
    },
}

impl TransferMessage {
    /// Wire discriminator of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "file-start",
            Self::Chunk { .. } => "file-chunk",
            Self::End { .. } => "file-end",
        }
    }

    /// Frame type used for this message on the TCP transport.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Start { .. } => MessageType::FileStart,
            Self::Chunk { .. } => MessageType::FileChunk,
            Self::End { .. } => MessageType::FileEnd,
        }
    }
}

/// Start message payload (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStartPayload {
    file_name: String,
    total_chunks: u64,
}

/// End message payload (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEndPayload {
    file_name: String,
}

/// Hello / HelloAck payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Peer ID the sender advertises as its own
    pub peer_id: PeerId,
    /// Protocol version string
    pub protocol_version: String,
}

impl HelloPayload {
    /// Create a hello for the given local ID.
    #[must_use]
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            protocol_version: format!(
                "{}.{}",
                crate::PROTOCOL_VERSION.0,
                crate::PROTOCOL_VERSION.1
            ),
        }
    }
}

impl HelloPayload {
    /// Check that the advertised version shares our major version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompatibleVersion`] if the major versions differ.
    pub fn check_version(&self) -> Result<()> {
        let local_major = crate::PROTOCOL_VERSION.0.to_string();
        let remote_major = self.protocol_version.split('.').next().unwrap_or_default();
        if remote_major == local_major {
            return Ok(());
        }

        Err(Error::IncompatibleVersion {
            local: format!(
                "{}.{}",
                crate::PROTOCOL_VERSION.0,
                crate::PROTOCOL_VERSION.1
            ),
            remote: self.protocol_version.clone(),
        })
    }
}

/// Error payload, sent in place of a `HelloAck` to refuse a handshake or on
/// an open link before closing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().unwrap_or("E000").to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ErrorPayload> for Error {
    fn from(payload: ErrorPayload) -> Self {
        Self::Rejected {
            code: payload.code,
            message: payload.message,
        }
    }
}

/// Encode a message payload to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message payload from JSON bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a chunk payload (binary format).
///
/// Format: total_chunks (8 bytes) | data
#[must_use]
pub fn encode_chunk(chunk: &[u8], total_chunks: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_PREFIX_SIZE + chunk.len());
    buf.extend_from_slice(&total_chunks.to_be_bytes());
    buf.extend_from_slice(chunk);
    buf
}

/// Decode a chunk payload (binary format).
///
/// # Errors
///
/// Returns an error if the payload is too short.
pub fn decode_chunk(mut data: Vec<u8>) -> Result<TransferMessage> {
    if data.len() < CHUNK_PREFIX_SIZE {
        return Err(Error::ProtocolError("chunk payload too short".to_string()));
    }

    let total_chunks = u64::from_be_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ]);
    data.drain(..CHUNK_PREFIX_SIZE);

    Ok(TransferMessage::Chunk {
        chunk: data,
        total_chunks,
    })
}

/// Encode a transfer message into a frame type and payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(message: &TransferMessage) -> Result<(MessageType, Vec<u8>)> {
    let payload = match message {
        TransferMessage::Start {
            file_name,
            total_chunks,
        } => encode_payload(&FileStartPayload {
            file_name: file_name.clone(),
            total_chunks: *total_chunks,
        })?,
        TransferMessage::Chunk {
            chunk,
            total_chunks,
        } => encode_chunk(chunk, *total_chunks),
        TransferMessage::End { file_name } => encode_payload(&FileEndPayload {
            file_name: file_name.clone(),
        })?,
    };

    Ok((message.message_type(), payload))
}

/// Decode a transfer message from a frame.
///
/// # Errors
///
/// Returns an error if the frame is not a transfer message or is malformed.
pub fn decode_message(header: &FrameHeader, payload: Vec<u8>) -> Result<TransferMessage> {
    match header.message_type {
        MessageType::FileStart => {
            let start: FileStartPayload = decode_payload(&payload)?;
            Ok(TransferMessage::Start {
                file_name: start.file_name,
                total_chunks: start.total_chunks,
            })
        }
        MessageType::FileChunk => decode_chunk(payload),
        MessageType::FileEnd => {
            let end: FileEndPayload = decode_payload(&payload)?;
            Ok(TransferMessage::End {
                file_name: end.file_name,
            })
        }
        other => Err(Error::UnexpectedMessage {
            expected: "FileStart, FileChunk, or FileEnd".to_string(),
            actual: format!("{other:?}"),
        }),
    }
}

/// Read a complete frame from a stream.
///
/// # Errors
///
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)>
where
    R: tokio::io::AsyncReadExt + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if header.payload_length > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok((header, payload))
}

/// Write a complete frame to a stream.
///
/// # Errors
///
/// Returns an error if writing fails or the payload is too large.
pub async fn write_frame<W>(writer: &mut W, message_type: MessageType, payload: &[u8]) -> Result<()>
where
    W: tokio::io::AsyncWriteExt + Unpin,
{
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::ProtocolError(format!(
            "payload too large: {} bytes",
            payload.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let header = FrameHeader {
        version: crate::PROTOCOL_VERSION,
        message_type,
        payload_length: payload.len() as u32,
    };

    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Write a transfer message as one frame.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn write_message<W>(writer: &mut W, message: &TransferMessage) -> Result<()>
where
    W: tokio::io::AsyncWriteExt + Unpin,
{
    let (message_type, payload) = encode_message(message)?;
    write_frame(writer, message_type, &payload).await
}

/// Read a complete frame from a stream with a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if the operation exceeds the specified duration.
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    duration: Duration,
) -> Result<(FrameHeader, Vec<u8>)>
where
    R: tokio::io::AsyncReadExt + Unpin,
{
    timeout(duration, read_frame(reader))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_encode_decode() {
        let header = FrameHeader {
            version: (1, 0),
            message_type: MessageType::FileStart,
            payload_length: 256,
        };

        let encoded = header.encode();
        let decoded = FrameHeader::decode(&encoded).expect("decode");

        assert_eq!(decoded.version, (1, 0));
        assert_eq!(decoded.message_type, MessageType::FileStart);
        assert_eq!(decoded.payload_length, 256);
    }

    #[test]
    fn test_frame_header_rejects_bad_magic() {
        let mut encoded = FrameHeader {
            version: (1, 0),
            message_type: MessageType::Hello,
            payload_length: 0,
        }
        .encode();
        encoded[0] = b'X';

        assert!(FrameHeader::decode(&encoded).is_err());
    }

    #[test]
    fn test_frame_header_rejects_oversized_payload() {
        let mut encoded = FrameHeader {
            version: (1, 0),
            message_type: MessageType::FileChunk,
            payload_length: 0,
        }
        .encode();
        #[allow(clippy::cast_possible_truncation)]
        encoded[7..11].copy_from_slice(&((MAX_PAYLOAD_SIZE + 1) as u32).to_be_bytes());

        assert!(FrameHeader::decode(&encoded).is_err());
    }

    #[test]
    fn test_message_json_shape() {
        let start = TransferMessage::Start {
            file_name: "photo.jpg".to_string(),
            total_chunks: 3,
        };
        let json = serde_json::to_value(&start).expect("serialize");
        assert_eq!(json["type"], "file-start");
        assert_eq!(json["fileName"], "photo.jpg");
        assert_eq!(json["totalChunks"], 3);

        let chunk = TransferMessage::Chunk {
            chunk: vec![1, 2],
            total_chunks: 3,
        };
        let json = serde_json::to_value(&chunk).expect("serialize");
        assert_eq!(json["type"], "file-chunk");
        assert_eq!(json["chunk"], serde_json::json!([1, 2]));
        assert_eq!(json["totalChunks"], 3);

        let end = TransferMessage::End {
            file_name: "photo.jpg".to_string(),
        };
        let json = serde_json::to_value(&end).expect("serialize");
        assert_eq!(json["type"], "file-end");
        assert_eq!(json["fileName"], "photo.jpg");
    }

    #[test]
    fn test_message_parses_legacy_json() {
        let raw = r#"{"type":"file-end","fileName":"notes.txt"}"#;
        let message: TransferMessage = serde_json::from_str(raw).expect("parse");
        assert_eq!(
            message,
            TransferMessage::End {
                file_name: "notes.txt".to_string()
            }
        );
    }

    #[test]
    fn test_chunk_decode_too_short() {
        assert!(decode_chunk(vec![0u8; 4]).is_err());
    }

    #[test]
    fn test_decode_message_rejects_handshake_frames() {
        let header = FrameHeader {
            version: (1, 0),
            message_type: MessageType::Hello,
            payload_length: 0,
        };
        let err = decode_message(&header, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedMessage { .. }));
    }

    #[tokio::test]
    async fn test_transfer_sequence_over_stream() {
        let messages = vec![
            TransferMessage::Start {
                file_name: "a.bin".to_string(),
                total_chunks: 2,
            },
            TransferMessage::Chunk {
                chunk: vec![0xAA; 10],
                total_chunks: 2,
            },
            TransferMessage::Chunk {
                chunk: vec![],
                total_chunks: 2,
            },
            TransferMessage::End {
                file_name: "a.bin".to_string(),
            },
        ];

        let mut buffer = Vec::new();
        for message in &messages {
            write_message(&mut buffer, message).await.expect("write");
        }

        let mut cursor = std::io::Cursor::new(buffer);
        for expected in &messages {
            let (header, payload) = read_frame(&mut cursor).await.expect("read frame");
            let decoded = decode_message(&header, payload).expect("decode");
            assert_eq!(&decoded, expected);
        }
    }

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let hello = HelloPayload::new(PeerId::parse("WXQ7").expect("id"));
        let mut buffer = Vec::new();
        write_frame(
            &mut buffer,
            MessageType::Hello,
            &encode_payload(&hello).expect("encode"),
        )
        .await
        .expect("write");

        let mut cursor = std::io::Cursor::new(buffer);
        let (header, payload) = read_frame_with_timeout(&mut cursor, Duration::from_secs(5))
            .await
            .expect("read");
        assert_eq!(header.message_type, MessageType::Hello);

        let decoded: HelloPayload = decode_payload(&payload).expect("decode");
        assert_eq!(decoded.peer_id.as_str(), "WXQ7");
        assert_eq!(decoded.protocol_version, "1.0");
    }

    #[test]
    fn test_hello_version_check() {
        let mut hello = HelloPayload::new(PeerId::parse("WXQ7").expect("id"));
        assert!(hello.check_version().is_ok());

        hello.protocol_version = "1.7".to_string();
        assert!(hello.check_version().is_ok());

        hello.protocol_version = "2.0".to_string();
        match hello.check_version().unwrap_err() {
            Error::IncompatibleVersion { local, remote } => {
                assert_eq!(local, "1.0");
                assert_eq!(remote, "2.0");
            }
            e => panic!("Expected IncompatibleVersion, got: {e:?}"),
        }
    }

    #[test]
    fn test_error_payload_carries_code() {
        let payload = ErrorPayload::from(&Error::IdentifierTaken("WXQ7".to_string()));
        assert_eq!(payload.code, "E005");
        assert_eq!(payload.message, "peer ID 'WXQ7' is already taken");

        let payload = ErrorPayload::from(&Error::Internal("boom".to_string()));
        assert_eq!(payload.code, "E000");

        let err = Error::from(ErrorPayload {
            code: "E006".to_string(),
            message: "incompatible".to_string(),
        });
        assert_eq!(err.to_string(), "rejected by peer (E006): incompatible");
    }

    #[tokio::test]
    async fn test_read_frame_with_timeout_expires() {
        struct NeverReadyReader;

        impl tokio::io::AsyncRead for NeverReadyReader {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Pending
            }
        }

        let mut reader = NeverReadyReader;
        let result = read_frame_with_timeout(&mut reader, Duration::from_millis(50)).await;

        match result.unwrap_err() {
            Error::Timeout(secs) => assert_eq!(secs, 0),
            e => panic!("Expected Timeout error, got: {e:?}"),
        }
    }
}
