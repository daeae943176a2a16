//! Length-prefixed framed wire protocol (component A, §3 "RPC frame", §4.A).
//!
//! Preamble layout (18 bytes, all integers little-endian):
//! `magic:u16 version:u8 message_type:u8 serializer_id:u8 compressor_id:u8
//! request_id:u64 payload_len:u32`, followed by exactly `payload_len` bytes.

use std::convert::TryFrom;

use common::errors::*;
use common::TaggedError;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAGIC: u16 = 0x5347; // "SG" - SLG game server wire protocol.
pub const VERSION: u8 = 1;
pub const PREAMBLE_LEN: usize = 2 + 1 + 1 + 1 + 1 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    HeartbeatRequest = 3,
    HeartbeatResponse = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => MessageType::Request,
            2 => MessageType::Response,
            3 => MessageType::HeartbeatRequest,
            4 => MessageType::HeartbeatResponse,
            other => {
                return Err(TaggedError::new(
                    common::ErrorKind::FrameInvalid,
                    format!("unknown message type {}", other),
                )
                .into())
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub serializer_id: u8,
    pub compressor_id: u8,
    pub request_id: u64,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// Hard cap on a single frame's payload length. Guards against a
    /// corrupt or hostile length prefix causing an unbounded allocation.
    pub max_frame_len: u32,
    /// Payloads smaller than this many bytes skip compression even when a
    /// real compressor id is requested, since the framing + compressor
    /// headers would dominate the saved bytes.
    pub compress_threshold: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            max_frame_len: 16 * 1024 * 1024,
            compress_threshold: 512,
        }
    }
}

fn frame_invalid(message: impl Into<String>) -> Error {
    TaggedError::new(common::ErrorKind::FrameInvalid, message).into()
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    opts: &CodecOptions,
) -> Result<()> {
    if frame.payload.len() as u64 > opts.max_frame_len as u64 {
        return Err(frame_invalid(format!(
            "FRAME_TOO_LARGE: {} bytes exceeds max {}",
            frame.payload.len(),
            opts.max_frame_len
        )));
    }

    let mut preamble = Vec::with_capacity(PREAMBLE_LEN);
    preamble.extend_from_slice(&MAGIC.to_le_bytes());
    preamble.push(VERSION);
    preamble.push(frame.header.message_type as u8);
    preamble.push(frame.header.serializer_id);
    preamble.push(frame.header.compressor_id);
    preamble.extend_from_slice(&frame.header.request_id.to_le_bytes());
    preamble.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());

    writer.write_all(&preamble).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    opts: &CodecOptions,
) -> Result<Frame> {
    let mut preamble = [0u8; PREAMBLE_LEN];
    reader.read_exact(&mut preamble).await?;

    let magic = u16::from_le_bytes([preamble[0], preamble[1]]);
    if magic != MAGIC {
        return Err(frame_invalid(format!("BAD_MAGIC: got {:#06x}", magic)));
    }

    let version = preamble[2];
    if version != VERSION {
        return Err(frame_invalid(format!(
            "unsupported protocol version {} (connection fault)",
            version
        )));
    }

    let message_type = MessageType::try_from(preamble[3])?;
    let serializer_id = preamble[4];
    let compressor_id = preamble[5];
    let request_id = u64::from_le_bytes(preamble[6..14].try_into().unwrap());
    let payload_len = u32::from_le_bytes(preamble[14..18].try_into().unwrap());

    if payload_len > opts.max_frame_len {
        return Err(frame_invalid(format!(
            "FRAME_TOO_LARGE: {} bytes exceeds max {}",
            payload_len, opts.max_frame_len
        )));
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        header: FrameHeader {
            message_type,
            serializer_id,
            compressor_id,
            request_id,
        },
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn round_trips_a_frame() {
        let frame = Frame {
            header: FrameHeader {
                message_type: MessageType::Request,
                serializer_id: 1,
                compressor_id: 0,
                request_id: 42,
            },
            payload: b"hello world".to_vec(),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame, &CodecOptions::default())
            .await
            .unwrap();

        let mut cursor = futures::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor, &CodecOptions::default())
            .await
            .unwrap();
        assert_eq!(decoded.header.request_id, 42);
        assert_eq!(decoded.payload, b"hello world");
    }

    #[async_std::test]
    async fn rejects_bad_magic() {
        let mut buf = vec![0u8; PREAMBLE_LEN];
        buf[0] = 0xAB;
        buf[1] = 0xCD;
        let mut cursor = futures::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, &CodecOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("BAD_MAGIC"));
    }

    #[async_std::test]
    async fn rejects_oversized_frame() {
        let opts = CodecOptions {
            max_frame_len: 4,
            compress_threshold: 0,
        };
        let frame = Frame {
            header: FrameHeader {
                message_type: MessageType::Request,
                serializer_id: 1,
                compressor_id: 0,
                request_id: 1,
            },
            payload: vec![0u8; 16],
        };
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &frame, &opts).await.unwrap_err();
        assert!(err.to_string().contains("FRAME_TOO_LARGE"));
    }
}
