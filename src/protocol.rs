// MDWP protocol definitions and packet framing
//
// Packet layout on the wire:
// cmd (1 byte)
// len (3 bytes, little-endian) - total packet length including header and trailer
// payload (len - 6 bytes)
// crc (2 bytes, little-endian) - additive sum of every byte before the trailer
//
// MDWP uses little-endian for all multi-byte values; the checksum is a plain
// 16-bit modular sum, not a polynomial CRC.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tracing::{debug, warn};

pub type MdwpResult<T> = Result<T, MdwpError>;

#[derive(Debug, Error)]
pub enum MdwpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Checksum mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Header (cmd + 3-byte length) plus the 2-byte checksum trailer.
pub const FRAME_OVERHEAD: usize = 6;

/// Smallest decodable response: header, response code, trailer.
pub const MIN_RESPONSE_LEN: usize = 7;

/// Anything larger than this means the stream lost framing.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// The agent may set the high bit on the echoed opcode to mark a reply.
pub const RESPONSE_BIT: u8 = 0x80;

// Target status bits reported by READ_STATUS
pub mod status {
    pub const STOP: u8 = 0x01;
    pub const STOP_SET: u8 = 0x02;
    pub const EXCP: u8 = 0x04;
    pub const CONSOLE: u8 = 0x08;
    pub const RESET: u8 = 0x80;
}

/// A decoded response frame: echoed command, response code, remaining payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResponse {
    pub cmd: u8,
    pub response_code: u8,
    pub data: Vec<u8>,
}

impl DataResponse {
    pub fn is_ok(&self) -> bool {
        self.response_code == crate::commands::response_codes::OK
    }
}

/// Additive 16-bit checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, b| sum.wrapping_add(u16::from(*b)))
}

/// Encode a command frame.
pub fn encode_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let total = FRAME_OVERHEAD + payload.len();
    let mut buf = BytesMut::with_capacity(total);

    buf.put_u8(cmd);
    buf.put_u8((total & 0xFF) as u8);
    buf.put_u8(((total >> 8) & 0xFF) as u8);
    buf.put_u8(((total >> 16) & 0xFF) as u8);
    buf.put_slice(payload);

    let crc = checksum(&buf);
    buf.put_u16_le(crc);

    buf.to_vec()
}

/// Append a wire string: `len:u16 | crc:u16 | bytes | 0x00`.
///
/// The CRC is the additive sum of the string bytes; `len` excludes the
/// terminator. Total footprint is `5 + s.len()` bytes.
pub fn put_wire_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u16_le(bytes.len() as u16);
    buf.put_u16_le(checksum(bytes));
    buf.put_slice(bytes);
    buf.put_u8(0);
}

/// Byte footprint of [`put_wire_string`] for `s`.
pub fn wire_string_len(s: &str) -> usize {
    5 + s.len()
}

/// Parse a wire string produced by [`put_wire_string`], validating the
/// checksum, and return it together with the bytes consumed.
pub fn parse_wire_string(buf: &[u8]) -> MdwpResult<(String, usize)> {
    if buf.len() < 4 {
        return Err(MdwpError::Protocol("wire string header truncated".into()));
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let expected = u16::from_le_bytes([buf[2], buf[3]]);
    if buf.len() < 4 + len + 1 {
        return Err(MdwpError::Protocol("wire string body truncated".into()));
    }
    let bytes = &buf[4..4 + len];
    let actual = checksum(bytes);
    if expected != actual {
        return Err(MdwpError::Checksum { expected, actual });
    }
    if buf[4 + len] != 0 {
        return Err(MdwpError::Protocol("wire string missing terminator".into()));
    }
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|e| MdwpError::Protocol(format!("invalid UTF-8 in wire string: {e}")))?;
    Ok((s, 4 + len + 1))
}

/// Streaming decoder. The transport delivers arbitrary chunks; frames are
/// assembled here and yielded once complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially assembled frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed one chunk; returns every frame it completes. Frames with a bad
    /// checksum are dropped without a reply, so the inflight request times
    /// out instead.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DataResponse> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let len = u32::from_le_bytes([self.buf[1], self.buf[2], self.buf[3], 0]) as usize;
            if !(MIN_RESPONSE_LEN..=MAX_FRAME_SIZE).contains(&len) {
                warn!("frame length {} out of range, resetting receive buffer", len);
                self.buf.clear();
                break;
            }
            if self.buf.len() < len {
                break;
            }
            let frame = self.buf.split_to(len);
            match decode_frame(&frame) {
                Ok(resp) => frames.push(resp),
                Err(e) => debug!("dropping frame: {e}"),
            }
        }
        frames
    }
}

/// Validate and decode one complete frame.
fn decode_frame(frame: &[u8]) -> MdwpResult<DataResponse> {
    let body = &frame[..frame.len() - 2];
    let expected = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    let actual = checksum(body);
    if expected != actual {
        return Err(MdwpError::Checksum { expected, actual });
    }

    Ok(DataResponse {
        cmd: frame[0] & !RESPONSE_BIT,
        response_code: frame[4],
        data: frame[5..frame.len() - 2].to_vec(),
    })
}
