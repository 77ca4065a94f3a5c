// Helper functions for reading little-endian MDWP response payloads

use bytes::Buf;

use crate::protocol::{MdwpError, MdwpResult};

pub fn read_u8(buf: &mut &[u8]) -> MdwpResult<u8> {
    if buf.remaining() < 1 {
        return Err(MdwpError::Protocol("not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8]) -> MdwpResult<u16> {
    if buf.remaining() < 2 {
        return Err(MdwpError::Protocol("not enough data for u16".to_string()));
    }
    Ok(buf.get_u16_le())
}

pub fn read_u32(buf: &mut &[u8]) -> MdwpResult<u32> {
    if buf.remaining() < 4 {
        return Err(MdwpError::Protocol("not enough data for u32".to_string()));
    }
    Ok(buf.get_u32_le())
}

pub fn read_u64(buf: &mut &[u8]) -> MdwpResult<u64> {
    if buf.remaining() < 8 {
        return Err(MdwpError::Protocol("not enough data for u64".to_string()));
    }
    Ok(buf.get_u64_le())
}

/// Read a sized string from a response: `len:u16 | pad:u16 | bytes [| 0x00]`.
///
/// The terminator is consumed when present; the last string of a response may
/// legally end the buffer without one.
pub fn read_sized_string(buf: &mut &[u8]) -> MdwpResult<String> {
    let len = read_u16(buf)? as usize;
    let _pad = read_u16(buf)?;

    if buf.remaining() < len {
        return Err(MdwpError::Protocol(format!(
            "not enough data for string: expected {}, got {}",
            len,
            buf.remaining()
        )));
    }

    let bytes = &buf[..len];
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|e| MdwpError::Protocol(format!("invalid UTF-8 in string: {e}")))?;
    buf.advance(len);

    if buf.has_remaining() && buf[0] == 0 {
        buf.advance(1);
    }

    Ok(s)
}
