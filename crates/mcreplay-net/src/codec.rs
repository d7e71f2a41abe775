//! Encoding of the protocol's primitive types.
//!
//! Integers and floats are big-endian. Lengths and packet ids use the VarInt
//! encoding: seven value bits per byte, least significant group first, with
//! the high bit set on every byte except the last. An `i32` never takes more
//! than [`VARINT_MAX_BYTES`] bytes.

use bytes::{Buf, BufMut};

/// Maximum encoded size of a VarInt.
pub const VARINT_MAX_BYTES: usize = 5;

/// Maximum length in bytes of a protocol string (32767 UTF-16 units).
pub const MAX_STRING_BYTES: usize = 32_767 * 4;

/// Errors produced while decoding packet fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A typed view was requested for a packet with a different opcode.
    #[error("packet id {actual:#04x} does not match expected {expected:#04x}")]
    WrongOpcode {
        /// Opcode the view decodes.
        expected: i32,
        /// Opcode of the packet.
        actual: i32,
    },

    /// A VarInt continued past its fifth byte.
    #[error("VarInt exceeds 5 bytes")]
    VarIntTooLong,

    /// The buffer ended before the field was complete.
    #[error("unexpected end of data: {needed} more bytes required")]
    UnexpectedEnd {
        /// Bytes still missing for the field being decoded.
        needed: usize,
    },

    /// A string length prefix was negative or too large.
    #[error("invalid string length {0}")]
    InvalidStringLength(i32),

    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

fn ensure(buf: &impl Buf, len: usize) -> Result<(), DecodeError> {
    let remaining = buf.remaining();
    if remaining < len {
        return Err(DecodeError::UnexpectedEnd {
            needed: len - remaining,
        });
    }
    Ok(())
}

/// Decode a VarInt.
pub fn read_varint(buf: &mut impl Buf) -> Result<i32, DecodeError> {
    let mut value: u32 = 0;
    for i in 0..VARINT_MAX_BYTES {
        ensure(buf, 1)?;
        let byte = buf.get_u8();
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(DecodeError::VarIntTooLong)
}

/// Encode a VarInt. Negative values always take five bytes.
pub fn write_varint(buf: &mut impl BufMut, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.put_u8(v as u8);
            return;
        }
        buf.put_u8((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
}

/// Number of bytes [`write_varint`] produces for `value`.
pub fn varint_len(value: i32) -> usize {
    let v = value as u32;
    match v {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode an unsigned byte.
pub fn read_u8(buf: &mut impl Buf) -> Result<u8, DecodeError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Decode a big-endian `i64`.
pub fn read_i64(buf: &mut impl Buf) -> Result<i64, DecodeError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// Decode a big-endian `f32`.
pub fn read_f32(buf: &mut impl Buf) -> Result<f32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_f32())
}

/// Decode a big-endian `f64`.
pub fn read_f64(buf: &mut impl Buf) -> Result<f64, DecodeError> {
    ensure(buf, 8)?;
    Ok(buf.get_f64())
}

/// Decode a VarInt-length-prefixed UTF-8 string.
pub fn read_string(buf: &mut impl Buf) -> Result<String, DecodeError> {
    let len = read_varint(buf)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_STRING_BYTES)
        .ok_or(DecodeError::InvalidStringLength(len))?;
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

/// Encode a VarInt-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut impl BufMut, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.put_slice(value.as_bytes());
}
