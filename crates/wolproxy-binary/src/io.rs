//! Buffer reader/writer for the Minecraft Java edition wire primitives.
//!
//! Everything multi-byte is big-endian except VarInts, which are 7-bit
//! groups, least significant group first, MSB as continuation flag.

use crate::error::BinaryError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest accepted VarInt encoding. Anything longer is malformed.
pub const MAX_VARINT_BYTES: usize = 5;

/// Upper bound on string payloads; nothing legitimate comes close.
const MAX_STRING_BYTES: usize = 1 << 28;

macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

#[derive(Debug, Clone)]
pub struct BinaryReader {
    buffer: Bytes,
}

impl BinaryReader {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn read_u8(&mut self) -> Result<u8, BinaryError> {
        check_remaining!(self.buffer, 1);
        Ok(self.buffer.get_u8())
    }

    /// Reads a `u16` in big-endian format.
    pub fn read_u16(&mut self) -> Result<u16, BinaryError> {
        check_remaining!(self.buffer, 2);
        Ok(self.buffer.get_u16())
    }

    /// Reads an `i64` in big-endian format.
    pub fn read_i64(&mut self) -> Result<i64, BinaryError> {
        check_remaining!(self.buffer, 8);
        Ok(self.buffer.get_i64())
    }

    /// Reads a `u64` in big-endian format.
    pub fn read_u64(&mut self) -> Result<u64, BinaryError> {
        check_remaining!(self.buffer, 8);
        Ok(self.buffer.get_u64())
    }

    pub fn read_bool(&mut self) -> Result<bool, BinaryError> {
        check_remaining!(self.buffer, 1);
        Ok(self.buffer.get_u8() != 0)
    }

    /// Reads a VarInt: at most [`MAX_VARINT_BYTES`] bytes of 7-bit groups.
    pub fn read_var_i32(&mut self) -> Result<i32, BinaryError> {
        let mut value: u32 = 0;
        let mut position = 0;

        loop {
            check_remaining!(self.buffer, 1);
            let byte = self.buffer.get_u8();

            value |= ((byte & 0x7F) as u32) << position;

            if byte & 0x80 == 0 {
                break;
            }

            position += 7;
            if position >= 32 {
                return Err(BinaryError::VarIntTooLong {
                    max_bytes: MAX_VARINT_BYTES,
                });
            }
        }

        Ok(value as i32)
    }

    /// Reads a VarInt-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, BinaryError> {
        let length = self.read_var_i32()?;
        if length < 0 {
            return Err(BinaryError::InvalidData(format!(
                "negative string length: {length}"
            )));
        }
        let length = length as usize;
        if length > MAX_STRING_BYTES {
            return Err(BinaryError::InvalidData(format!(
                "string length {length} exceeds limit"
            )));
        }
        check_remaining!(self.buffer, length);

        let raw = self.buffer.split_to(length);
        Ok(String::from_utf8(raw.to_vec())?)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, BinaryError> {
        check_remaining!(self.buffer, len);
        Ok(self.buffer.split_to(len))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buffer: BytesMut,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), BinaryError> {
        self.buffer.put_u8(value);
        Ok(())
    }

    /// Writes a `u16` in big-endian format.
    pub fn write_u16(&mut self, value: u16) -> Result<(), BinaryError> {
        self.buffer.put_u16(value);
        Ok(())
    }

    /// Writes an `i64` in big-endian format.
    pub fn write_i64(&mut self, value: i64) -> Result<(), BinaryError> {
        self.buffer.put_i64(value);
        Ok(())
    }

    /// Writes a `u64` in big-endian format.
    pub fn write_u64(&mut self, value: u64) -> Result<(), BinaryError> {
        self.buffer.put_u64(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), BinaryError> {
        self.buffer.put_u8(value as u8);
        Ok(())
    }

    /// Writes a VarInt. Negative values are rejected.
    pub fn write_var_i32(&mut self, value: i32) -> Result<(), BinaryError> {
        if value < 0 {
            return Err(BinaryError::VarIntNegative);
        }

        let mut value = value as u32;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buffer.put_u8(byte);
            if value == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Writes a VarInt-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<(), BinaryError> {
        self.write_var_i32(value.len() as i32)?;
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), BinaryError> {
        self.buffer.put_slice(value);
        Ok(())
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Wraps the accumulated payload into a complete packet frame:
    /// VarInt total length, VarInt packet id, payload.
    pub fn into_packet(self, packet_id: i32) -> Result<Bytes, BinaryError> {
        let mut body = BinaryWriter::new();
        body.write_var_i32(packet_id)?;
        body.write_bytes(&self.buffer)?;

        let mut framed = BinaryWriter::new();
        framed.write_var_i32(body.len() as i32)?;
        framed.write_bytes(&body.buffer)?;
        Ok(framed.freeze())
    }
}

/// Attempts to split one length-prefixed frame off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// the caller should read more bytes and try again. On success the length
/// prefix is consumed and the returned frame holds packet id plus payload.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, BinaryError> {
    let mut consumed = 0usize;
    let mut value: u32 = 0;
    let mut position = 0;

    loop {
        if consumed >= buf.len() {
            return Ok(None);
        }
        let byte = buf[consumed];
        consumed += 1;

        value |= ((byte & 0x7F) as u32) << position;

        if byte & 0x80 == 0 {
            break;
        }

        position += 7;
        if position >= 32 {
            return Err(BinaryError::VarIntTooLong {
                max_bytes: MAX_VARINT_BYTES,
            });
        }
    }

    if (value as i32) < 0 {
        return Err(BinaryError::InvalidData(format!(
            "negative frame length: {}",
            value as i32
        )));
    }

    let length = value as usize;
    if buf.len() < consumed + length {
        return Ok(None);
    }

    let mut frame = buf.split_to(consumed + length);
    frame.advance(consumed);
    Ok(Some(frame.freeze()))
}
