//! Little-endian byte stream primitives
//!
//! One writer and one reader serve the instruction stream, the program
//! container and the public variable blobs. Multi-byte scalars are always
//! little-endian; strings and blobs carry a `u32` length prefix.

use crate::opcode::{Opcode, HALT_ADDRESS};
use thiserror::Error;

/// Failure while reading a byte stream
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Stream ended in the middle of a value
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// String bytes are not UTF-8
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Word is not a defined opcode
    #[error("Invalid opcode {0} at offset {1}")]
    InvalidOpcode(u32, usize),

    /// Unknown discriminant byte
    #[error("Invalid {kind} tag {tag} at offset {offset}")]
    InvalidTag {
        /// What was being decoded
        kind: &'static str,
        /// Byte that was read
        tag: u8,
        /// Where it was read
        offset: usize,
    },

    /// Same name declared twice in one table
    #[error("Duplicate symbol {0}")]
    DuplicateSymbol(String),
}

macro_rules! scalar_codec {
    ($($ty:ty => $emit:ident, $read:ident;)*) => {
        impl BytecodeWriter {
            $(
                #[doc = concat!("Append a little-endian `", stringify!($ty), "`")]
                pub fn $emit(&mut self, value: $ty) {
                    self.buffer.extend_from_slice(&value.to_le_bytes());
                }
            )*
        }

        impl<'a> BytecodeReader<'a> {
            $(
                #[doc = concat!("Take a little-endian `", stringify!($ty), "`")]
                pub fn $read(&mut self) -> Result<$ty, DecodeError> {
                    let bytes = self.advance(std::mem::size_of::<$ty>())?;
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Ok(<$ty>::from_le_bytes(raw))
                }
            )*
        }
    };
}

/// Growable output stream
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

scalar_codec! {
    u32 => emit_u32, read_u32;
    i32 => emit_i32, read_i32;
    u64 => emit_u64, read_u64;
    i64 => emit_i64, read_i64;
    f32 => emit_f32, read_f32;
    f64 => emit_f64, read_f64;
}

impl BytecodeWriter {
    /// Empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Finish writing and take the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Byte offset of the next write
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Append a single byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Append a `u32` length followed by the raw bytes
    pub fn emit_blob(&mut self, bytes: &[u8]) {
        self.emit_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Append a string as a length-prefixed UTF-8 blob
    pub fn emit_string(&mut self, value: &str) {
        self.emit_blob(value.as_bytes());
    }

    /// Rewrite the word at `offset`, used to back-fill section lengths
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Append an opcode word
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u32(opcode.to_u32());
    }

    fn emit_with_operand(&mut self, opcode: Opcode, operand: u32) {
        self.emit_opcode(opcode);
        self.emit_u32(operand);
    }

    /// `PUSH address`
    pub fn emit_push(&mut self, address: u32) {
        self.emit_with_operand(Opcode::Push, address);
    }

    /// `POP`
    pub fn emit_pop(&mut self) {
        self.emit_opcode(Opcode::Pop);
    }

    /// `COPY`
    pub fn emit_copy(&mut self) {
        self.emit_opcode(Opcode::Copy);
    }

    /// `JUMP target` with a direct code address
    pub fn emit_jump(&mut self, target: u32) {
        self.emit_with_operand(Opcode::Jump, target);
    }

    /// `JUMP` to the sentinel address that ends the run
    pub fn emit_halt(&mut self) {
        self.emit_jump(HALT_ADDRESS);
    }

    /// `EXTERN` naming the heap slot that holds the signature
    pub fn emit_extern(&mut self, signature_address: u32) {
        self.emit_with_operand(Opcode::Extern, signature_address);
    }
}

/// Cursor over a borrowed byte stream
///
/// Every read checks bounds and reports the offset where the stream ran out.
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Start reading at the first byte of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    /// Offset of the next read
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    /// Whether any bytes are left
    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    fn advance(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if count > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(self.cursor));
        }
        let start = self.cursor;
        self.cursor += count;
        Ok(&self.data[start..self.cursor])
    }

    /// Take a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.advance(1)?[0])
    }

    /// Copy out exactly `count` bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        self.advance(count).map(<[u8]>::to_vec)
    }

    /// Counterpart of [`BytecodeWriter::emit_blob`]
    pub fn read_blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Counterpart of [`BytecodeWriter::emit_string`]
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.cursor;
        String::from_utf8(self.read_blob()?).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a word and map it to an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let at = self.cursor;
        let word = self.read_u32()?;
        Opcode::from_u32(word).ok_or(DecodeError::InvalidOpcode(word, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_little_endian() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0x42);
        writer.emit_u32(0xABCD_EF01);

        assert_eq!(writer.buffer(), &[0x42, 0x01, 0xEF, 0xCD, 0xAB]);
    }

    #[test]
    fn test_instruction_layout() {
        let mut writer = BytecodeWriter::new();
        writer.emit_push(3);
        writer.emit_copy();
        writer.emit_halt();
        assert_eq!(writer.offset(), 20);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Push);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Copy);
        assert_eq!(reader.read_opcode().unwrap(), Opcode::Jump);
        assert_eq!(reader.read_u32().unwrap(), HALT_ADDRESS);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_patch_backfills_length() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u32(0);
        writer.emit_i64(-7);
        let len = (writer.offset() - 4) as u32;
        writer.patch_u32(0, len);

        let mut reader = BytecodeReader::new(writer.buffer());
        assert_eq!(reader.read_u32().unwrap(), 8);
        assert_eq!(reader.read_i64().unwrap(), -7);
    }

    #[test]
    fn test_short_stream_reports_offset() {
        let mut reader = BytecodeReader::new(&[1, 2]);
        assert_eq!(reader.read_u32(), Err(DecodeError::UnexpectedEnd(0)));
        assert_eq!(reader.position(), 0);

        let mut reader = BytecodeReader::new(&[10, 0, 0, 0, b'a']);
        assert_eq!(reader.read_string(), Err(DecodeError::UnexpectedEnd(4)));
    }

    #[test]
    fn test_undefined_opcode_word() {
        let mut reader = BytecodeReader::new(&[3, 0, 0, 0]);
        assert_eq!(reader.read_opcode(), Err(DecodeError::InvalidOpcode(3, 0)));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = BytecodeReader::new(&[2, 0, 0, 0, 0xFF, 0xFE]);
        assert_eq!(reader.read_string(), Err(DecodeError::InvalidUtf8(0)));
    }
}
