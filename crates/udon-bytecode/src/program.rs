//! Compiled program format

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::heap::Heap;
use crate::symbols::{Symbol, SymbolTable};
use crate::sync::{SyncMetadata, SyncMetadataTable};
use semver::Version;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic number for Udon program files: "UDON"
pub const MAGIC: [u8; 4] = *b"UDON";

/// Current container format version
pub const FORMAT_VERSION: u32 = 1;

/// Identifier of the instruction set this crate emits
pub const INSTRUCTION_SET_ID: &str = "UDON";

/// Version of the instruction set this crate emits
pub const INSTRUCTION_SET_VERSION: Version = Version::new(1, 0, 0);

/// Program encoding/decoding errors
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected UDON, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported container format
    #[error("Unsupported format version: {0} (current: {FORMAT_VERSION})")]
    UnsupportedFormat(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Checksum of the payload
        actual: u32,
    },

    /// Instruction set version string did not parse
    #[error("Invalid instruction set version {0:?}")]
    InvalidVersion(String),
}

/// A compiled program
///
/// Immutable once built: instances clone the heap template instead of
/// writing to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Program name, used when relaying events over the network
    pub name: String,
    /// Instruction set the byte code targets
    pub instruction_set_id: String,
    /// Instruction set version
    pub instruction_set_version: Version,
    /// Instruction stream
    pub byte_code: Vec<u8>,
    /// Heap template
    pub heap: Heap,
    /// Event handlers (names → code addresses)
    pub entry_points: SymbolTable,
    /// Variables (names → heap addresses)
    pub symbol_table: SymbolTable,
    /// Replicated variables
    pub sync_metadata: SyncMetadataTable,
}

impl Program {
    /// Create an empty program targeting the current instruction set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction_set_id: INSTRUCTION_SET_ID.to_string(),
            instruction_set_version: INSTRUCTION_SET_VERSION,
            byte_code: Vec::new(),
            heap: Heap::new(),
            entry_points: SymbolTable::new(),
            symbol_table: SymbolTable::new(),
            sync_metadata: SyncMetadataTable::new(),
        }
    }

    /// SHA-256 of the encoded program, hex encoded
    ///
    /// Two instances share a network topology when their hashes match.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        hex::encode(hasher.finalize())
    }

    /// Encode the program to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + format version (u32) + flags (u32) + checksum (u32)
    /// - Name, instruction set id, instruction set version
    /// - Byte code
    /// - Heap
    /// - Entry points, symbol table
    /// - Sync metadata
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::with_capacity(self.byte_code.len() + 256);

        writer.buffer.extend_from_slice(&MAGIC);
        writer.emit_u32(FORMAT_VERSION);
        writer.emit_u32(0); // flags
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        writer.emit_string(&self.name);
        writer.emit_string(&self.instruction_set_id);
        writer.emit_string(&self.instruction_set_version.to_string());
        writer.emit_blob(&self.byte_code);
        self.heap.encode(&mut writer);
        self.entry_points.encode(&mut writer);
        self.symbol_table.encode(&mut writer);
        self.sync_metadata.encode(&mut writer);

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer[16..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a program from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ProgramError> {
        let mut reader = BytecodeReader::new(data);

        let magic = reader.read_u32()?.to_le_bytes();
        if magic != MAGIC {
            return Err(ProgramError::InvalidMagic(magic));
        }

        let format = reader.read_u32()?;
        if format != FORMAT_VERSION {
            return Err(ProgramError::UnsupportedFormat(format));
        }

        let _flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let calculated_checksum = crc32fast::hash(&data[16..]);
        if stored_checksum != calculated_checksum {
            return Err(ProgramError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let name = reader.read_string()?;
        let instruction_set_id = reader.read_string()?;
        let version = reader.read_string()?;
        let instruction_set_version =
            Version::parse(&version).map_err(|_| ProgramError::InvalidVersion(version))?;
        let byte_code = reader.read_blob()?;
        let heap = Heap::decode(&mut reader)?;
        let entry_points = SymbolTable::decode(&mut reader)?;
        let symbol_table = SymbolTable::decode(&mut reader)?;
        let sync_metadata = SyncMetadataTable::decode(&mut reader)?;

        Ok(Self {
            name,
            instruction_set_id,
            instruction_set_version,
            byte_code,
            heap,
            entry_points,
            symbol_table,
            sync_metadata,
        })
    }

    /// Serializable overview of the program
    pub fn summary(&self) -> ProgramSummary<'_> {
        ProgramSummary {
            name: &self.name,
            instruction_set: format!(
                "{} {}",
                self.instruction_set_id, self.instruction_set_version
            ),
            byte_code_len: self.byte_code.len(),
            heap_len: self.heap.len(),
            content_hash: self.content_hash(),
            entry_points: self.entry_points.iter().collect(),
            symbols: self.symbol_table.iter().collect(),
            sync: self.sync_metadata.iter().collect(),
        }
    }
}

/// JSON-friendly overview of a [`Program`]
#[derive(Debug, Serialize)]
pub struct ProgramSummary<'a> {
    /// Program name
    pub name: &'a str,
    /// Instruction set identifier and version
    pub instruction_set: String,
    /// Length of the instruction stream in bytes
    pub byte_code_len: usize,
    /// Number of heap slots
    pub heap_len: usize,
    /// Content hash
    pub content_hash: String,
    /// Entry points in declaration order
    pub entry_points: Vec<&'a Symbol>,
    /// Variables in declaration order
    pub symbols: Vec<&'a Symbol>,
    /// Synced variables
    pub sync: Vec<&'a SyncMetadata>,
}

impl ProgramSummary<'_> {
    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Interpolation;
    use crate::value::{TypeTag, Value};

    fn sample() -> Program {
        let mut program = Program::new("door");
        let open = program.heap.push(TypeTag::Boolean, Value::Boolean(false)).unwrap();
        program
            .symbol_table
            .insert(Symbol {
                name: "isOpen".into(),
                address: open,
                type_tag: TypeTag::Boolean,
                exported: true,
            })
            .unwrap();
        program
            .entry_points
            .insert(Symbol {
                name: "_interact".into(),
                address: 0,
                type_tag: TypeTag::Object,
                exported: true,
            })
            .unwrap();
        program.sync_metadata.add("isOpen", Interpolation::None);

        let mut writer = BytecodeWriter::new();
        writer.emit_halt();
        program.byte_code = writer.into_bytes();
        program
    }

    #[test]
    fn test_program_creation() {
        let program = Program::new("test");
        assert_eq!(program.instruction_set_id, INSTRUCTION_SET_ID);
        assert_eq!(program.instruction_set_version, INSTRUCTION_SET_VERSION);
        assert!(program.byte_code.is_empty());
    }

    #[test]
    fn test_encode_decode() {
        let program = sample();
        let decoded = Program::decode(&program.encode()).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = sample().encode();
        bytes[20] ^= 0xFF;
        assert!(matches!(
            Program::decode(&bytes),
            Err(ProgramError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = b"XXXX".to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Program::decode(&bytes),
            Err(ProgramError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_format() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&999u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            Program::decode(&bytes),
            Err(ProgramError::UnsupportedFormat(999))
        ));
    }

    #[test]
    fn test_content_hash_tracks_contents() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
        b.name = "gate".into();
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_summary_json() {
        let program = sample();
        let json = program.summary().to_json().unwrap();
        assert!(json.contains("\"_interact\""));
        assert!(json.contains("\"isOpen\""));
    }
}
