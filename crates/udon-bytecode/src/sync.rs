//! Network synchronisation metadata
//!
//! The compiler records which variables are replicated and how remote copies
//! are smoothed. The runtime only reads the variable names; interpolation is
//! carried for the transport.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use serde::Serialize;

/// How a remote copy approaches a new value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Interpolation {
    /// Snap to the new value
    None,
    /// Linear interpolation
    Linear,
    /// Smoothed interpolation
    Smooth,
}

impl Interpolation {
    /// Assembly keyword
    pub fn name(self) -> &'static str {
        match self {
            Interpolation::None => "none",
            Interpolation::Linear => "linear",
            Interpolation::Smooth => "smooth",
        }
    }

    /// Parse an assembly keyword
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Interpolation::None),
            "linear" => Some(Interpolation::Linear),
            "smooth" => Some(Interpolation::Smooth),
            _ => None,
        }
    }
}

/// Sync settings for one variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMetadata {
    /// Symbol name of the synced variable
    pub name: String,
    /// Interpolation used for the value
    pub interpolation: Interpolation,
}

/// All synced variables of a program, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetadataTable {
    entries: Vec<SyncMetadata>,
}

impl SyncMetadataTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `name`
    pub fn add(&mut self, name: impl Into<String>, interpolation: Interpolation) {
        let name = name.into();
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.interpolation = interpolation,
            None => self.entries.push(SyncMetadata {
                name,
                interpolation,
            }),
        }
    }

    /// Look up the entry for `name`
    pub fn get(&self, name: &str) -> Option<&SyncMetadata> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &SyncMetadata> {
        self.entries.iter()
    }

    /// Number of synced variables
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is synced
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the table
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.entries.len() as u32);
        for entry in &self.entries {
            writer.emit_string(&entry.name);
            writer.emit_u8(entry.interpolation as u8);
        }
    }

    /// Decode the table
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut table = Self::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            let offset = reader.position();
            let interpolation = match reader.read_u8()? {
                0 => Interpolation::None,
                1 => Interpolation::Linear,
                2 => Interpolation::Smooth,
                tag => {
                    return Err(DecodeError::InvalidTag {
                        kind: "interpolation",
                        tag,
                        offset,
                    })
                }
            };
            table.add(name, interpolation);
        }
        Ok(table)
    }
}
