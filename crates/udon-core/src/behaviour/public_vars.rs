//! Public variable table
//!
//! Initial values for exported variables, supplied by whoever hosts the
//! behaviour. The table persists as a byte blob plus a side list of host
//! object references, so object handles can be remapped by the persistence
//! layer without touching the blob.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use udon_bytecode::{
    BytecodeReader, BytecodeWriter, DecodeError, ObjectRef, SymbolTable, TypeTag, Value,
};

const BLOB_VERSION: u8 = 1;
const SLOT_INLINE: u8 = 0;
const SLOT_OBJECT: u8 = 1;

/// Public variable blob errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublicVariableError {
    /// Blob is malformed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Blob written by a newer format
    #[error("Unsupported public variable blob version {0}")]
    UnsupportedVersion(u8),

    /// Blob references an object the side list does not have
    #[error("Object reference {index} out of range ({len} objects)")]
    MissingObject {
        /// Index stored in the blob
        index: u32,
        /// Length of the side list
        len: usize,
    },
}

/// One externally supplied variable
#[derive(Debug, Clone, PartialEq)]
pub struct PublicVariable {
    /// Declared type
    pub type_tag: TypeTag,
    /// Value
    pub value: Value,
}

/// Persisted form of a [`PublicVariableTable`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedPublicVariables {
    /// Encoded names, types and primitive values
    pub bytes: Vec<u8>,
    /// Host object references, indexed from `bytes`
    pub objects: Vec<ObjectRef>,
}

/// Name → (type, value) for a behaviour's public variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicVariableTable {
    variables: BTreeMap<String, PublicVariable>,
}

impl PublicVariableTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a variable
    pub fn insert(&mut self, name: impl Into<String>, type_tag: TypeTag, value: Value) {
        self.variables
            .insert(name.into(), PublicVariable { type_tag, value });
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&PublicVariable> {
        self.variables.get(name)
    }

    /// Remove a variable
    pub fn remove(&mut self, name: &str) -> Option<PublicVariable> {
        self.variables.remove(name)
    }

    /// Check if `name` is present
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Variables sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PublicVariable)> {
        self.variables.iter().map(|(name, var)| (name.as_str(), var))
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Encode to a blob and an object side list
    pub fn serialize(&self) -> SerializedPublicVariables {
        let mut writer = BytecodeWriter::new();
        let mut objects = Vec::new();

        writer.emit_u8(BLOB_VERSION);
        writer.emit_u32(self.variables.len() as u32);
        for (name, variable) in &self.variables {
            writer.emit_string(name);
            variable.type_tag.encode(&mut writer);
            match &variable.value {
                Value::Object(object) => {
                    writer.emit_u8(SLOT_OBJECT);
                    writer.emit_u32(objects.len() as u32);
                    objects.push(*object);
                }
                value => {
                    writer.emit_u8(SLOT_INLINE);
                    value.encode(&mut writer);
                }
            }
        }

        SerializedPublicVariables {
            bytes: writer.into_bytes(),
            objects,
        }
    }

    /// Decode a blob without consulting any program
    pub fn decode(data: &SerializedPublicVariables) -> Result<Self, PublicVariableError> {
        let mut reader = BytecodeReader::new(&data.bytes);

        let version = reader.read_u8()?;
        if version != BLOB_VERSION {
            return Err(PublicVariableError::UnsupportedVersion(version));
        }

        let count = reader.read_u32()?;
        let mut table = Self::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            let type_tag = TypeTag::decode(&mut reader)?;
            let offset = reader.position();
            let value = match reader.read_u8()? {
                SLOT_INLINE => Value::decode(&mut reader)?,
                SLOT_OBJECT => {
                    let index = reader.read_u32()?;
                    let object = data.objects.get(index as usize).copied().ok_or(
                        PublicVariableError::MissingObject {
                            index,
                            len: data.objects.len(),
                        },
                    )?;
                    Value::Object(object)
                }
                tag => {
                    return Err(DecodeError::InvalidTag {
                        kind: "public variable slot",
                        tag,
                        offset,
                    }
                    .into())
                }
            };
            table.insert(name, type_tag, value);
        }

        Ok(table)
    }

    /// Decode a blob and reconcile it with the program's symbols
    pub fn deserialize(
        data: &SerializedPublicVariables,
        symbols: &SymbolTable,
    ) -> Result<Self, PublicVariableError> {
        let mut table = Self::decode(data)?;
        table.reset_mismatched(symbols);
        Ok(table)
    }

    /// Reset entries whose type no longer matches the declared symbol type
    /// to that type's default. Returns how many entries were reset.
    pub fn reset_mismatched(&mut self, symbols: &SymbolTable) -> usize {
        let mut reset = 0;
        for (name, variable) in self.variables.iter_mut() {
            let Some(symbol) = symbols.get(name) else {
                continue;
            };
            if variable.type_tag != symbol.type_tag || !variable.value.is_assignable_to(symbol.type_tag) {
                debug!(
                    variable = %name,
                    stored = %variable.type_tag,
                    declared = %symbol.type_tag,
                    "public variable type changed, resetting to default"
                );
                *variable = PublicVariable {
                    type_tag: symbol.type_tag,
                    value: symbol.type_tag.default_value(),
                };
                reset += 1;
            }
        }
        reset
    }
}
