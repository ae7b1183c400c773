//! Programmatic program construction
//!
//! Used by the assembler and by tests that need a small program without
//! going through assembly text.

use crate::encoder::BytecodeWriter;
use crate::heap::{HeapError, PendingReference};
use crate::program::Program;
use crate::symbols::{Symbol, SymbolError};
use crate::sync::Interpolation;
use crate::value::{TypeTag, Value};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors raised while building a program
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    /// Duplicate variable or entry point
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    /// Initial value does not fit the declared type
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Export or sync of an undeclared variable
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Incremental builder for [`Program`]
pub struct ProgramBuilder {
    program: Program,
    code: BytecodeWriter,
    externs: FxHashMap<String, u32>,
    anonymous: u32,
}

impl ProgramBuilder {
    /// Start an empty program
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            program: Program::new(name),
            code: BytecodeWriter::new(),
            externs: FxHashMap::default(),
            anonymous: 0,
        }
    }

    /// Declare a variable with an initial value, returning its heap address
    pub fn variable(
        &mut self,
        name: impl Into<String>,
        type_tag: TypeTag,
        value: Value,
    ) -> Result<u32, BuildError> {
        let name = name.into();
        if self.program.symbol_table.has_symbol(&name) {
            return Err(SymbolError::Duplicate(name).into());
        }
        let address = self.program.heap.push(type_tag, value)?;
        self.program.symbol_table.insert(Symbol {
            name,
            address,
            type_tag,
            exported: false,
        })?;
        Ok(address)
    }

    /// Declare a variable holding the default value of its type
    pub fn default_variable(
        &mut self,
        name: impl Into<String>,
        type_tag: TypeTag,
    ) -> Result<u32, BuildError> {
        self.variable(name, type_tag, type_tag.default_value())
    }

    /// Declare a variable the host resolves to this instance
    pub fn this_reference(
        &mut self,
        name: impl Into<String>,
        type_tag: TypeTag,
    ) -> Result<u32, BuildError> {
        let name = name.into();
        if self.program.symbol_table.has_symbol(&name) {
            return Err(SymbolError::Duplicate(name).into());
        }
        let address = self
            .program
            .heap
            .push_pending(type_tag, PendingReference::This(type_tag));
        self.program.symbol_table.insert(Symbol {
            name,
            address,
            type_tag,
            exported: false,
        })?;
        Ok(address)
    }

    /// Declare an anonymous constant
    pub fn constant(&mut self, type_tag: TypeTag, value: Value) -> Result<u32, BuildError> {
        let name = format!("__const_{}", self.anonymous);
        self.anonymous += 1;
        self.variable(name, type_tag, value)
    }

    /// Heap address of an extern signature string, declared on first use
    pub fn extern_signature(&mut self, signature: &str) -> Result<u32, BuildError> {
        if let Some(&address) = self.externs.get(signature) {
            return Ok(address);
        }
        let name = format!("__extern_{}", self.externs.len());
        let address = self.variable(name, TypeTag::String, Value::String(signature.to_string()))?;
        self.externs.insert(signature.to_string(), address);
        Ok(address)
    }

    /// Mark a declared variable as public
    pub fn export_variable(&mut self, name: &str) -> Result<(), BuildError> {
        if self.program.symbol_table.export(name) {
            Ok(())
        } else {
            Err(BuildError::UnknownSymbol(name.to_string()))
        }
    }

    /// Mark a declared variable as network synced
    pub fn sync_variable(&mut self, name: &str, interpolation: Interpolation) -> Result<(), BuildError> {
        if !self.program.symbol_table.has_symbol(name) {
            return Err(BuildError::UnknownSymbol(name.to_string()));
        }
        self.program.sync_metadata.add(name, interpolation);
        Ok(())
    }

    /// Declare an entry point at the current code offset
    pub fn entry_point(&mut self, name: impl Into<String>, exported: bool) -> Result<u32, BuildError> {
        let address = self.code.offset() as u32;
        self.entry_point_at(name, address, exported)?;
        Ok(address)
    }

    /// Declare an entry point at an explicit code address
    pub fn entry_point_at(
        &mut self,
        name: impl Into<String>,
        address: u32,
        exported: bool,
    ) -> Result<(), BuildError> {
        self.program.entry_points.insert(Symbol {
            name: name.into(),
            address,
            type_tag: TypeTag::Object,
            exported,
        })?;
        Ok(())
    }

    /// Emit `EXTERN` for `signature`, declaring the signature string if needed
    pub fn emit_extern(&mut self, signature: &str) -> Result<(), BuildError> {
        let address = self.extern_signature(signature)?;
        self.code.emit_extern(address);
        Ok(())
    }

    /// Heap address of a declared variable
    pub fn symbol_address(&self, name: &str) -> Option<u32> {
        self.program.symbol_table.address_of(name)
    }

    /// Current code offset
    pub fn offset(&self) -> u32 {
        self.code.offset() as u32
    }

    /// Instruction stream under construction
    pub fn code(&mut self) -> &mut BytecodeWriter {
        &mut self.code
    }

    /// Finish the program
    pub fn build(mut self) -> Program {
        self.program.byte_code = self.code.into_bytes();
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_addresses_in_declaration_order() {
        let mut builder = ProgramBuilder::new("t");
        let a = builder.variable("a", TypeTag::Int32, Value::Int32(1)).unwrap();
        let b = builder.default_variable("b", TypeTag::String).unwrap();
        let sig = builder.extern_signature("X.__f__SystemVoid").unwrap();
        let again = builder.extern_signature("X.__f__SystemVoid").unwrap();

        assert_eq!((a, b, sig), (0, 1, 2));
        assert_eq!(sig, again);

        let start = builder.entry_point("_start", true).unwrap();
        builder.code().emit_halt();
        let program = builder.build();

        assert_eq!(start, 0);
        assert_eq!(program.entry_points.address_of("_start"), Some(0));
        assert_eq!(program.byte_code.len(), 8);
    }

    #[test]
    fn test_rejects_bad_declarations() {
        let mut builder = ProgramBuilder::new("t");
        builder.variable("a", TypeTag::Int32, Value::Int32(1)).unwrap();

        assert_eq!(
            builder.variable("a", TypeTag::Int32, Value::Int32(2)),
            Err(BuildError::Symbol(SymbolError::Duplicate("a".into())))
        );
        assert!(matches!(
            builder.variable("b", TypeTag::Int32, Value::Boolean(true)),
            Err(BuildError::Heap(HeapError::TypeMismatch { .. }))
        ));
        assert_eq!(
            builder.export_variable("missing"),
            Err(BuildError::UnknownSymbol("missing".into()))
        );
    }

    #[test]
    fn test_this_reference_is_pending() {
        let mut builder = ProgramBuilder::new("t");
        let this = builder.this_reference("__this", TypeTag::Transform).unwrap();
        let program = builder.build();

        assert_eq!(
            program.heap.pending_references().collect::<Vec<_>>(),
            vec![(this, PendingReference::This(TypeTag::Transform))]
        );
    }
}
