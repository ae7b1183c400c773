//! Name ↔ address tables
//!
//! The same structure serves as the variable symbol table (names → heap
//! addresses) and the entry-point table (event names → code addresses).
//! Declaration order is preserved; dispatch order depends on it.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::value::TypeTag;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

/// Symbol table errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    /// Name declared twice
    #[error("Duplicate symbol: {0}")]
    Duplicate(String),
}

/// A named binding to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Heap address, or code address for entry points
    pub address: u32,
    /// Declared type (`Object` for entry points)
    pub type_tag: TypeTag,
    /// Visible to external callers
    pub exported: bool,
}

/// Ordered symbol table with unique names
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, usize>,
}

impl PartialEq for SymbolTable {
    fn eq(&self, other: &Self) -> bool {
        self.symbols == other.symbols
    }
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Add a symbol; names must be unique
    pub fn insert(&mut self, symbol: Symbol) -> Result<(), SymbolError> {
        if self.by_name.contains_key(&symbol.name) {
            return Err(SymbolError::Duplicate(symbol.name));
        }
        self.by_name.insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
        Ok(())
    }

    /// Look up a symbol by name
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&index| &self.symbols[index])
    }

    /// Mark an existing symbol as exported; returns false if it does not exist
    pub fn export(&mut self, name: &str) -> bool {
        match self.by_name.get(name) {
            Some(&index) => {
                self.symbols[index].exported = true;
                true
            }
            None => false,
        }
    }

    /// Check if `name` is declared
    pub fn has_symbol(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Address bound to `name`
    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.get(name).map(|symbol| symbol.address)
    }

    /// First symbol bound to `address`
    pub fn symbol_at(&self, address: u32) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.address == address)
    }

    /// All symbols in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Exported symbols in declaration order
    pub fn exported(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|symbol| symbol.exported)
    }

    /// Encode the table
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.symbols.len() as u32);
        for symbol in &self.symbols {
            writer.emit_string(&symbol.name);
            writer.emit_u32(symbol.address);
            symbol.type_tag.encode(writer);
            writer.emit_u8(symbol.exported as u8);
        }
    }

    /// Decode a table; duplicate names are rejected
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut table = Self::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            let address = reader.read_u32()?;
            let type_tag = TypeTag::decode(reader)?;
            let exported = reader.read_u8()? != 0;
            table
                .insert(Symbol {
                    name,
                    address,
                    type_tag,
                    exported,
                })
                .map_err(|SymbolError::Duplicate(name)| DecodeError::DuplicateSymbol(name))?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, address: u32, exported: bool) -> Symbol {
        Symbol {
            name: name.to_string(),
            address,
            type_tag: TypeTag::Int32,
            exported,
        }
    }

    #[test]
    fn test_lookup_both_ways() {
        let mut table = SymbolTable::new();
        table.insert(symbol("speed", 0, true)).unwrap();
        table.insert(symbol("__tmp", 1, false)).unwrap();

        assert_eq!(table.address_of("speed"), Some(0));
        assert_eq!(table.symbol_at(1).map(|s| s.name.as_str()), Some("__tmp"));
        assert_eq!(table.address_of("missing"), None);
        assert!(table.symbol_at(7).is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let mut table = SymbolTable::new();
        table.insert(symbol("a", 0, false)).unwrap();
        assert_eq!(
            table.insert(symbol("a", 1, false)),
            Err(SymbolError::Duplicate("a".to_string()))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_exported_keeps_declaration_order() {
        let mut table = SymbolTable::new();
        table.insert(symbol("c", 2, true)).unwrap();
        table.insert(symbol("a", 0, false)).unwrap();
        table.insert(symbol("b", 1, false)).unwrap();
        assert!(table.export("b"));
        assert!(!table.export("zzz"));

        let names: Vec<_> = table.exported().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn test_encode_decode() {
        let mut table = SymbolTable::new();
        table.insert(symbol("x", 4, true)).unwrap();

        let mut writer = BytecodeWriter::new();
        table.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = SymbolTable::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.address_of("x"), Some(4));
    }
}
