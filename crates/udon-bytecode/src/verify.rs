//! Program verification
//!
//! Checks performed before a program is handed to a VM: the instruction set
//! is recognised, every instruction decodes, operands point inside the heap,
//! jumps land on instruction boundaries, and both symbol tables agree with
//! the heap and the instruction stream.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::heap::HeapValue;
use crate::opcode::{Opcode, HALT_ADDRESS};
use crate::program::{Program, INSTRUCTION_SET_ID, INSTRUCTION_SET_VERSION};
use crate::value::{TypeTag, Value};
use rustc_hash::FxHashSet;

/// Program verification errors
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum VerifyError {
    /// Instruction set id or version is not supported
    #[error("Unsupported instruction set {id} {version}")]
    UnsupportedInstructionSet {
        /// Identifier found in the program
        id: String,
        /// Version found in the program
        version: String,
    },

    /// Invalid opcode
    #[error("Invalid opcode {opcode} at offset {offset}")]
    InvalidOpcode {
        /// Opcode word
        opcode: u32,
        /// Code offset
        offset: u32,
    },

    /// Instruction cut off by the end of the byte code
    #[error("Truncated instruction at offset {0}")]
    Truncated(u32),

    /// Operand names a heap slot that does not exist
    #[error("Invalid heap address {address:#x} at offset {offset}")]
    InvalidHeapAddress {
        /// Operand
        address: u32,
        /// Code offset
        offset: u32,
    },

    /// Jump target is not an instruction boundary
    #[error("Invalid jump target {target:#x} at offset {offset}")]
    InvalidJumpTarget {
        /// Operand
        target: u32,
        /// Code offset
        offset: u32,
    },

    /// EXTERN operand does not hold a signature string
    #[error("EXTERN operand {address:#x} at offset {offset} is not a signature string")]
    InvalidExternOperand {
        /// Operand
        address: u32,
        /// Code offset
        offset: u32,
    },

    /// Entry point is not an instruction boundary
    #[error("Entry point {name} at {address:#x} is not an instruction boundary")]
    InvalidEntryPoint {
        /// Entry point name
        name: String,
        /// Code address
        address: u32,
    },

    /// Symbol points outside the heap
    #[error("Symbol {name} points at missing heap address {address:#x}")]
    InvalidSymbolAddress {
        /// Symbol name
        name: String,
        /// Heap address
        address: u32,
    },

    /// Symbol type disagrees with the heap slot
    #[error("Symbol {name} is declared {symbol} but its heap slot is {slot}")]
    SymbolTypeMismatch {
        /// Symbol name
        name: String,
        /// Type recorded in the symbol table
        symbol: TypeTag,
        /// Type recorded on the heap
        slot: TypeTag,
    },

    /// Initial heap value does not fit its slot
    #[error("Heap slot {0:#x} holds a value that does not fit its declared type")]
    InvalidHeapValue(u32),

    /// Synced variable is not declared
    #[error("Synced variable {0} is not declared")]
    InvalidSyncVariable(String),
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Code offset of the opcode word
    pub offset: u32,
    /// Opcode
    pub opcode: Opcode,
    /// Operand word, if the opcode has one
    pub operand: Option<u32>,
}

/// Decode the whole instruction stream
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, VerifyError> {
    let mut instructions = Vec::new();
    let mut reader = BytecodeReader::new(code);

    while reader.has_more() {
        let offset = reader.position() as u32;
        let opcode = reader.read_opcode().map_err(|e| match e {
            DecodeError::InvalidOpcode(opcode, _) => VerifyError::InvalidOpcode { opcode, offset },
            _ => VerifyError::Truncated(offset),
        })?;
        let operand = if opcode.has_operand() {
            Some(reader.read_u32().map_err(|_| VerifyError::Truncated(offset))?)
        } else {
            None
        };
        instructions.push(Instruction {
            offset,
            opcode,
            operand,
        });
    }

    Ok(instructions)
}

/// Verify a program targeting this crate's own instruction set
///
/// Accepts [`INSTRUCTION_SET_ID`] at the major version of
/// [`INSTRUCTION_SET_VERSION`], then runs [`verify_structure`].
pub fn verify_program(program: &Program) -> Result<(), VerifyError> {
    if program.instruction_set_id != INSTRUCTION_SET_ID
        || program.instruction_set_version.major != INSTRUCTION_SET_VERSION.major
    {
        return Err(VerifyError::UnsupportedInstructionSet {
            id: program.instruction_set_id.clone(),
            version: program.instruction_set_version.to_string(),
        });
    }
    verify_structure(program)
}

/// Verify everything except the instruction set declaration
///
/// For callers that decide which instruction sets they accept themselves.
pub fn verify_structure(program: &Program) -> Result<(), VerifyError> {
    verify_heap(program)?;
    verify_symbols(program)?;

    let instructions = decode_instructions(&program.byte_code)?;
    let boundaries: FxHashSet<u32> = instructions.iter().map(|i| i.offset).collect();

    for instruction in &instructions {
        verify_instruction(instruction, program, &boundaries)?;
    }

    for entry in program.entry_points.iter() {
        if !boundaries.contains(&entry.address) {
            return Err(VerifyError::InvalidEntryPoint {
                name: entry.name.clone(),
                address: entry.address,
            });
        }
    }

    for entry in program.sync_metadata.iter() {
        if !program.symbol_table.has_symbol(&entry.name) {
            return Err(VerifyError::InvalidSyncVariable(entry.name.clone()));
        }
    }

    Ok(())
}

fn verify_heap(program: &Program) -> Result<(), VerifyError> {
    for address in 0..program.heap.len() as u32 {
        let slot = program
            .heap
            .slot(address)
            .map_err(|_| VerifyError::InvalidHeapValue(address))?;
        if let HeapValue::Resolved(value) = &slot.value {
            if !value.is_assignable_to(slot.declared) {
                return Err(VerifyError::InvalidHeapValue(address));
            }
        }
    }
    Ok(())
}

fn verify_symbols(program: &Program) -> Result<(), VerifyError> {
    for symbol in program.symbol_table.iter() {
        let slot = program.heap.declared_type(symbol.address).map_err(|_| {
            VerifyError::InvalidSymbolAddress {
                name: symbol.name.clone(),
                address: symbol.address,
            }
        })?;
        if slot != symbol.type_tag {
            return Err(VerifyError::SymbolTypeMismatch {
                name: symbol.name.clone(),
                symbol: symbol.type_tag,
                slot,
            });
        }
    }
    Ok(())
}

fn verify_instruction(
    instruction: &Instruction,
    program: &Program,
    boundaries: &FxHashSet<u32>,
) -> Result<(), VerifyError> {
    let Some(operand) = instruction.operand else {
        return Ok(());
    };
    let offset = instruction.offset;

    if instruction.opcode.operand_is_heap_address() && !program.heap.contains(operand) {
        return Err(VerifyError::InvalidHeapAddress {
            address: operand,
            offset,
        });
    }

    match instruction.opcode {
        Opcode::Jump | Opcode::JumpIfFalse => {
            if operand != HALT_ADDRESS && !boundaries.contains(&operand) {
                return Err(VerifyError::InvalidJumpTarget {
                    target: operand,
                    offset,
                });
            }
        }
        Opcode::Extern => {
            if !matches!(program.heap.get(operand), Ok(Value::String(_))) {
                return Err(VerifyError::InvalidExternOperand {
                    address: operand,
                    offset,
                });
            }
        }
        _ => {}
    }

    Ok(())
}
