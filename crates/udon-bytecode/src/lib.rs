//! Udon Bytecode Definitions
//!
//! This crate provides the instruction set, heap model, symbol tables and
//! program container format for the Udon virtual machine, together with an
//! assembler, disassembler and verifier.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod asm;
pub mod builder;
pub mod disasm;
pub mod encoder;
pub mod heap;
pub mod opcode;
pub mod program;
pub mod symbols;
pub mod sync;
pub mod value;
pub mod verify;

pub use asm::{assemble, AsmError};
pub use builder::{BuildError, ProgramBuilder};
pub use disasm::disassemble;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use heap::{Heap, HeapError, HeapSlot, HeapValue, PendingReference};
pub use opcode::{Opcode, HALT_ADDRESS, WORD_SIZE};
pub use program::{Program, ProgramError, ProgramSummary, INSTRUCTION_SET_ID, INSTRUCTION_SET_VERSION};
pub use symbols::{Symbol, SymbolError, SymbolTable};
pub use sync::{Interpolation, SyncMetadata, SyncMetadataTable};
pub use value::{ObjectKind, ObjectRef, TypeTag, Value};
pub use verify::{
    decode_instructions, verify_program, verify_structure, Instruction, VerifyError,
};
