//! Udon VM Core Runtime
//!
//! This crate provides the runtime that executes compiled Udon programs:
//! - Bytecode interpreter with re-entrant execution
//! - Extern registry and built-in externs
//! - Runtime context shared by all behaviours of one host
//! - Behaviour host that loads programs and dispatches events

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod behaviour;
pub mod context;
pub mod options;
pub mod stack;
pub mod vm;

pub use behaviour::{
    BehaviourState, EventCategory, EventKind, EventTable, HostObjects, InitHookError, LoadError,
    PublicVariable, PublicVariableError, PublicVariableTable, SerializedPublicVariables,
    UdonBehaviour,
};
pub use context::{BehaviourId, NetworkEventRequest, NetworkEventTarget, NetworkRelay, UdonRuntime};
pub use options::{OptionsError, RuntimeOptions};
pub use stack::OperandStack;
pub use vm::{Extern, ExternCall, ExternError, ExternRegistry, UdonVm, RESULT_ABORTED, RESULT_OK};

use udon_bytecode::{HeapError, VerifyError};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// No program has been loaded
    #[error("No program loaded")]
    NoProgram,

    /// Program targets an instruction set this runtime does not run
    #[error("Unsupported instruction set {id} {version}")]
    UnsupportedInstructionSet {
        /// Identifier declared by the program
        id: String,
        /// Version declared by the program
        version: String,
    },

    /// Program failed verification
    #[error("Invalid program: {0}")]
    InvalidProgram(#[from] VerifyError),

    /// Heap still holds a pending reference
    #[error("Unresolved reference at heap address {0:#x}")]
    UnresolvedReference(u32),

    /// Instance heap does not have the program's layout
    #[error("Heap layout mismatch: program has {expected} slots, heap has {actual}")]
    HeapLayoutMismatch {
        /// Slots in the program's heap template
        expected: usize,
        /// Slots in the supplied heap
        actual: usize,
    },

    /// Undefined opcode
    #[error("Invalid opcode {opcode} at {pc:#x}")]
    InvalidOpcode {
        /// Opcode word
        opcode: u32,
        /// Program counter
        pc: u32,
    },

    /// Program counter left the byte code without halting
    #[error("Program counter {0:#x} is outside the byte code")]
    ProgramCounterOutOfRange(u32),

    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Invalid heap access
    #[error("Heap error: {0}")]
    Heap(#[from] HeapError),

    /// Heap value has the wrong type for the instruction
    #[error("Heap address {address:#x} holds {actual}, expected {expected}")]
    TypeMismatch {
        /// Heap address
        address: u32,
        /// Type the instruction needs
        expected: &'static str,
        /// Value found
        actual: String,
    },

    /// EXTERN names a signature nobody registered
    #[error("Unknown extern {0}")]
    UnknownExtern(String),

    /// Extern reported a failure
    #[error("Extern {signature} failed: {source}")]
    Extern {
        /// Extern signature
        signature: String,
        /// Underlying error
        #[source]
        source: ExternError,
    },

    /// Entry points nested deeper than the runtime allows
    #[error("Nested execution exceeded {0} levels")]
    RecursionLimit(usize),

    /// A nested run on the same VM faulted
    #[error("VM halted by an earlier fault")]
    Halted,
}

impl VmError {
    /// Non-zero result code reported for this fault
    pub fn result_code(&self) -> u32 {
        match self {
            VmError::NoProgram => 2,
            VmError::UnsupportedInstructionSet { .. } => 3,
            VmError::InvalidProgram(_) => 4,
            VmError::UnresolvedReference(_) => 5,
            VmError::HeapLayoutMismatch { .. } => 6,
            VmError::InvalidOpcode { .. } => 7,
            VmError::ProgramCounterOutOfRange(_) => 8,
            VmError::StackOverflow => 9,
            VmError::StackUnderflow => 10,
            VmError::Heap(_) => 11,
            VmError::TypeMismatch { .. } => 12,
            VmError::UnknownExtern(_) => 13,
            VmError::Extern { .. } => 14,
            VmError::Halted => 15,
            VmError::RecursionLimit(_) => 16,
        }
    }
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
