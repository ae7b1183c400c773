//! Virtual machine interpreter
//!
//! All state lives behind `Cell`/`RefCell` so that an extern can re-enter the
//! same VM (through a behaviour dispatching an event on itself) while an
//! outer `interpret` call is still on the Rust stack. No borrow is held
//! across an extern call.

use crate::context::UdonRuntime;
use crate::options::RuntimeOptions;
use crate::stack::OperandStack;
use crate::vm::externs::ExternCall;
use crate::{VmError, VmResult};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;
use udon_bytecode::{verify_structure, Heap, HeapError, Opcode, Program, Value, HALT_ADDRESS, WORD_SIZE};

/// Result code of a run that reached the halt address
pub const RESULT_OK: u32 = 0;

/// Result code of a run stopped by [`UdonVm::request_abort`]
pub const RESULT_ABORTED: u32 = 1;

/// Udon virtual machine
pub struct UdonVm {
    options: RuntimeOptions,
    program: RefCell<Option<Rc<Program>>>,
    heap: RefCell<Heap>,
    stack: RefCell<OperandStack>,
    pc: Cell<u32>,
    halted: Cell<bool>,
    faulted: Cell<bool>,
    abort_requested: Cell<bool>,
}

impl Default for UdonVm {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}

impl UdonVm {
    /// Create a VM with no program loaded
    pub fn new(options: RuntimeOptions) -> Self {
        let stack = OperandStack::with_max_depth(options.max_stack_depth);
        Self {
            options,
            program: RefCell::new(None),
            heap: RefCell::new(Heap::new()),
            stack: RefCell::new(stack),
            pc: Cell::new(0),
            halted: Cell::new(false),
            faulted: Cell::new(false),
            abort_requested: Cell::new(false),
        }
    }

    /// Load a program using its own heap template
    pub fn load_program(&self, program: Rc<Program>) -> VmResult<()> {
        let heap = program.heap.clone();
        self.load_program_with_heap(program, heap)
    }

    /// Load a program with an instance heap prepared by the caller
    ///
    /// The heap must have the program's layout and hold no pending
    /// references. Nothing is replaced unless every check passes.
    pub fn load_program_with_heap(&self, program: Rc<Program>, heap: Heap) -> VmResult<()> {
        if !self
            .options
            .supports(&program.instruction_set_id, &program.instruction_set_version)
        {
            return Err(VmError::UnsupportedInstructionSet {
                id: program.instruction_set_id.clone(),
                version: program.instruction_set_version.to_string(),
            });
        }
        verify_structure(&program)?;
        if heap.len() != program.heap.len() {
            return Err(VmError::HeapLayoutMismatch {
                expected: program.heap.len(),
                actual: heap.len(),
            });
        }
        if let Some((address, _)) = heap.pending_references().next() {
            return Err(VmError::UnresolvedReference(address));
        }

        *self.program.borrow_mut() = Some(program);
        *self.heap.borrow_mut() = heap;
        self.stack.borrow_mut().clear();
        self.pc.set(0);
        self.halted.set(false);
        self.faulted.set(false);
        self.abort_requested.set(false);
        Ok(())
    }

    /// Loaded program
    pub fn program(&self) -> Option<Rc<Program>> {
        self.program.borrow().clone()
    }

    /// Address of the next instruction
    pub fn program_counter(&self) -> u32 {
        self.pc.get()
    }

    /// Move the next-instruction pointer
    pub fn set_program_counter(&self, address: u32) {
        self.pc.set(address);
    }

    /// Whether the last run ended at the halt address
    pub fn is_halted(&self) -> bool {
        self.halted.get()
    }

    /// Whether a run has faulted since the program was loaded
    pub fn is_faulted(&self) -> bool {
        self.faulted.get()
    }

    /// Refuse further runs until a program is loaded again
    pub fn mark_faulted(&self) {
        self.faulted.set(true);
    }

    /// Stop the current run at the next instruction boundary
    pub fn request_abort(&self) {
        self.abort_requested.set(true);
    }

    /// Current operand stack depth
    pub fn stack_depth(&self) -> usize {
        self.stack.borrow().depth()
    }

    /// Drop operand stack entries above `depth`
    pub fn truncate_stack(&self, depth: usize) {
        self.stack.borrow_mut().truncate(depth);
    }

    /// Copy of the value at `address`
    pub fn heap_value(&self, address: u32) -> Result<Value, HeapError> {
        self.heap.borrow().get(address).cloned()
    }

    /// Type-checked write of `value` to `address`
    pub fn set_heap_value(&self, address: u32, value: Value) -> Result<(), HeapError> {
        self.heap.borrow_mut().set(address, value)
    }

    /// Snapshot of the instance heap
    pub fn heap(&self) -> Heap {
        self.heap.borrow().clone()
    }

    /// Run from the current program counter until halt, abort or fault
    ///
    /// Returns [`RESULT_OK`] when the halt address is reached and
    /// [`RESULT_ABORTED`] after an abort request. Faults are returned as
    /// errors and leave the VM refusing further runs.
    pub fn interpret(&self, runtime: &UdonRuntime) -> VmResult<u32> {
        let program = self.program().ok_or(VmError::NoProgram)?;
        if self.faulted.get() {
            return Err(VmError::Halted);
        }
        self.halted.set(false);

        loop {
            if self.faulted.get() {
                return Err(VmError::Halted);
            }
            if self.abort_requested.replace(false) {
                return Ok(RESULT_ABORTED);
            }
            let pc = self.pc.get();
            if pc == HALT_ADDRESS {
                self.halted.set(true);
                return Ok(RESULT_OK);
            }
            if let Err(error) = self.step(&program.byte_code, pc, runtime) {
                self.faulted.set(true);
                return Err(error);
            }
        }
    }

    fn step(&self, code: &[u8], pc: u32, runtime: &UdonRuntime) -> VmResult<()> {
        let word = fetch(code, pc)?;
        let opcode = Opcode::from_u32(word).ok_or(VmError::InvalidOpcode { opcode: word, pc })?;
        let operand = if opcode.has_operand() {
            fetch(code, pc + WORD_SIZE)?
        } else {
            0
        };
        trace!(pc, opcode = opcode.name(), operand, "step");

        self.pc.set(pc + opcode.size());

        match opcode {
            Opcode::Nop | Opcode::Annotation => {}
            Opcode::Push => self.stack.borrow_mut().push(operand)?,
            Opcode::Pop => {
                self.stack.borrow_mut().pop()?;
            }
            Opcode::JumpIfFalse => {
                let address = self.stack.borrow_mut().pop()?;
                let value = self.heap_value(address)?;
                let condition = value.as_bool().ok_or_else(|| VmError::TypeMismatch {
                    address,
                    expected: "SystemBoolean",
                    actual: value.to_string(),
                })?;
                if !condition {
                    self.pc.set(operand);
                }
            }
            Opcode::Jump => self.pc.set(operand),
            Opcode::Extern => self.call_extern(operand, runtime)?,
            Opcode::JumpIndirect => {
                let value = self.heap_value(operand)?;
                let target = value.as_u32().ok_or_else(|| VmError::TypeMismatch {
                    address: operand,
                    expected: "SystemUInt32",
                    actual: value.to_string(),
                })?;
                self.pc.set(target);
            }
            Opcode::Copy => {
                let (destination, source) = {
                    let mut stack = self.stack.borrow_mut();
                    (stack.pop()?, stack.pop()?)
                };
                self.heap.borrow_mut().copy(source, destination)?;
            }
        }

        Ok(())
    }

    fn call_extern(&self, address: u32, runtime: &UdonRuntime) -> VmResult<()> {
        let signature = match self.heap_value(address)? {
            Value::String(signature) => signature,
            other => {
                return Err(VmError::TypeMismatch {
                    address,
                    expected: "SystemString",
                    actual: other.to_string(),
                })
            }
        };
        let registered = runtime
            .extern_for(&signature)
            .ok_or_else(|| VmError::UnknownExtern(signature.clone()))?;
        let args = self.stack.borrow_mut().pop_n(registered.arity)?;

        let call = ExternCall::new(self, runtime, &args);
        (registered.func)(&call).map_err(|source| VmError::Extern { signature, source })
    }
}

fn fetch(code: &[u8], offset: u32) -> VmResult<u32> {
    let start = offset as usize;
    let bytes = start
        .checked_add(WORD_SIZE as usize)
        .and_then(|end| code.get(start..end))
        .ok_or(VmError::ProgramCounterOutOfRange(offset))?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(word))
}
