//! Extern registry
//!
//! An extern is a host function the program reaches through `EXTERN`. The
//! operand names a heap slot holding the signature string; the registered
//! arity says how many addresses are popped from the operand stack. Externs
//! read their inputs from and write their outputs to those heap addresses.

use super::UdonVm;
use crate::behaviour::UdonBehaviour;
use crate::context::{BehaviourId, UdonRuntime};
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use udon_bytecode::{HeapError, ObjectKind, Value};

/// Failures reported by extern implementations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExternError {
    /// Argument index beyond the registered arity
    #[error("Missing argument {0}")]
    MissingArgument(usize),

    /// Argument holds a value of the wrong type
    #[error("Argument {index} holds {actual}, expected {expected}")]
    ArgumentType {
        /// Argument index
        index: usize,
        /// Expected type name
        expected: &'static str,
        /// Value found
        actual: String,
    },

    /// Instance argument is null
    #[error("Argument {0} is null")]
    NullReference(usize),

    /// Behaviour handle does not name a live behaviour
    #[error("Unknown behaviour {0}")]
    UnknownBehaviour(u64),

    /// Heap access failed
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Host-side failure
    #[error("{0}")]
    Host(String),
}

/// Signature of an extern implementation
pub type ExternFn = dyn Fn(&ExternCall<'_>) -> Result<(), ExternError>;

/// A registered extern
#[derive(Clone)]
pub struct Extern {
    /// Number of addresses popped from the operand stack
    pub arity: usize,
    /// Implementation
    pub func: Rc<ExternFn>,
}

impl fmt::Debug for Extern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extern").field("arity", &self.arity).finish_non_exhaustive()
    }
}

/// Signature → extern map
#[derive(Debug, Default, Clone)]
pub struct ExternRegistry {
    externs: FxHashMap<String, Extern>,
}

impl ExternRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in externs
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtins::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) an extern
    pub fn register<F>(&mut self, signature: impl Into<String>, arity: usize, func: F)
    where
        F: Fn(&ExternCall<'_>) -> Result<(), ExternError> + 'static,
    {
        self.externs.insert(
            signature.into(),
            Extern {
                arity,
                func: Rc::new(func),
            },
        );
    }

    /// Look up an extern by signature
    pub fn get(&self, signature: &str) -> Option<&Extern> {
        self.externs.get(signature)
    }

    /// Check whether a signature is registered
    pub fn contains(&self, signature: &str) -> bool {
        self.externs.contains_key(signature)
    }

    /// Number of registered externs
    pub fn len(&self) -> usize {
        self.externs.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.externs.is_empty()
    }
}

/// Arguments and environment of one extern invocation
pub struct ExternCall<'a> {
    vm: &'a UdonVm,
    runtime: &'a UdonRuntime,
    args: &'a [u32],
}

impl<'a> ExternCall<'a> {
    pub(crate) fn new(vm: &'a UdonVm, runtime: &'a UdonRuntime, args: &'a [u32]) -> Self {
        Self { vm, runtime, args }
    }

    /// Runtime the calling VM belongs to
    pub fn runtime(&self) -> &UdonRuntime {
        self.runtime
    }

    /// Heap addresses popped for this call, in push order
    pub fn args(&self) -> &[u32] {
        self.args
    }

    fn address(&self, index: usize) -> Result<u32, ExternError> {
        self.args
            .get(index)
            .copied()
            .ok_or(ExternError::MissingArgument(index))
    }

    /// Value of argument `index`
    pub fn get(&self, index: usize) -> Result<Value, ExternError> {
        Ok(self.vm.heap_value(self.address(index)?)?)
    }

    /// Write `value` into the slot of argument `index`
    pub fn set(&self, index: usize, value: Value) -> Result<(), ExternError> {
        Ok(self.vm.set_heap_value(self.address(index)?, value)?)
    }

    /// Argument `index` as a Boolean
    pub fn get_bool(&self, index: usize) -> Result<bool, ExternError> {
        let value = self.get(index)?;
        value.as_bool().ok_or_else(|| mismatch(index, "SystemBoolean", &value))
    }

    /// Argument `index` as an Int32
    pub fn get_i32(&self, index: usize) -> Result<i32, ExternError> {
        let value = self.get(index)?;
        value.as_i32().ok_or_else(|| mismatch(index, "SystemInt32", &value))
    }

    /// Argument `index` as a Single
    pub fn get_f32(&self, index: usize) -> Result<f32, ExternError> {
        let value = self.get(index)?;
        value.as_f32().ok_or_else(|| mismatch(index, "SystemSingle", &value))
    }

    /// Argument `index` as a String; null reads as empty
    pub fn get_string(&self, index: usize) -> Result<String, ExternError> {
        match self.get(index)? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Err(mismatch(index, "SystemString", &other)),
        }
    }

    /// Behaviour named by argument `index`
    pub fn behaviour(&self, index: usize) -> Result<Rc<UdonBehaviour>, ExternError> {
        let value = self.get(index)?;
        let object = match value {
            Value::Null => return Err(ExternError::NullReference(index)),
            Value::Object(object) if object.kind == ObjectKind::UdonBehaviour => object,
            other => return Err(mismatch(index, "VRCUdonUdonBehaviour", &other)),
        };
        self.runtime
            .behaviour(BehaviourId::from_u64(object.id))
            .ok_or(ExternError::UnknownBehaviour(object.id))
    }
}

fn mismatch(index: usize, expected: &'static str, value: &Value) -> ExternError {
    ExternError::ArgumentType {
        index,
        expected,
        actual: value.to_string(),
    }
}
