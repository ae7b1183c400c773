//! Virtual machine execution and host calls

pub mod builtins;
mod externs;
mod interpreter;

pub use externs::{Extern, ExternCall, ExternError, ExternFn, ExternRegistry};
pub use interpreter::{UdonVm, RESULT_ABORTED, RESULT_OK};
