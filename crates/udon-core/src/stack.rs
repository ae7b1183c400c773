//! Operand stack
//!
//! Udon instructions never push values, only heap addresses. The stack is
//! shared by every run on one VM, so nested runs record the depth on entry
//! and truncate back to it on exit.

use crate::options::DEFAULT_MAX_STACK_DEPTH;
use crate::{VmError, VmResult};

/// Stack of heap addresses with an overflow limit
#[derive(Debug, Clone)]
pub struct OperandStack {
    slots: Vec<u32>,
    max_depth: usize,
}

impl Default for OperandStack {
    fn default() -> Self {
        Self::new()
    }
}

impl OperandStack {
    /// Create a stack with the default depth limit
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_STACK_DEPTH)
    }

    /// Create a stack with an explicit depth limit
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_depth,
        }
    }

    /// Push an address
    #[inline]
    pub fn push(&mut self, address: u32) -> VmResult<()> {
        if self.slots.len() >= self.max_depth {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(address);
        Ok(())
    }

    /// Pop an address
    #[inline]
    pub fn pop(&mut self) -> VmResult<u32> {
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `count` addresses, returned in push order
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<u32>> {
        if count > self.slots.len() {
            return Err(VmError::StackUnderflow);
        }
        let start = self.slots.len() - count;
        Ok(self.slots.split_off(start))
    }

    /// Top address without popping
    pub fn peek(&self) -> Option<u32> {
        self.slots.last().copied()
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop everything above `depth`
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    /// Remove all addresses
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = OperandStack::new();
        stack.push(4).unwrap();
        stack.push(7).unwrap();

        assert_eq!(stack.peek(), Some(7));
        assert_eq!(stack.pop().unwrap(), 7);
        assert_eq!(stack.pop().unwrap(), 4);
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn test_pop_n_keeps_push_order() {
        let mut stack = OperandStack::new();
        for address in [1, 2, 3, 4] {
            stack.push(address).unwrap();
        }

        assert_eq!(stack.pop_n(3).unwrap(), vec![2, 3, 4]);
        assert_eq!(stack.depth(), 1);
        assert!(matches!(stack.pop_n(2), Err(VmError::StackUnderflow)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_overflow() {
        let mut stack = OperandStack::with_max_depth(2);
        stack.push(0).unwrap();
        stack.push(0).unwrap();
        assert!(matches!(stack.push(0), Err(VmError::StackOverflow)));
    }

    #[test]
    fn test_truncate() {
        let mut stack = OperandStack::new();
        stack.push(1).unwrap();
        let depth = stack.depth();
        stack.push(2).unwrap();
        stack.push(3).unwrap();

        stack.truncate(depth);
        assert_eq!(stack.depth(), 1);
        stack.clear();
        assert!(stack.is_empty());
    }
}
