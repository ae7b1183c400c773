//! Bytecode opcodes for the Udon VM
//!
//! Every instruction is a 32-bit opcode word, optionally followed by a single
//! 32-bit operand word. Operands are heap addresses, except for the two direct
//! jumps whose operand is a byte offset into the byte code.

/// Size in bytes of one opcode or operand word
pub const WORD_SIZE: u32 = 4;

/// Jumping to this address halts the VM successfully
pub const HALT_ADDRESS: u32 = 0xFFFF_FFFC;

/// Bytecode opcode enumeration
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0,
    /// Push a heap address onto the operand stack (operand: heap address)
    Push = 1,
    /// Pop and discard the top of the operand stack
    Pop = 2,
    /// Pop a heap address holding a Boolean, jump if it is false (operand: code address)
    JumpIfFalse = 4,
    /// Unconditional jump (operand: code address)
    Jump = 5,
    /// Call a host function whose signature is stored on the heap (operand: heap address)
    Extern = 6,
    /// Annotation for tooling, no runtime effect (operand: heap address)
    Annotation = 7,
    /// Jump to the UInt32 code address stored on the heap (operand: heap address)
    JumpIndirect = 8,
    /// Pop destination, pop source, copy the source value into the destination
    Copy = 9,
}

impl Opcode {
    /// Convert an opcode word to an opcode
    ///
    /// Returns None if the word does not correspond to a valid opcode.
    pub fn from_u32(word: u32) -> Option<Self> {
        match word {
            0 => Some(Self::Nop),
            1 => Some(Self::Push),
            2 => Some(Self::Pop),
            4 => Some(Self::JumpIfFalse),
            5 => Some(Self::Jump),
            6 => Some(Self::Extern),
            7 => Some(Self::Annotation),
            8 => Some(Self::JumpIndirect),
            9 => Some(Self::Copy),
            _ => None,
        }
    }

    /// Convert opcode to its word value
    #[inline]
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Assembly mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::Jump => "JUMP",
            Self::Extern => "EXTERN",
            Self::Annotation => "ANNOTATION",
            Self::JumpIndirect => "JUMP_INDIRECT",
            Self::Copy => "COPY",
        }
    }

    /// Look up an opcode by its assembly mnemonic
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NOP" => Some(Self::Nop),
            "PUSH" => Some(Self::Push),
            "POP" => Some(Self::Pop),
            "JUMP_IF_FALSE" => Some(Self::JumpIfFalse),
            "JUMP" => Some(Self::Jump),
            "EXTERN" => Some(Self::Extern),
            "ANNOTATION" => Some(Self::Annotation),
            "JUMP_INDIRECT" => Some(Self::JumpIndirect),
            "COPY" => Some(Self::Copy),
            _ => None,
        }
    }

    /// Whether the opcode word is followed by an operand word
    pub fn has_operand(self) -> bool {
        !matches!(self, Self::Nop | Self::Pop | Self::Copy)
    }

    /// Whether the operand is a heap address
    pub fn operand_is_heap_address(self) -> bool {
        matches!(
            self,
            Self::Push | Self::Extern | Self::Annotation | Self::JumpIndirect
        )
    }

    /// Total encoded size of the instruction in bytes
    pub fn size(self) -> u32 {
        if self.has_operand() {
            WORD_SIZE * 2
        } else {
            WORD_SIZE
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIfFalse | Self::JumpIndirect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::Nop,
            Opcode::Push,
            Opcode::Pop,
            Opcode::JumpIfFalse,
            Opcode::Jump,
            Opcode::Extern,
            Opcode::Annotation,
            Opcode::JumpIndirect,
            Opcode::Copy,
        ];

        for opcode in &opcodes {
            assert_eq!(Opcode::from_u32(opcode.to_u32()), Some(*opcode));
            assert_eq!(Opcode::from_name(opcode.name()), Some(*opcode));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u32(3), None);
        assert_eq!(Opcode::from_u32(10), None);
        assert_eq!(Opcode::from_u32(u32::MAX), None);
        assert_eq!(Opcode::from_name("RETURN"), None);
    }

    #[test]
    fn test_instruction_sizes() {
        assert_eq!(Opcode::Nop.size(), 4);
        assert_eq!(Opcode::Copy.size(), 4);
        assert_eq!(Opcode::Push.size(), 8);
        assert_eq!(Opcode::Jump.size(), 8);
    }

    #[test]
    fn test_operand_kinds() {
        assert!(Opcode::Push.operand_is_heap_address());
        assert!(Opcode::JumpIndirect.operand_is_heap_address());
        assert!(!Opcode::Jump.operand_is_heap_address());
        assert!(!Opcode::JumpIfFalse.operand_is_heap_address());
        assert!(Opcode::JumpIfFalse.is_jump());
        assert!(!Opcode::Extern.is_jump());
    }
}
