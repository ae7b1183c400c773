//! Disassembler
//!
//! Renders a [`Program`] back into assembly text accepted by
//! [`assemble`](crate::asm::assemble). Operands that name a symbol or entry
//! point are printed by name; anything else is printed as a hex address.

use crate::heap::HeapValue;
use crate::opcode::{Opcode, HALT_ADDRESS};
use crate::program::Program;
use crate::verify::{decode_instructions, Instruction, VerifyError};
use rustc_hash::FxHashMap;
use std::fmt::Write;

/// Disassemble a program
pub fn disassemble(program: &Program) -> Result<String, VerifyError> {
    let instructions = decode_instructions(&program.byte_code)?;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "# {} ({} {})",
        program.name, program.instruction_set_id, program.instruction_set_version
    );
    write_data(program, &mut out);
    out.push('\n');
    write_code(program, &instructions, &mut out);

    Ok(out)
}

fn write_data(program: &Program, out: &mut String) {
    out.push_str(".data_start\n");
    for symbol in program.symbol_table.exported() {
        let _ = writeln!(out, "    .export {}", symbol.name);
    }
    for entry in program.sync_metadata.iter() {
        let _ = writeln!(out, "    .sync {}, {}", entry.name, entry.interpolation.name());
    }
    for symbol in program.symbol_table.iter() {
        let literal = match program.heap.slot(symbol.address).map(|slot| &slot.value) {
            Ok(HeapValue::Resolved(value)) => value.to_string(),
            Ok(HeapValue::Unresolved(_)) => "this".to_string(),
            Err(_) => "null".to_string(),
        };
        let _ = writeln!(out, "    {}: %{}, {}", symbol.name, symbol.type_tag, literal);
    }
    out.push_str(".data_end\n");
}

fn write_code(program: &Program, instructions: &[Instruction], out: &mut String) {
    let mut labels: FxHashMap<u32, Vec<&str>> = FxHashMap::default();
    for entry in program.entry_points.iter() {
        labels.entry(entry.address).or_default().push(&entry.name);
    }

    out.push_str(".code_start\n");
    for instruction in instructions {
        if let Some(names) = labels.get(&instruction.offset) {
            for name in names {
                if program.entry_points.get(name).is_some_and(|e| e.exported) {
                    let _ = writeln!(out, "    .export {}", name);
                }
                let _ = writeln!(out, "    {}:", name);
            }
        }

        let _ = write!(out, "        {}", instruction.opcode.name());
        if let Some(operand) = instruction.operand {
            let _ = write!(out, ", {}", format_operand(program, instruction.opcode, operand));
        }
        out.push('\n');
    }
    out.push_str(".code_end\n");
}

fn format_operand(program: &Program, opcode: Opcode, operand: u32) -> String {
    let table = match opcode {
        Opcode::Jump | Opcode::JumpIfFalse if operand == HALT_ADDRESS => None,
        Opcode::Jump | Opcode::JumpIfFalse => Some(&program.entry_points),
        _ => Some(&program.symbol_table),
    };
    match table.and_then(|table| table.symbol_at(operand)) {
        Some(symbol) => symbol.name.clone(),
        None => format!("{operand:#010X}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    const SOURCE: &str = r#"
.data_start
    .export greeting
    .sync greeting, smooth
    greeting: %SystemString, "hello"
    self: %UnityEngineGameObject, this
.data_end
.code_start
    .export _interact
    _interact:
        PUSH, greeting
        EXTERN, "UnityEngineDebug.__Log__SystemObject__SystemVoid"
        JUMP_IF_FALSE, _interact
        JUMP, 0xFFFFFFFC
.code_end
"#;

    #[test]
    fn test_disassembly_lists_everything() {
        let program = assemble("greeter", SOURCE).unwrap();
        let text = disassemble(&program).unwrap();

        assert!(text.contains(".export greeting"));
        assert!(text.contains(".sync greeting, smooth"));
        assert!(text.contains("greeting: %SystemString, \"hello\""));
        assert!(text.contains("self: %UnityEngineGameObject, this"));
        assert!(text.contains(".export _interact"));
        assert!(text.contains("PUSH, greeting"));
        assert!(text.contains("JUMP_IF_FALSE, _interact"));
        assert!(text.contains("JUMP, 0xFFFFFFFC"));
    }

    #[test]
    fn test_disassembly_reassembles() {
        let program = assemble("greeter", SOURCE).unwrap();
        let text = disassemble(&program).unwrap();
        let again = assemble("greeter", &text).unwrap();

        assert_eq!(again.byte_code, program.byte_code);
        assert_eq!(again.heap, program.heap);
        assert_eq!(again.symbol_table, program.symbol_table);
        assert_eq!(again.entry_points, program.entry_points);
    }
}
