//! Assembler for Udon assembly text
//!
//! # Syntax
//!
//! ```text
//! # comment
//! .data_start
//!     .export count
//!     .sync count, none
//!     count: %SystemInt32, 0
//!     self: %UnityEngineGameObject, this
//! .data_end
//!
//! .code_start
//!     .export _interact
//!     _interact:
//!         PUSH, count
//!         EXTERN, "UnityEngineDebug.__Log__SystemObject__SystemVoid"
//!         JUMP, 0xFFFFFFFC
//! .code_end
//! ```
//!
//! Every code label becomes an entry point; `.export` makes it callable from
//! outside. String operands of `EXTERN` are interned as heap constants.

use crate::builder::{BuildError, ProgramBuilder};
use crate::opcode::Opcode;
use crate::program::Program;
use crate::sync::Interpolation;
use crate::value::{TypeTag, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';
const THIS_LITERAL: &str = "this";

/// Assembly errors, tagged with the 1-based source line
#[derive(Debug, Error, PartialEq)]
pub enum AsmError {
    /// Malformed line
    #[error("line {line}: {message}")]
    Syntax {
        /// Source line
        line: usize,
        /// Description
        message: String,
    },

    /// Label or variable used but never declared
    #[error("line {line}: undefined name {name}")]
    Undefined {
        /// Source line
        line: usize,
        /// Missing name
        name: String,
    },

    /// Declaration rejected by the program builder
    #[error("line {line}: {source}")]
    Build {
        /// Source line
        line: usize,
        /// Underlying error
        source: BuildError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Data,
    Code,
}

#[derive(Debug, Clone)]
enum Operand {
    Number(u32),
    Name(String),
    Str(String),
}

struct PendingInstruction {
    line: usize,
    opcode: Opcode,
    operand: Option<Operand>,
}

fn syntax(line: usize, message: impl Into<String>) -> AsmError {
    AsmError::Syntax {
        line,
        message: message.into(),
    }
}

/// Assemble source text into a program named `name`
pub fn assemble(name: &str, source: &str) -> Result<Program, AsmError> {
    let mut builder = ProgramBuilder::new(name);
    let mut section = Section::None;

    let mut data_exports: Vec<(usize, String)> = Vec::new();
    let mut syncs: Vec<(usize, String, Interpolation)> = Vec::new();
    let mut code_exports: Vec<(usize, String)> = Vec::new();
    let mut labels: Vec<(usize, String, u32)> = Vec::new();
    let mut label_offsets: FxHashMap<String, u32> = FxHashMap::default();
    let mut instructions: Vec<PendingInstruction> = Vec::new();
    let mut code_offset: u32 = 0;

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }

        match text {
            ".data_start" => {
                section = Section::Data;
                continue;
            }
            ".code_start" => {
                section = Section::Code;
                continue;
            }
            ".data_end" | ".code_end" => {
                section = Section::None;
                continue;
            }
            _ => {}
        }

        if let Some(rest) = text.strip_prefix(".export") {
            let exported = rest.trim().to_string();
            if exported.is_empty() {
                return Err(syntax(line, ".export needs a name"));
            }
            match section {
                Section::Data => data_exports.push((line, exported)),
                Section::Code => code_exports.push((line, exported)),
                Section::None => return Err(syntax(line, ".export outside of a section")),
            }
            continue;
        }

        if let Some(rest) = text.strip_prefix(".sync") {
            if section != Section::Data {
                return Err(syntax(line, ".sync is only allowed in the data section"));
            }
            let (variable, mode) = split_first_comma(rest.trim());
            let interpolation = match mode {
                None => Interpolation::None,
                Some(mode) => Interpolation::from_name(mode)
                    .ok_or_else(|| syntax(line, format!("unknown interpolation {mode}")))?,
            };
            syncs.push((line, variable.to_string(), interpolation));
            continue;
        }

        match section {
            Section::Data => parse_data_line(&mut builder, line, text)?,
            Section::Code => {
                if let Some(label) = text.strip_suffix(LABEL_SUFFIX) {
                    let label = label.trim().to_string();
                    if label_offsets.insert(label.clone(), code_offset).is_some() {
                        return Err(syntax(line, format!("duplicate label {label}")));
                    }
                    labels.push((line, label, code_offset));
                    continue;
                }
                let instruction = parse_instruction(line, text)?;
                code_offset += instruction.opcode.size();
                instructions.push(instruction);
            }
            Section::None => return Err(syntax(line, "statement outside of a section")),
        }
    }

    for (line, variable) in data_exports {
        builder
            .export_variable(&variable)
            .map_err(|_| AsmError::Undefined { line, name: variable })?;
    }
    for (line, variable, interpolation) in syncs {
        builder
            .sync_variable(&variable, interpolation)
            .map_err(|_| AsmError::Undefined { line, name: variable })?;
    }

    let exported: FxHashSet<&str> = code_exports.iter().map(|(_, n)| n.as_str()).collect();
    for (line, name) in &code_exports {
        if !label_offsets.contains_key(name) {
            return Err(AsmError::Undefined {
                line: *line,
                name: name.clone(),
            });
        }
    }
    for (line, label, offset) in &labels {
        builder
            .entry_point_at(label.clone(), *offset, exported.contains(label.as_str()))
            .map_err(|source| AsmError::Build {
                line: *line,
                source,
            })?;
    }

    for instruction in instructions {
        emit_instruction(&mut builder, &label_offsets, instruction)?;
    }

    Ok(builder.build())
}

fn parse_data_line(builder: &mut ProgramBuilder, line: usize, text: &str) -> Result<(), AsmError> {
    let (name, declaration) = text
        .split_once(LABEL_SUFFIX)
        .ok_or_else(|| syntax(line, "expected `name: %Type, value`"))?;
    let (type_name, literal) = split_first_comma(declaration.trim());
    let type_name = type_name
        .strip_prefix('%')
        .ok_or_else(|| syntax(line, "type names start with %"))?;
    let type_tag = TypeTag::from_name(type_name)
        .ok_or_else(|| syntax(line, format!("unknown type {type_name}")))?;
    let name = name.trim();

    let declared = match literal {
        Some(THIS_LITERAL) => builder.this_reference(name, type_tag),
        Some(literal) => {
            let value = parse_value(type_tag, literal)
                .ok_or_else(|| syntax(line, format!("invalid {type_tag} literal {literal}")))?;
            builder.variable(name, type_tag, value)
        }
        None => builder.default_variable(name, type_tag),
    };
    declared.map(|_| ()).map_err(|source| AsmError::Build { line, source })
}

fn parse_value(type_tag: TypeTag, literal: &str) -> Option<Value> {
    if literal.starts_with('"') {
        return parse_string(literal).map(Value::String);
    }
    Value::parse_literal(type_tag, literal)
}

fn parse_instruction(line: usize, text: &str) -> Result<PendingInstruction, AsmError> {
    let (mnemonic, operand) = split_first_comma(text);
    let opcode = Opcode::from_name(mnemonic)
        .ok_or_else(|| syntax(line, format!("unknown instruction {mnemonic}")))?;

    let operand = match operand {
        None => None,
        Some(token) if token.starts_with('"') => Some(Operand::Str(
            parse_string(token).ok_or_else(|| syntax(line, "unterminated string"))?,
        )),
        Some(token) if token.starts_with(|c: char| c.is_ascii_digit()) => {
            let number = match Value::parse_literal(TypeTag::UInt32, token) {
                Some(Value::UInt32(n)) => n,
                _ => return Err(syntax(line, format!("invalid address {token}"))),
            };
            Some(Operand::Number(number))
        }
        Some(token) => Some(Operand::Name(token.to_string())),
    };

    match (opcode.has_operand(), &operand) {
        (true, None) => Err(syntax(line, format!("{} needs an operand", opcode.name()))),
        (false, Some(_)) => Err(syntax(line, format!("{} takes no operand", opcode.name()))),
        _ => Ok(PendingInstruction {
            line,
            opcode,
            operand,
        }),
    }
}

fn emit_instruction(
    builder: &mut ProgramBuilder,
    labels: &FxHashMap<String, u32>,
    instruction: PendingInstruction,
) -> Result<(), AsmError> {
    let PendingInstruction {
        line,
        opcode,
        operand,
    } = instruction;

    let Some(operand) = operand else {
        builder.code().emit_opcode(opcode);
        return Ok(());
    };

    let value = match (opcode, operand) {
        (_, Operand::Number(n)) => n,
        (Opcode::Jump | Opcode::JumpIfFalse, Operand::Name(label)) => *labels
            .get(&label)
            .ok_or(AsmError::Undefined { line, name: label })?,
        (Opcode::Jump | Opcode::JumpIfFalse, Operand::Str(_)) => {
            return Err(syntax(line, "jump targets must be labels or addresses"))
        }
        (_, Operand::Name(name)) => builder
            .symbol_address(&name)
            .ok_or(AsmError::Undefined { line, name })?,
        (Opcode::Extern | Opcode::Annotation, Operand::Str(signature)) => builder
            .extern_signature(&signature)
            .map_err(|source| AsmError::Build { line, source })?,
        (_, Operand::Str(_)) => {
            return Err(syntax(line, format!("{} does not take a string", opcode.name())))
        }
    };

    builder.code().emit_opcode(opcode);
    builder.code().emit_u32(value);
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut chars = line.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '\\' if in_string => {
                chars.next();
            }
            '"' => in_string = !in_string,
            COMMENT_CHAR if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn split_first_comma(text: &str) -> (&str, Option<&str>) {
    match text.split_once(',') {
        Some((head, tail)) => (head.trim(), Some(tail.trim())),
        None => (text.trim(), None),
    }
}

fn parse_string(token: &str) -> Option<String> {
    let inner = token.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PendingReference;
    use crate::opcode::HALT_ADDRESS;
    use crate::verify::{decode_instructions, verify_program};

    const COUNTER: &str = r#"
# increments a counter on interact
.data_start
    .export count
    .sync count, linear
    count: %SystemInt32, 0
    step: %SystemInt32, 1
    owner: %UnityEngineGameObject, this
    label: %SystemString, "clicks, total"
.data_end

.code_start
    .export _interact
    _interact:
        PUSH, count
        PUSH, step
        PUSH, count
        EXTERN, "SystemInt32.__op_Addition__SystemInt32_SystemInt32__SystemInt32"
        JUMP, done
    done:
        JUMP, 0xFFFFFFFC
.code_end
"#;

    #[test]
    fn test_assembles_counter() {
        let program = assemble("counter", COUNTER).unwrap();
        verify_program(&program).unwrap();

        let count = program.symbol_table.get("count").unwrap();
        assert!(count.exported);
        assert_eq!(count.type_tag, TypeTag::Int32);
        assert!(!program.symbol_table.get("step").unwrap().exported);
        assert_eq!(
            program.heap.get(3).unwrap(),
            &Value::String("clicks, total".into())
        );
        assert_eq!(
            program.heap.pending_references().collect::<Vec<_>>(),
            vec![(2, PendingReference::This(TypeTag::GameObject))]
        );
        assert_eq!(
            program.sync_metadata.get("count").unwrap().interpolation,
            Interpolation::Linear
        );

        let interact = program.entry_points.get("_interact").unwrap();
        assert!(interact.exported);
        assert_eq!(interact.address, 0);
        let done = program.entry_points.get("done").unwrap();
        assert!(!done.exported);
        assert_eq!(done.address, 40);

        let instructions = decode_instructions(&program.byte_code).unwrap();
        assert_eq!(instructions.len(), 6);
        assert_eq!(instructions[4].operand, Some(40));
        assert_eq!(instructions[5].operand, Some(HALT_ADDRESS));
    }

    #[test]
    fn test_undefined_label() {
        let source = ".code_start\n  JUMP, nowhere\n.code_end\n";
        assert_eq!(
            assemble("t", source),
            Err(AsmError::Undefined {
                line: 2,
                name: "nowhere".into()
            })
        );
    }

    #[test]
    fn test_undefined_variable() {
        let source = ".code_start\n  start:\n  PUSH, ghost\n.code_end\n";
        assert!(matches!(
            assemble("t", source),
            Err(AsmError::Undefined { line: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_instruction() {
        let source = ".code_start\n  RETURN\n.code_end\n";
        assert!(matches!(assemble("t", source), Err(AsmError::Syntax { line: 2, .. })));
    }

    #[test]
    fn test_operand_arity() {
        let source = ".code_start\n  PUSH\n.code_end\n";
        assert!(matches!(assemble("t", source), Err(AsmError::Syntax { line: 2, .. })));
        let source = ".code_start\n  COPY, 1\n.code_end\n";
        assert!(matches!(assemble("t", source), Err(AsmError::Syntax { line: 2, .. })));
    }

    #[test]
    fn test_bad_literal() {
        let source = ".data_start\n  x: %SystemInt32, yes\n.data_end\n";
        assert!(matches!(assemble("t", source), Err(AsmError::Syntax { line: 2, .. })));
    }

    #[test]
    fn test_duplicate_variable() {
        let source = ".data_start\n  x: %SystemInt32, 1\n  x: %SystemInt32, 2\n.data_end\n";
        assert!(matches!(assemble("t", source), Err(AsmError::Build { line: 3, .. })));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse_string(r#""a\"b\\c""#), Some("a\"b\\c".to_string()));
        assert_eq!(strip_comment(r#"x: %SystemString, "a # b" # c"#), r#"x: %SystemString, "a # b" "#);
        assert_eq!(
            strip_comment(r#"x: %SystemString, "a\" # b" # c"#),
            r#"x: %SystemString, "a\" # b" "#
        );
        assert_eq!(strip_comment(r#"x: %SystemString, "a\\" # c"#), r#"x: %SystemString, "a\\" "#);
    }

    #[test]
    fn test_escaped_quote_keeps_hash_in_string() {
        let program = assemble(
            "quote",
            ".data_start\n    label: %SystemString, \"a\\\" # b\" # note\n.data_end\n",
        )
        .unwrap();
        assert_eq!(program.heap.get(0).unwrap(), &Value::String("a\" # b".into()));
    }
}
