//! `udon verify`: Check a program against the verifier and runtime options.

use udon_bytecode::{decode_instructions, verify_structure};
use udon_core::RuntimeOptions;

pub fn execute(file: &std::path::Path, options: &RuntimeOptions) -> anyhow::Result<()> {
    let program = super::load_program(file)?;

    if !options.supports(&program.instruction_set_id, &program.instruction_set_version) {
        anyhow::bail!(
            "{}: instruction set {} {} is not supported (expected {} {})",
            file.display(),
            program.instruction_set_id,
            program.instruction_set_version,
            options.instruction_set_id,
            options.instruction_set_version
        );
    }
    verify_structure(&program)?;
    let instructions = decode_instructions(&program.byte_code)?;

    println!(
        "{}: ok ({} instructions, {} heap slots, {} entry points)",
        program.name,
        instructions.len(),
        program.heap.len(),
        program.entry_points.len()
    );
    Ok(())
}
