//! Subcommand implementations

pub mod assemble;
pub mod disasm;
pub mod inspect;
pub mod run;
pub mod verify;

use anyhow::Context;
use std::path::Path;
use udon_bytecode::{assemble, Program};
use udon_core::RuntimeOptions;

/// Extension of assembly sources
pub const ASSEMBLY_EXTENSION: &str = "uasm";

/// Extension of encoded programs
pub const PROGRAM_EXTENSION: &str = "udonb";

/// Read a program, assembling it first when `path` is a `.uasm` source
pub fn load_program(path: &Path) -> anyhow::Result<Program> {
    if path.extension().and_then(|e| e.to_str()) == Some(ASSEMBLY_EXTENSION) {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("program");
        return assemble(name, &source)
            .with_context(|| format!("Failed to assemble {}", path.display()));
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Program::decode(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}

/// Runtime options from `--config`, or the defaults
pub fn load_options(config: Option<&Path>) -> anyhow::Result<RuntimeOptions> {
    match config {
        Some(path) => RuntimeOptions::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(RuntimeOptions::default()),
    }
}
