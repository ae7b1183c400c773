//! `udon assemble`: Assemble source into an encoded program.

use super::PROGRAM_EXTENSION;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn execute(input: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let program = super::load_program(input)?;
    let output = output.unwrap_or_else(|| input.with_extension(PROGRAM_EXTENSION));

    let bytes = program.encode();
    std::fs::write(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        program = %program.name,
        bytes = bytes.len(),
        output = %output.display(),
        "assembled"
    );
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}
