//! `udon disasm`: Print a program as assembly.

pub fn execute(file: &std::path::Path) -> anyhow::Result<()> {
    let program = super::load_program(file)?;
    print!("{}", udon_bytecode::disassemble(&program)?);
    Ok(())
}
