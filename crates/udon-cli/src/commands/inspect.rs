//! `udon inspect`: Print a JSON summary of a program.

pub fn execute(file: &std::path::Path) -> anyhow::Result<()> {
    let program = super::load_program(file)?;
    println!("{}", program.summary().to_json()?);
    Ok(())
}
