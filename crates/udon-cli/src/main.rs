//! Udon command line tool
//!
//! Assembles, verifies, disassembles, inspects and runs Udon programs.
//! Logging is controlled by `UDON_LOG` (an `EnvFilter` directive, default `info`).

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "udon")]
#[command(about = "Udon bytecode toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Runtime options file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble Udon assembly (.uasm) into a program file
    Assemble {
        /// Assembly source
        input: PathBuf,
        /// Output file (defaults to the input with a .udonb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that a program is well formed and runnable
    Verify {
        /// Program file or assembly source
        file: PathBuf,
    },

    /// Print a program as assembly
    Disasm {
        /// Program file or assembly source
        file: PathBuf,
    },

    /// Print a JSON summary of a program
    Inspect {
        /// Program file or assembly source
        file: PathBuf,
    },

    /// Load a program into a behaviour and dispatch events to it
    Run {
        /// Program file or assembly source
        file: PathBuf,
        /// Event to dispatch, in order (defaults to _start)
        #[arg(short, long = "event")]
        events: Vec<String>,
        /// Public variable override, as name=value
        #[arg(long = "set", value_parser = commands::run::parse_assignment)]
        assignments: Vec<(String, String)>,
        /// Print final variables as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("UDON_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let options = commands::load_options(cli.config.as_deref())?;

    match cli.command {
        Commands::Assemble { input, output } => commands::assemble::execute(&input, output),
        Commands::Verify { file } => commands::verify::execute(&file, &options),
        Commands::Disasm { file } => commands::disasm::execute(&file),
        Commands::Inspect { file } => commands::inspect::execute(&file),
        Commands::Run {
            file,
            events,
            assignments,
            json,
        } => commands::run::execute(commands::run::RunArgs {
            file,
            events,
            assignments,
            json,
            options,
        }),
    }
}
