//! Volt CLI
//!
//! Command-line driver for the toolchain: run a program in the interpreter,
//! compile it to an assembly listing (optionally assembling and running it
//! through the external tools), or just check that it parses.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use tracing::info;
use voltc::ToolchainConfig;

#[derive(ClapParser)]
#[command(name = "voltc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Volt toolchain - interpret or compile Volt programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program in the interpreter
    Interpret {
        /// Input source file
        input: PathBuf,
    },

    /// Compile a program to an assembly listing
    Compile {
        /// Input source file
        input: PathBuf,

        /// Output listing path (defaults to the input with a .asm extension)
        output: Option<PathBuf>,

        /// Assemble and run the result with the external tools
        #[arg(long)]
        run: bool,

        /// Assembler invoked by --run
        #[arg(long, default_value = "fasm")]
        assembler: String,

        /// Emulator invoked by --run
        #[arg(long, default_value = "emu32")]
        emulator: String,
    },

    /// Preprocess, lex, and parse only; report the first diagnostic
    Check {
        /// Input source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Interpret { input } => run_interpret(&input),
        Commands::Compile {
            input,
            output,
            run,
            assembler,
            emulator,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("asm"));
            run_compile(&input, &output, run, &assembler, &emulator);
        }
        Commands::Check { input } => run_check(&input),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            generate(shell, &mut command, name, &mut io::stdout());
        }
    }
}

fn load_config(input: &Path) -> ToolchainConfig {
    match ToolchainConfig::discover(input) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            process::exit(1);
        }
    }
}

fn run_interpret(input: &Path) {
    let config = load_config(input);
    match voltc::interpret_file(input, &config) {
        Ok(value) => {
            println!("Program executed successfully. Return value: {value}");
        }
        Err(diag) => {
            eprintln!("{diag}");
            process::exit(1);
        }
    }
}

fn run_check(input: &Path) {
    let config = load_config(input);
    if let Err(diag) = voltc::parse_file(input, &config) {
        eprintln!("{diag}");
        process::exit(1);
    }
}

fn run_compile(input: &Path, output: &Path, run: bool, assembler: &str, emulator: &str) {
    let config = load_config(input);
    let listing = match voltc::compile_file(input, &config) {
        Ok(listing) => listing,
        Err(diag) => {
            eprintln!("{diag}");
            process::exit(1);
        }
    };

    if let Err(err) = std::fs::write(output, &listing) {
        eprintln!("cannot write {}: {err}", output.display());
        process::exit(1);
    }
    info!(output = %output.display(), "wrote assembly listing");

    if run {
        run_external(output, assembler, emulator);
    }
}

/// Hand the listing to the external assembler and emulator. Both are
/// collaborators outside this toolchain; all we do is invoke them and
/// propagate failure.
fn run_external(listing: &Path, assembler: &str, emulator: &str) {
    let status = Command::new(assembler).arg(listing).status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            eprintln!("assembler exited with {status}");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("cannot run assembler '{assembler}': {err}");
            process::exit(1);
        }
    }

    // `format binary as "bin"` makes the assembler drop a .bin next to
    // the listing.
    let binary = listing.with_extension("bin");
    match Command::new(emulator).arg(&binary).status() {
        Ok(status) if status.success() => {}
        Ok(status) => {
            eprintln!("emulator exited with {status}");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("cannot run emulator '{emulator}': {err}");
            process::exit(1);
        }
    }
}
