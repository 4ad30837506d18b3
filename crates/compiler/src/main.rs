//! Shannon CLI.
//!
//! `shnc run` compiles and executes a program; `shnc check` stops after
//! compilation; `shnc dis` prints the module's disassembly.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process;

use shn_core::Variant;
use shnc::{CompilerOptions, Context};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "shnc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shannon compiler and virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BuildOpts {
    /// Options file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Strip `assert` statements
    #[arg(long)]
    no_assert: bool,

    /// Strip `dump` statements
    #[arg(long)]
    no_dump: bool,

    /// Do not emit line-number opcodes
    #[arg(long)]
    no_line_numbers: bool,

    /// Write a .lst disassembly next to the module
    #[arg(long)]
    listing: bool,

    /// Operand-stack reservation in variant slots
    #[arg(long)]
    stack_size: Option<usize>,

    /// Directories searched for imports
    #[arg(long = "module-path", value_name = "DIR")]
    module_path: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a .shn program
    Run {
        /// Input .shn source file
        input: PathBuf,

        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Compile a .shn program without running it
    Check {
        /// Input .shn source file
        input: PathBuf,

        #[command(flatten)]
        opts: BuildOpts,
    },

    /// Print the disassembly of a compiled module
    Dis {
        /// Input .shn source file
        input: PathBuf,

        #[command(flatten)]
        opts: BuildOpts,
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
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run { input, opts } => run(&input, &opts),
        Commands::Check { input, opts } => check(&input, &opts),
        Commands::Dis { input, opts } => dis(&input, &opts),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "shnc", &mut io::stdout());
            0
        }
    };
    process::exit(code);
}

fn build_options(opts: &BuildOpts) -> Result<CompilerOptions, i32> {
    let mut options = match &opts.config {
        Some(path) => CompilerOptions::load(&path.to_string_lossy()).map_err(|e| {
            eprintln!("shnc: {}", e);
            1
        })?,
        None => CompilerOptions::default(),
    };
    if opts.no_assert {
        options.enable_assert = false;
    }
    if opts.no_dump {
        options.enable_dump = false;
    }
    if opts.no_line_numbers {
        options.line_numbers = false;
    }
    if opts.listing {
        options.vm_listing = true;
    }
    if let Some(n) = opts.stack_size {
        options.stack_size = n;
    }
    options.module_path.extend(opts.module_path.iter().cloned());
    Ok(options)
}

fn run(input: &PathBuf, opts: &BuildOpts) -> i32 {
    let options = match build_options(opts) {
        Ok(o) => o,
        Err(code) => return code,
    };
    let mut ctx = Context::new(options);
    match ctx.execute_file(&input.to_string_lossy()) {
        Ok(Variant::Ord(n)) => (n & 0xff) as i32,
        Ok(_) => 0,
        Err(shnc::CompileError::Runtime(_)) => 1, // diagnostic already on serr
        Err(e) => {
            eprintln!("shnc: {}", e);
            1
        }
    }
}

fn check(input: &PathBuf, opts: &BuildOpts) -> i32 {
    let options = match build_options(opts) {
        Ok(o) => o,
        Err(code) => return code,
    };
    let mut ctx = Context::new(options);
    match ctx.compile_file(&input.to_string_lossy()) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("shnc: {}", e);
            1
        }
    }
}

fn dis(input: &PathBuf, opts: &BuildOpts) -> i32 {
    let options = match build_options(opts) {
        Ok(o) => o,
        Err(code) => return code,
    };
    let mut ctx = Context::new(options);
    match ctx.compile_file(&input.to_string_lossy()) {
        Ok(module) => {
            let seg = ctx.world.state(module).code.clone();
            print!("{}", shn_runtime::dis::listing(&ctx.world, &seg));
            0
        }
        Err(e) => {
            eprintln!("shnc: {}", e);
            1
        }
    }
}
