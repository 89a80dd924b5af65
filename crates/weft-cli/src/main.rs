//! Weft command-line tool
//!
//! Offline front end for the weaver: weave a unit file against a rule
//! catalog, verify unit files, or print a unit's structure.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Load-time weaving toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Log more (repeat for trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave a unit file against a rule catalog
    Weave {
        /// Unit file to weave
        unit: PathBuf,
        /// Rule catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,
        /// Directories holding ancestor, advice and template units, parent first
        #[arg(short = 'p', long = "unit-path")]
        unit_path: Vec<PathBuf>,
        /// Config file with a [weaving] table
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the woven unit
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Verify original and woven units
        #[arg(long)]
        verify: bool,
    },

    /// Check unit files for structural consistency
    Verify {
        /// Unit files
        #[arg(required = true)]
        units: Vec<PathBuf>,
    },

    /// Print a unit's members and disassembly
    Dump {
        /// Unit file
        unit: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Weave {
            unit,
            catalog,
            unit_path,
            config,
            out,
            verify,
        } => commands::weave::execute(commands::weave::WeaveArgs {
            unit,
            catalog,
            unit_path,
            config,
            out,
            verify,
        }),
        Commands::Verify { units } => commands::verify::execute(&units),
        Commands::Dump { unit } => commands::dump::execute(&unit),
    }
}
