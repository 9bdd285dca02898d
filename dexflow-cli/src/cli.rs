use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{analyze, rules, verify_models};
use crate::exit_codes;

#[derive(Debug, Parser)]
#[command(name = "dexflow", version, about = "Static taint analysis for Android bytecode")]
pub struct Cli {
    /// Log verbosity; overridden by RUST_LOG when set.
    #[arg(long, global = true, default_value = "info")]
    pub verbosity: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full analysis described by an options JSON file.
    Analyze {
        /// Path to the options JSON file.
        #[arg(long)]
        options: PathBuf,
    },
    /// Print the loaded rules.
    Rules {
        /// Path to the options JSON file.
        #[arg(long)]
        options: PathBuf,
    },
    /// Validate model JSON files without running the analysis.
    VerifyModels {
        /// Path to the options JSON file.
        #[arg(long)]
        options: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Analyze { options } => analyze::run(&options),
        Command::Rules { options } => rules::run(&options),
        Command::VerifyModels { options } => verify_models::run(&options),
    };

    match result {
        Ok(exit) => exit,
        Err(error) => {
            tracing::error!(error = %error, "run failed");
            eprintln!("error: {error}");
            exit_codes::internal_error()
        }
    }
}
