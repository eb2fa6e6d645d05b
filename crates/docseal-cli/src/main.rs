//! `docseal`: command-line sealing and opening of JSON documents.
//!
//! Startup sequence:
//! 1. Parse arguments.
//! 2. Load and validate [`docseal::Config`] from `DOCSEAL_*` variables.
//! 3. Initialise structured JSON logging on stderr.
//! 4. Load the OpenAPI schema and run the subcommand.
//!
//! The process exits with [`docseal::CryptError::exit_code`] when the failure
//! is a crypt error, and with 1 otherwise.

mod commands;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use docseal::CryptError;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "docseal", version, about = "Seal and open JSON documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt plaintext documents into their stored form.
    Seal(DocumentArgs),
    /// Decrypt stored documents back to plaintext.
    Open(DocumentArgs),
    /// Print a fresh pair of keys as environment assignments.
    Keygen,
}

#[derive(Debug, Args)]
struct DocumentArgs {
    /// OpenAPI document (YAML or JSON) declaring the record types.
    #[arg(long)]
    schema: PathBuf,

    /// Component name of the record type to apply.
    #[arg(long)]
    component: String,

    /// Input file; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            let code = e
                .downcast_ref::<CryptError>()
                .map_or(1, CryptError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let args = match cli.command {
        Command::Keygen => {
            print!("{}", commands::keygen()?);
            return Ok(());
        }
        Command::Seal(ref args) | Command::Open(ref args) => args,
    };

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let (cfg, keys) = commands::load_config()?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?cfg.separated_storage,
        "docseal starting"
    );

    // -----------------------------------------------------------------------
    // 3. Schema and command
    // -----------------------------------------------------------------------
    let schema = commands::load_schema(&args.schema, &args.component, &keys, cfg.separated_storage)?;
    let input = args.input.as_deref();
    let output: Value = match cli.command {
        Command::Seal(_) => commands::seal(&schema, input).await?,
        _ => commands::open(&schema, input)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
