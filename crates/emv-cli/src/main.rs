use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod formatters;

use commands::Context;
use config::CliConfig;
use error::CliError;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "emv")]
#[command(about = "EMV Card Reader - Discover applications and verify card certificates")]
#[command(version)]
struct Args {
    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human, global = true)]
    format: FormatMode,

    /// Reader to use instead of the first one found
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// CA public key file
    #[arg(long, global = true)]
    ca_keys: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Application to select, in hex
    #[arg(long, global = true)]
    aid: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the available card readers
    Readers,
    /// Read the card and verify its certificate chain
    Info,
    /// Read everything the selected application exposes
    Dump,
    /// Perform Dynamic Data Authentication
    Authenticate,
    /// Ask the card for random bytes
    GetChallenge,
    /// Verify an offline plaintext PIN
    VerifyPin {
        /// 4 to 12 digits
        pin: String,
    },
}

fn main() -> ExitCode {
    // Set RUST_LOG=debug for APDU traces, RUST_LOG=trace for raw bytes
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    if let Command::Readers = args.command {
        return commands::readers::cmd_readers();
    }

    let mut config = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    if args.ca_keys.is_some() {
        config.ca_keys = args.ca_keys;
    }
    if args.reader.is_some() {
        config.reader = args.reader;
    }

    let aid = args
        .aid
        .map(|aid| hex::decode(&aid).map_err(|e| CliError::Usage(format!("--aid {}: {}", aid, e))))
        .transpose()?;

    println!("EMV Card Reader - {} Mode\n", args.format.description());
    let ctx = Context::new(config, args.format, aid)?;

    match args.command {
        Command::Readers => Ok(()),
        Command::Info => commands::info::cmd_info(&ctx),
        Command::Dump => commands::dump::cmd_dump(&ctx),
        Command::Authenticate => commands::authenticate::cmd_authenticate(&ctx),
        Command::GetChallenge => commands::get_challenge::cmd_get_challenge(&ctx),
        Command::VerifyPin { pin } => commands::verify_pin::cmd_verify_pin(&ctx, &pin),
    }
}
