//! Stratus CLI — typed cloud stack synthesis.

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Log filter variable (`STRATUS_LOG=debug`, `STRATUS_LOG=stratus=info`).
const LOG_ENV: &str = "STRATUS_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "stratus",
    version,
    about = "Typed cloud stack synthesis: network, database, secrets and service into deterministic templates"
)]
struct Cli {
    #[command(subcommand)]
    command: stratus::cli::Commands,
}

fn main() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = stratus::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
