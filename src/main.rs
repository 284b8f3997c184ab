//! tomei CLI entry point: argument parsing, logging setup, error display.

use anyhow::Result;
use clap::Parser;
use tomei::cli;
use tomei::core::{ErrorContext, TomeiError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // RUST_LOG wins when set; --verbose enables debug; otherwise quiet.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("off")
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Err(error) = run(cli).await {
        match error.downcast::<TomeiError>() {
            Ok(tomei_error) => ErrorContext::new(tomei_error).display(),
            Err(other) => eprintln!("error: {other:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli) -> Result<()> {
    cli::run(cli).await
}
