//! itch-setup CLI entry point: argument parsing, logging setup, error
//! display, exit codes.

use anyhow::Result;
use clap::Parser;
use itch_setup::cli::Cli;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "itch_setup=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("itch-setup: error: {err:#}");
            std::process::exit(1);
        }
    }
}
