// SPDX-License-Identifier: MIT

//! ralph - remote control CLI for the ralph-tui engine

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod exit;

use clap::{Parser, Subcommand};
use commands::remote;

#[derive(Parser)]
#[command(
    name = "ralph",
    version,
    about = "ralph-tui - autonomous coding agent loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk to a remote engine host
    Remote(remote::RemoteArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Remote(args) => remote::run(args).await,
    };
    std::process::exit(code);
}
