//! Dropcode CLI - peer-to-peer file drops
//!
//! Dropcode sends files straight to another device that you address by its
//! four-character peer ID.
//!
//! ## Quick Start
//!
//! ```bash
//! # Wait for files
//! dropcode listen
//!
//! # Send files (on another device)
//! dropcode send WXQ7 ./photo.jpg ./notes.txt
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Listen(args) => commands::listen::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Id => {
            commands::id::run();
            Ok(())
        }
        Command::Config(args) => commands::config::run(&args),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "warn,dropcode=debug,dropcode_core=debug"
    } else {
        "warn,dropcode=info,dropcode_core=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
