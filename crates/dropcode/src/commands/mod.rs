//! CLI command definitions and handlers.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use dropcode_core::code::{IdGenerator, PeerId};
use dropcode_core::transfer::TransferProgress;

use crate::ui::progress_line;

pub mod config;
pub mod id;
pub mod listen;
pub mod send;

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands to load the user's configuration.
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> dropcode_core::config::Config {
    match dropcode_core::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{}; using defaults", e);
            dropcode_core::config::Config::default()
        }
    }
}

/// Use the ID given on the command line, or generate one.
pub fn local_peer_id(requested: Option<&str>) -> Result<PeerId> {
    match requested {
        Some(id) => PeerId::parse(id).context("Invalid --id"),
        None => Ok(IdGenerator::new().generate()),
    }
}

/// Render progress on one line until the channel closes.
pub async fn display_progress(mut rx: watch::Receiver<TransferProgress>) {
    let mut showing = false;

    loop {
        let timeout = tokio::time::timeout(Duration::from_secs(1), rx.changed()).await;

        let progress = rx.borrow_and_update().clone();
        match progress_line(&progress) {
            Some(line) => {
                print!("\r  {}    ", line);
                let _ = io::stdout().flush();
                showing = true;
            }
            None if showing => {
                println!();
                showing = false;
            }
            None => {}
        }

        if matches!(timeout, Ok(Err(_))) {
            break;
        }
    }

    if showing {
        println!();
    }
}

/// Dropcode - peer-to-peer file drops addressed by four-character IDs
#[derive(Parser)]
#[command(name = "dropcode")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Wait for peers and save the files they send
    Listen(ListenArgs),

    /// Connect to a peer ID and send files
    Send(SendArgs),

    /// Print a freshly generated peer ID
    Id,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the listen command
#[derive(Parser)]
pub struct ListenArgs {
    /// Peer ID to advertise (random if omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Directory to save received files into
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Peer ID to send to (case-insensitive)
    pub peer_id: String,

    /// Files to send, in order
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Peer ID to advertise (random if omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Connect to this address instead of looking the peer ID up
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config actions
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_args_parse() {
        let cli = Cli::try_parse_from(["dropcode", "send", "wxq7", "a.txt", "b.txt"]).expect("parse");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.peer_id, "wxq7");
        assert_eq!(args.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert!(args.addr.is_none());
    }

    #[test]
    fn test_send_requires_files() {
        assert!(Cli::try_parse_from(["dropcode", "send", "WXQ7"]).is_err());
    }

    #[test]
    fn test_listen_args_parse() {
        let cli = Cli::try_parse_from(["dropcode", "-v", "listen", "--id", "ab12", "-o", "/tmp/in"])
            .expect("parse");
        assert!(cli.verbose);
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.id.as_deref(), Some("ab12"));
        assert_eq!(args.output, Some(PathBuf::from("/tmp/in")));
    }

    #[test]
    fn test_local_peer_id() {
        assert_eq!(local_peer_id(Some("ab12")).expect("id").as_str(), "AB12");
        assert!(local_peer_id(Some("toolong")).is_err());
        assert_eq!(local_peer_id(None).expect("id").as_str().len(), 4);
    }
}
