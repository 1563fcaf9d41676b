//! Listen command implementation.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use dropcode_core::file::{format_size, DownloadDir};
use dropcode_core::session::{Session, SessionEvent};
use dropcode_core::transfer::Status;
use dropcode_core::transport::{TcpTransport, Transport};

use super::ListenArgs;
use crate::ui::{print_peers, status_text, CodeBox};

/// Run the listen command.
pub async fn run(args: ListenArgs) -> Result<()> {
    let config = super::load_config();
    let local = super::local_peer_id(args.id.as_deref())?;
    let output = args.output.unwrap_or_else(|| config.output_dir());

    let transport = TcpTransport::bind(local.clone(), config.tcp_transport_config())
        .await
        .context("Failed to start listening")?;
    let port = transport.local_addr().port();

    let session = Session::start(
        transport,
        config.session_config(),
        Some(DownloadDir::new(&output)),
    );

    if !args.quiet {
        println!();
        println!("Dropcode v{}", dropcode_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        CodeBox::new(local.as_str())
            .with_status(Status::Ready)
            .display();
        println!();
        println!("  Saving to:  {}", output.display());
        println!("  TCP port:   {}", port);
        println!();
        println!("  Waiting for peers... (Ctrl+C to stop)");
        println!();
    }

    let progress_handle =
        (!args.quiet).then(|| tokio::spawn(super::display_progress(session.progress())));

    let mut events = session.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => handle_event(&session, event, args.quiet).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.shutdown();
    if let Some(handle) = progress_handle {
        handle.abort();
    }

    if !args.quiet {
        println!();
        println!("  Stopped listening.");
    }
    Ok(())
}

async fn handle_event<T: Transport>(session: &Session<T>, event: SessionEvent, quiet: bool) {
    match event {
        SessionEvent::PeerConnected { peer_id, inbound } => {
            if quiet {
                return;
            }
            let direction = if inbound { "from" } else { "to" };
            println!();
            println!("  Connected {} {}", direction, peer_id);
            print_peers(&session.peers().await);
            println!("  Status: {}", status_text(session.status().await));
        }
        SessionEvent::PeerDisconnected { peer_id } => {
            if !quiet {
                println!();
                println!("  {} disconnected", peer_id);
            }
        }
        SessionEvent::PeerExpired { .. } => {
            if !quiet {
                print_peers(&session.peers().await);
            }
        }
        SessionEvent::FileReceived {
            from,
            file,
            saved_to,
        } => {
            if !file.is_complete() {
                eprintln!(
                    "  Warning: {} from {} is incomplete ({} of {} chunks)",
                    file.file_name, from, file.chunks_received, file.expected_chunks
                );
            }
            if !quiet {
                println!();
                match saved_to {
                    Some(path) => println!(
                        "  Received {} ({}) from {} -> {}",
                        file.file_name,
                        format_size(file.data.len() as u64),
                        from,
                        path.display()
                    ),
                    None => println!(
                        "  Received {} ({}) from {}",
                        file.file_name,
                        format_size(file.data.len() as u64),
                        from
                    ),
                }
            }
        }
        SessionEvent::Warning { message } => {
            eprintln!("  Warning: {}", message);
        }
    }
}
