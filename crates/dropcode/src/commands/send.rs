//! Send command implementation.

use anyhow::{bail, Context, Result};

use dropcode_core::code::PeerId;
use dropcode_core::file::{format_size, SelectedFileSet};
use dropcode_core::session::Session;
use dropcode_core::transport::TcpTransport;

use super::SendArgs;
use crate::ui::file_entry;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let local = super::local_peer_id(args.id.as_deref())?;

    let files = SelectedFileSet::from_paths(&args.files)
        .await
        .context("Failed to read the selected files")?;

    if !args.quiet {
        println!();
        println!("Dropcode v{}", dropcode_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Your ID: {}", local);
        println!();
        println!("  Selected files:");
        for file in files.files() {
            println!("    {}", file_entry(file.name(), file.size()));
        }
        println!();
        println!("  Total: {}", format_size(files.total_size()));
        println!();
    }

    let transport = TcpTransport::bind(local, config.tcp_transport_config())
        .await
        .context("Failed to start the transport")?;
    let session = Session::start(transport, config.session_config(), None);

    let target = match args.addr {
        Some(addr) => {
            let target = PeerId::parse(&args.peer_id).context("Invalid peer ID")?;
            let link = session
                .transport()
                .connect_addr(&target, addr)
                .await
                .with_context(|| format!("Failed to connect to {target} at {addr}"))?;
            session.adopt_link(link).await
        }
        None => session.connect(&args.peer_id).await.map_err(|e| {
            let hint = e.suggestion().map(|s| format!("\n  {s}")).unwrap_or_default();
            anyhow::anyhow!("{e}{hint}")
        })?,
    };

    if !args.quiet {
        println!("  Connected to {}", target);
        println!();
    }

    let progress_handle =
        (!args.quiet).then(|| tokio::spawn(super::display_progress(session.progress())));

    let results = session.send_files_to(&files, std::slice::from_ref(&target)).await;

    session.transport().close().await;
    tokio::time::sleep(config.transfer.settle_delay).await;
    session.shutdown();
    if let Some(handle) = progress_handle {
        handle.abort();
    }

    for (peer_id, result) in results {
        if let Err(e) = result {
            bail!("Sending to {} failed: {}", peer_id, e);
        }
    }

    if !args.quiet {
        println!();
        println!(
            "  Sent {} file(s) ({}) to {}",
            files.len(),
            format_size(files.total_size()),
            target
        );
    }
    Ok(())
}
