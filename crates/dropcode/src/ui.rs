//! UI utilities for the Dropcode CLI.

use dropcode_core::file::format_size;
use dropcode_core::session::PeerInfo;
use dropcode_core::transfer::{Status, TransferProgress};

const BOX_WIDTH: usize = 33;
const BAR_WIDTH: usize = 24;

/// A formatted box for displaying the local peer ID.
pub struct CodeBox<'a> {
    code: &'a str,
    status: Option<Status>,
}

impl<'a> CodeBox<'a> {
    /// Create a new code box.
    #[must_use]
    pub const fn new(code: &'a str) -> Self {
        Self { code, status: None }
    }

    /// Show a status line under the ID.
    #[must_use]
    pub const fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Display the code box to stdout.
    pub fn display(&self) {
        let spaced_code = format_code_spaced(self.code);
        let code_line = format!("Your ID:  {}", spaced_code);

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&code_line, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));

        if let Some(status) = self.status {
            println!("  │{}│", center_in_box(status_text(status), BOX_WIDTH));
            println!("  │{}│", " ".repeat(BOX_WIDTH));
        }

        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn format_code_spaced(code: &str) -> String {
    code.chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

/// Human-readable status indicator text.
pub const fn status_text(status: Status) -> &'static str {
    match status {
        Status::Ready => "Ready to share",
        Status::Connected => "Connected",
        Status::Sending => "Sending file...",
        Status::Receiving => "Receiving file...",
    }
}

/// Peer count line.
pub fn device_count(count: usize) -> String {
    format!("{} device(s) found", count)
}

/// Print the peer list with its count line.
pub fn print_peers(peers: &[PeerInfo]) {
    println!("  {}", device_count(peers.len()));
    for peer in peers {
        let state = if peer.connected {
            "connected"
        } else {
            "disconnected"
        };
        println!("    {}  ({})", peer.peer_id, state);
    }
}

/// One-line rendering of the current progress, or `None` when idle.
pub fn progress_line(progress: &TransferProgress) -> Option<String> {
    let role = progress.role?;
    let pct = progress.percentage.clamp(0.0, 100.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = ((pct / 100.0) * BAR_WIDTH as f64).round() as usize;

    Some(format!(
        "[{}{}] {:>3.0}%  {} {}",
        "#".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        pct,
        role.label(),
        progress.file_name
    ))
}

/// List entry for a selected file.
pub fn file_entry(name: &str, size: u64) -> String {
    format!("{} ({})", name, format_size(size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropcode_core::transfer::TransferRole;

    #[test]
    fn test_format_code_spaced() {
        assert_eq!(format_code_spaced("WXQ7"), "W X Q 7");
        assert_eq!(format_code_spaced("ABCD"), "A B C D");
    }

    #[test]
    fn test_center_in_box() {
        let centered = center_in_box("hello", 11);
        assert_eq!(centered, "   hello   ");

        let centered = center_in_box("hi", 6);
        assert_eq!(centered, "  hi  ");
    }

    #[test]
    fn test_device_count() {
        assert_eq!(device_count(0), "0 device(s) found");
        assert_eq!(device_count(2), "2 device(s) found");
    }

    #[test]
    fn test_progress_line() {
        assert_eq!(progress_line(&TransferProgress::default()), None);

        let line = progress_line(&TransferProgress {
            role: Some(TransferRole::Receiving),
            file_name: "a.txt".to_string(),
            percentage: 50.0,
        })
        .expect("active");
        assert!(line.starts_with(&format!("[{}{}]", "#".repeat(12), " ".repeat(12))));
        assert!(line.ends_with(" 50%  Receiving a.txt"));
    }

    #[test]
    fn test_file_entry() {
        assert_eq!(file_entry("photo.jpg", 2048), "photo.jpg (2.0 KB)");
    }
}
