//! Error types for Dropcode.
//!
//! This module provides a unified error type for all Dropcode operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Dropcode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Dropcode.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed manually entered identifier (E001)
    #[error("invalid peer ID: {0}")]
    InvalidIdentifier(String),

    /// Outbound connection attempt failed (E002)
    #[error("failed to connect to '{peer}': {reason}")]
    ConnectionFailed {
        /// Identifier that was dialed
        peer: String,
        /// What the transport reported
        reason: String,
    },

    /// No endpoint is listening for this identifier (E003)
    #[error("peer '{0}' is not reachable")]
    PeerUnavailable(String),

    /// The link was closed while sending (E004)
    #[error("link to '{0}' is closed")]
    LinkClosed(String),

    /// Local identifier is already registered with the transport (E005)
    #[error("peer ID '{0}' is already taken")]
    IdentifierTaken(String),

    /// The remote speaks a different protocol version (E006)
    #[error("incompatible protocol version: local {local}, remote {remote}")]
    IncompatibleVersion {
        /// Version spoken locally
        local: String,
        /// Version the remote advertised
        remote: String,
    },

    /// The remote refused the handshake with an error frame
    #[error("rejected by peer ({code}): {message}")]
    Rejected {
        /// Error code sent by the remote
        code: String,
        /// Error message sent by the remote
        message: String,
    },

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Unexpected message type
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type
        expected: String,
        /// Actual message type received
        actual: String,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentifier(_) => Some("E001"),
            Self::ConnectionFailed { .. } => Some("E002"),
            Self::PeerUnavailable(_) => Some("E003"),
            Self::LinkClosed(_) => Some("E004"),
            Self::IdentifierTaken(_) => Some("E005"),
            Self::IncompatibleVersion { .. } => Some("E006"),
            _ => None,
        }
    }

    /// Returns whether this error should be shown to the user.
    ///
    /// An unreachable peer is the normal outcome of probing an identifier
    /// nobody listens on, so it is only logged.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        !matches!(self, Self::PeerUnavailable(_))
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentifier(_) => Some("Please enter a valid 4-character peer ID."),
            Self::ConnectionFailed { .. } => {
                Some("Failed to connect. Please check the peer ID and try again.")
            }
            Self::PeerUnavailable(_) => Some(
                "Make sure the other device is running `dropcode listen` \
                 on the same network.",
            ),
            _ => None,
        }
    }
}
