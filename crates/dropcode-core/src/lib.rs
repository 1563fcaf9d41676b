//! # Dropcode Core Library
//!
//! `dropcode-core` provides the core functionality for Dropcode, a
//! peer-to-peer file drop between devices that find each other by a short
//! peer ID.
//!
//! ## Features
//!
//! - **Peer IDs**: Random 4-character IDs anyone can type
//! - **Chunked transfers**: Files travel as `Start`, fixed-size `Chunk`s, `End`
//! - **Live progress**: Sender and receiver both publish progress
//! - **Pluggable transports**: In-process hub or TCP with UDP rendezvous
//!
//! ## Modules
//!
//! - [`code`] - Peer ID generation and validation
//! - [`config`] - Configuration management
//! - [`mod@file`] - Selected files and the download sink
//! - [`protocol`] - Transfer messages and their TCP framing
//! - [`registry`] - Registry of reachable peers
//! - [`rendezvous`] - Peer ID lookup over UDP
//! - [`session`] - A running endpoint tying everything together
//! - [`transfer`] - Chunked sender, reassembling receiver, progress
//! - [`transport`] - Transport adapters
//!
//! ## Example
//!
//! ```rust,ignore
//! use dropcode_core::code::IdGenerator;
//! use dropcode_core::session::{Session, SessionConfig};
//! use dropcode_core::transport::{TcpTransport, TcpTransportConfig};
//!
//! let local = IdGenerator::new().generate();
//! let transport = TcpTransport::bind(local, TcpTransportConfig::default()).await?;
//! let session = Session::start(transport, SessionConfig::default(), None);
//!
//! // On another device
//! session.connect("wxq7").await?;
//! session.send_files(&files).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod code;
pub mod config;
pub mod error;
pub mod file;
pub mod protocol;
pub mod registry;
pub mod rendezvous;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version of the TCP framing
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);
