//! Peer ID generation and validation.
//!
//! Every session advertises a 4-character peer ID that other devices type in
//! to reach it.
//!
//! ## ID Format
//!
//! Generated IDs draw from a 36-character alphabet: `A-Z` and `0-9`, sampled
//! uniformly with replacement. That gives 36^4 = 1,679,616 possible IDs;
//! collisions are possible and surface as a taken ID at registration time.
//!
//! Manually entered IDs are upper-cased and only checked for length, so an ID
//! containing symbols the generator never produces is still dialable.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dropcode_core::code::{PeerId, IdGenerator};
//!
//! let id = IdGenerator::new().generate();
//! println!("Your peer ID: {}", id);
//!
//! let target = PeerId::parse("wxq7")?;
//! assert_eq!(target.as_str(), "WXQ7");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The character set used for ID generation.
pub const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a peer ID
pub const ID_LENGTH: usize = 4;

/// A validated peer ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId {
    id: String,
}

impl PeerId {
    /// Parse and validate a peer ID typed by a user.
    ///
    /// The input is upper-cased first; only the length is validated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] if the input is empty or not
    /// exactly [`ID_LENGTH`] characters long.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.to_uppercase();
        let len = normalized.chars().count();

        if len == 0 {
            return Err(Error::InvalidIdentifier("peer ID is empty".to_string()));
        }

        if len != ID_LENGTH {
            return Err(Error::InvalidIdentifier(format!(
                "peer ID must be {ID_LENGTH} characters, got {len}"
            )));
        }

        Ok(Self { id: normalized })
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

impl std::str::FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.id
    }
}

/// Generator for peer IDs.
#[derive(Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate a new random peer ID using the thread-local RNG.
    #[must_use]
    pub fn generate(&self) -> PeerId {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Generate a new peer ID from the given random source.
    pub fn generate_with<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> PeerId {
        let id: String = (0..ID_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..ID_CHARSET.len());
                ID_CHARSET[idx] as char
            })
            .collect();

        PeerId { id }
    }
}
