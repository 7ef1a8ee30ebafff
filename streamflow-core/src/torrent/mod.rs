//! Swarm content identifiers and magnet link parsing.

pub mod magnet;

use std::fmt;
use std::str::FromStr;

pub use magnet::{MagnetLink, MagnetParser};
use serde::{Serialize, Serializer};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary. Displayed and serialized as
/// 40 lowercase hex characters, which is also the form used in URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40 character hex string (either case).
    ///
    /// # Errors
    /// - `InfoHashError::InvalidLength` - Input is not 40 characters
    /// - `InfoHashError::InvalidEncoding` - Input contains non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, InfoHashError> {
        if hex_str.len() != 40 {
            return Err(InfoHashError::InvalidLength {
                length: hex_str.len(),
            });
        }

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|e| InfoHashError::InvalidEncoding {
            reason: e.to_string(),
        })?;
        Ok(Self(hash))
    }

    /// Parses a 32 character RFC 4648 base32 string, as found in older magnets.
    ///
    /// # Errors
    /// - `InfoHashError::InvalidLength` - Input is not 32 characters
    /// - `InfoHashError::InvalidEncoding` - Input is not valid base32
    pub fn from_base32(base32_str: &str) -> Result<Self, InfoHashError> {
        if base32_str.len() != 32 {
            return Err(InfoHashError::InvalidLength {
                length: base32_str.len(),
            });
        }

        let decoded = data_encoding::BASE32
            .decode(base32_str.to_uppercase().as_bytes())
            .map_err(|e| InfoHashError::InvalidEncoding {
                reason: e.to_string(),
            })?;

        let hash: [u8; 20] =
            decoded
                .try_into()
                .map_err(|bytes: Vec<u8>| InfoHashError::InvalidLength {
                    length: bytes.len(),
                })?;
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            32 => Self::from_base32(s),
            _ => Self::from_hex(s),
        }
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Errors produced when decoding an info hash from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InfoHashError {
    #[error("Invalid info hash length: {length}")]
    InvalidLength { length: usize },

    #[error("Invalid info hash encoding: {reason}")]
    InvalidEncoding { reason: String },
}
