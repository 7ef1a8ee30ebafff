//! Magnet link parsing utilities

use super::{InfoHash, InfoHashError};

/// Magnet link components.
///
/// Parsed magnet URI containing the info hash and the optional display name
/// and tracker URLs, percent-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Errors from magnet link parsing.
#[derive(Debug, thiserror::Error)]
pub enum MagnetError {
    #[error("Invalid magnet link: {reason}")]
    Malformed { reason: String },

    #[error("Magnet link has no BitTorrent info hash")]
    MissingInfoHash,

    #[error("Magnet link info hash is invalid: {0}")]
    InvalidInfoHash(#[from] InfoHashError),
}

/// Magnet link parsing utilities.
pub struct MagnetParser;

impl MagnetParser {
    /// Parses magnet link to extract torrent information.
    ///
    /// Accepts both 40 character hex and 32 character base32 `btih` hashes.
    ///
    /// # Errors
    /// - `MagnetError::Malformed` - Not a magnet URI
    /// - `MagnetError::MissingInfoHash` - No `xt=urn:btih:` parameter
    /// - `MagnetError::InvalidInfoHash` - Hash has the wrong length or encoding
    pub fn parse_magnet_link(magnet_url: &str) -> Result<MagnetLink, MagnetError> {
        let magnet_url = magnet_url.trim();
        let magnet =
            magnet_url::Magnet::new(magnet_url).map_err(|e| MagnetError::Malformed {
                reason: format!("{e:?}"),
            })?;

        if magnet.hash_type() != Some("btih") {
            return Err(MagnetError::MissingInfoHash);
        }
        let hash = magnet.hash().ok_or(MagnetError::MissingInfoHash)?;
        let info_hash = hash.parse::<InfoHash>()?;

        Ok(MagnetLink {
            info_hash,
            display_name: magnet
                .display_name()
                .map(|name| Self::decode_component(name))
                .filter(|name| !name.is_empty()),
            trackers: magnet
                .trackers()
                .iter()
                .map(|tracker| Self::decode_component(tracker))
                .collect(),
        })
    }

    /// Percent-decodes a magnet parameter, treating `+` as a space.
    fn decode_component(raw: &str) -> String {
        let spaced = raw.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(spaced)
    }
}
