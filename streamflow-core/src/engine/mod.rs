//! Swarm engine abstraction and the simulated swarm backend
//!
//! The orchestrator never speaks the wire protocol itself. It drives a swarm
//! through [`SwarmEngine`]: join, wait for metadata, set piece priorities and
//! read byte ranges that block until the covering pieces have arrived.

pub mod actor;
pub mod catalog;
pub(crate) mod commands;
pub mod handle;
mod simulated;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::oneshot;

pub use actor::spawn_simulated_swarm;
pub use catalog::{Catalog, CatalogEntry, ContentSource};
pub use handle::SimulatedSwarmHandle;
use crate::torrent::{InfoHash, MagnetLink};

/// Byte stream produced by [`SwarmEngine::read_range`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SwarmError>> + Send>>;

/// Receiver resolved once the swarm has delivered the torrent's file list.
pub type MetadataReceiver = oneshot::Receiver<Result<SwarmMetadata, SwarmError>>;

/// Download priority of a piece range.
///
/// Ordered from lowest to highest so `max` picks the more urgent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    /// Never downloaded
    Skip,
    /// Baseline priority of a selected file
    Normal,
    /// Pieces right ahead of the playback position
    Critical,
}

/// A file as laid out inside the torrent's concatenated content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFile {
    /// Path inside the torrent, `/` separated
    pub path: String,
    pub length: u64,
    /// Byte offset of the first byte of this file in the torrent
    pub offset: u64,
}

/// Inclusive range of torrent-global pieces covering `length` bytes that
/// start `offset` bytes into the torrent.
///
/// Returns `None` for zero-length files, which occupy no piece.
pub fn piece_span(offset: u64, length: u64, piece_length: u32) -> Option<(u32, u32)> {
    if length == 0 || piece_length == 0 {
        return None;
    }
    let piece_length = u64::from(piece_length);
    let first = offset / piece_length;
    let last = (offset + length - 1) / piece_length;
    Some((first as u32, last as u32))
}

/// Everything the swarm reports once metadata has been exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_count: u32,
    pub files: Vec<EngineFile>,
}

impl SwarmMetadata {
    /// Builds metadata for files laid out back to back in the given order.
    pub fn from_layout(
        info_hash: InfoHash,
        name: impl Into<String>,
        piece_length: u32,
        files: impl IntoIterator<Item = (String, u64)>,
    ) -> Self {
        let mut offset = 0u64;
        let files: Vec<EngineFile> = files
            .into_iter()
            .map(|(path, length)| {
                let file = EngineFile {
                    path,
                    length,
                    offset,
                };
                offset += length;
                file
            })
            .collect();

        let piece_count = if piece_length == 0 {
            0
        } else {
            offset.div_ceil(u64::from(piece_length)) as u32
        };

        Self {
            info_hash,
            name: name.into(),
            piece_length,
            piece_count,
            files,
        }
    }

    /// Total content length in bytes.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }
}

/// Transfer counters reported by the swarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwarmStats {
    /// Verified bytes on disk
    pub downloaded: u64,
    /// Total content length, zero until metadata arrives
    pub length: u64,
    /// Bytes per second
    pub download_speed: u64,
    /// Bytes per second
    pub upload_speed: u64,
    pub peer_count: u32,
}

/// Errors reported by a swarm engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwarmError {
    #[error("Torrent not joined: {info_hash}")]
    UnknownTorrent { info_hash: InfoHash },

    #[error("Metadata not available for {info_hash}")]
    MetadataUnavailable { info_hash: InfoHash },

    #[error("File index {file_index} does not exist in {info_hash}")]
    InvalidFile {
        info_hash: InfoHash,
        file_index: usize,
    },

    #[error("Piece range {piece_start}..={piece_end} is outside 0..{piece_count}")]
    InvalidPieceRange {
        piece_start: u32,
        piece_end: u32,
        piece_count: u32,
    },

    #[error("Byte range {start}..={end} is outside a file of {length} bytes")]
    InvalidByteRange { start: u64, end: u64, length: u64 },

    #[error("Swarm engine has been shut down")]
    EngineShutdown,

    #[error("Swarm I/O error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for SwarmError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            reason: error.to_string(),
        }
    }
}

/// Capability the orchestrator consumes to drive a content swarm.
///
/// Piece indices are torrent-global and ranges are inclusive. Byte offsets
/// passed to [`read_range`](Self::read_range) are relative to the file.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Starts participating in the swarm named by the magnet link.
    async fn join(&self, magnet: &MagnetLink) -> Result<(), SwarmError>;

    /// Subscribes to the metadata-ready event of a torrent.
    ///
    /// May be called before [`join`](Self::join). The receiver resolves once;
    /// if the swarm never delivers metadata it stays pending.
    async fn on_metadata(&self, info_hash: InfoHash) -> Result<MetadataReceiver, SwarmError>;

    /// Lists files of a torrent whose metadata has arrived.
    async fn list_files(&self, info_hash: InfoHash) -> Result<Vec<EngineFile>, SwarmError>;

    /// Sets the priority of an inclusive piece range on behalf of one file.
    async fn set_priority(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
    ) -> Result<(), SwarmError>;

    /// Reads the inclusive byte range `start..=end` of a file.
    ///
    /// The returned stream yields data as soon as the covering pieces are
    /// available and waits for missing ones.
    async fn read_range(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, SwarmError>;

    /// Leaves the swarm and drops all state for the torrent.
    async fn release(&self, info_hash: InfoHash) -> Result<(), SwarmError>;

    async fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_assigns_offsets_and_piece_count() {
        let metadata = SwarmMetadata::from_layout(
            InfoHash::new([1; 20]),
            "show",
            100,
            [
                ("show/a.mkv".to_string(), 250),
                ("show/a.srt".to_string(), 0),
                ("show/b.mkv".to_string(), 51),
            ],
        );

        assert_eq!(metadata.total_length(), 301);
        assert_eq!(metadata.piece_count, 4);
        assert_eq!(metadata.files[1].offset, 250);
        assert_eq!(metadata.files[2].offset, 250);
    }

    #[test]
    fn test_piece_span() {
        assert_eq!(piece_span(150, 250, 100), Some((1, 3)));
        assert_eq!(piece_span(0, 100, 100), Some((0, 0)));
        assert_eq!(piece_span(400, 0, 100), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PriorityTier::Critical > PriorityTier::Normal);
        assert!(PriorityTier::Normal > PriorityTier::Skip);
        assert_eq!(
            PriorityTier::Skip.max(PriorityTier::Normal),
            PriorityTier::Normal
        );
    }
}
