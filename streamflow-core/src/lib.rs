//! StreamFlow Core - Stream media out of a torrent swarm while it downloads
//!
//! This crate turns magnet links into transfers, keeps the swarm focused on
//! the one file a client is watching, serves that file over byte ranges as
//! pieces arrive and converts subtitles for browser playback. The swarm
//! itself sits behind the [`engine::SwarmEngine`] trait.

pub mod config;
pub mod engine;
pub mod service;
pub mod streaming;
pub mod torrent;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use config::StreamflowConfig;
pub use engine::{SwarmEngine, SwarmError};
pub use service::{StreamingService, TransferMetadata, TransferStats};
pub use torrent::{InfoHash, MagnetLink, MagnetParser};
pub use torrent::magnet::MagnetError;
pub use transfer::{Transfer, TransferError, TransferRegistry, TransferState};

/// Core errors that can bubble up from any StreamFlow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StreamflowError {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Magnet error: {0}")]
    Magnet(#[from] MagnetError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamflowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            StreamflowError::Transfer(e) => match e {
                TransferError::InvalidInput { reason } => format!("Invalid request: {reason}"),
                TransferError::TransferNotFound { info_hash } => {
                    format!("Torrent {info_hash} is not active")
                }
                TransferError::FileNotFound { file_index, .. } => {
                    format!("File {file_index} not found")
                }
                TransferError::MetadataTimeout { .. } => {
                    "Timed out waiting for torrent metadata".to_string()
                }
                TransferError::UnsatisfiableRange { length } => {
                    format!("Requested range not satisfiable for {length} bytes")
                }
                _ => "Streaming error occurred".to_string(),
            },
            StreamflowError::Swarm(_) => "Download error occurred".to_string(),
            StreamflowError::Magnet(e) => format!("Invalid magnet link: {e}"),
            StreamflowError::Configuration { .. } => "Configuration error occurred".to_string(),
            StreamflowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StreamflowError::Configuration { .. }
                | StreamflowError::Magnet(_)
                | StreamflowError::Transfer(
                    TransferError::InvalidInput { .. }
                        | TransferError::FileNotFound { .. }
                        | TransferError::UnsatisfiableRange { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        let range: StreamflowError = TransferError::UnsatisfiableRange { length: 10 }.into();
        assert!(range.is_user_error());
        assert_eq!(
            range.user_message(),
            "Requested range not satisfiable for 10 bytes"
        );

        let swarm: StreamflowError = SwarmError::EngineShutdown.into();
        assert!(!swarm.is_user_error());

        let magnet = MagnetParser::parse_magnet_link("http://example.com").unwrap_err();
        assert!(StreamflowError::from(magnet).is_user_error());
    }
}
