//! Streaming service facade used by the HTTP layer.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::StreamflowConfig;
use crate::engine::{SwarmEngine, SwarmError, SwarmStats};
use crate::streaming::subtitles::fetch_subtitle;
use crate::streaming::{FileStream, RangeResponder, SelectionScheduler, Subtitle};
use crate::torrent::{InfoHash, MagnetParser};
use crate::transfer::{FileEntry, MimeClass, TransferError, TransferRegistry};

/// Classified file list of a ready transfer.
#[derive(Debug, Clone)]
pub struct TransferMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub files: Vec<FileEntry>,
    pub subtitles: Vec<FileEntry>,
}

/// Progress snapshot of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    /// Fraction downloaded, in `[0, 1]`
    pub progress: f64,
    /// Bytes per second
    pub download_speed: u64,
    /// Bytes per second
    pub upload_speed: u64,
    pub peer_count: u32,
    pub downloaded: u64,
    pub length: u64,
    pub bytes_remaining: u64,
    /// Seconds at the current rate, `None` while nothing downloads
    pub time_remaining: Option<u64>,
}

impl From<SwarmStats> for TransferStats {
    fn from(stats: SwarmStats) -> Self {
        let downloaded = stats.downloaded.min(stats.length);
        let bytes_remaining = stats.length - downloaded;
        let progress = if stats.length == 0 {
            0.0
        } else {
            downloaded as f64 / stats.length as f64
        };
        let time_remaining = if bytes_remaining == 0 {
            Some(0)
        } else if stats.download_speed == 0 {
            None
        } else {
            Some(bytes_remaining.div_ceil(stats.download_speed))
        };

        Self {
            progress,
            download_speed: stats.download_speed,
            upload_speed: stats.upload_speed,
            peer_count: stats.peer_count,
            downloaded,
            length: stats.length,
            bytes_remaining,
            time_remaining,
        }
    }
}

/// Parses an info hash taken from a URL path.
///
/// # Errors
/// - `TransferError::InvalidInput` - Not a 40 character hex or 32 character base32 hash
pub fn parse_info_hash(raw: &str) -> Result<InfoHash, TransferError> {
    raw.parse().map_err(|e| TransferError::InvalidInput {
        reason: format!("info hash {raw:?}: {e}"),
    })
}

/// Entry point for every client-facing operation.
///
/// Owns the transfer registry and wires the scheduler and responder to a
/// single swarm engine.
pub struct StreamingService {
    engine: Arc<dyn SwarmEngine>,
    registry: Arc<TransferRegistry>,
    scheduler: Arc<SelectionScheduler>,
    responder: RangeResponder,
    config: StreamflowConfig,
}

impl StreamingService {
    pub fn new(engine: Arc<dyn SwarmEngine>, config: StreamflowConfig) -> Self {
        let registry = Arc::new(TransferRegistry::new(
            Arc::clone(&engine),
            config.transfer.metadata_timeout,
        ));
        let scheduler = Arc::new(SelectionScheduler::new(
            Arc::clone(&engine),
            config.scheduler.critical_window_bytes,
        ));
        let responder = RangeResponder::new(Arc::clone(&engine), Arc::clone(&scheduler));

        Self {
            engine,
            registry,
            scheduler,
            responder,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Starts the periodic idle sweep with the configured interval and threshold.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.registry.spawn_sweeper(
            self.config.transfer.sweep_interval,
            self.config.transfer.idle_threshold,
        )
    }

    /// Finds or creates the transfer for a magnet link and waits for its
    /// classified file list.
    ///
    /// # Errors
    /// - `TransferError::InvalidInput` - Magnet link could not be parsed
    /// - `TransferError::MetadataTimeout` - Swarm did not deliver metadata in time
    /// - `TransferError::SwarmFailure` - Engine failed while joining
    pub async fn metadata(&self, magnet_uri: &str) -> Result<TransferMetadata, TransferError> {
        let magnet =
            MagnetParser::parse_magnet_link(magnet_uri).map_err(|e| TransferError::InvalidInput {
                reason: e.to_string(),
            })?;

        let transfer = self.registry.get_or_create(&magnet).await;
        let content = transfer.wait_for_metadata().await?;
        transfer.touch();

        Ok(TransferMetadata {
            info_hash: transfer.info_hash(),
            name: content.name.clone(),
            files: content.files_of_class(MimeClass::Video).cloned().collect(),
            subtitles: content.files_of_class(MimeClass::Subtitle).cloned().collect(),
        })
    }

    /// Streams a file, honoring an optional `Range` header.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - No live transfer for this info hash
    /// - `TransferError::NotReady` - Transfer has no file list yet
    /// - `TransferError::FileNotFound` - Index is out of range
    /// - `TransferError::UnsatisfiableRange` - Range cannot be served
    /// - `TransferError::SwarmFailure` - Engine failure
    pub async fn stream(
        &self,
        info_hash: &InfoHash,
        file_index: usize,
        range_header: Option<&str>,
    ) -> Result<FileStream, TransferError> {
        let transfer = self.registry.get(info_hash).await?;
        self.responder
            .stream(&transfer, file_index, range_header)
            .await
    }

    /// Fetches a subtitle file in full, converted for browser playback.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - No live transfer for this info hash
    /// - `TransferError::FileNotFound` - Index is out of range or not a subtitle
    /// - `TransferError::ReadFailure` - Engine read failed
    pub async fn subtitle(
        &self,
        info_hash: &InfoHash,
        file_index: usize,
    ) -> Result<Subtitle, TransferError> {
        let transfer = self.registry.get(info_hash).await?;
        fetch_subtitle(
            self.engine.as_ref(),
            &self.scheduler,
            &transfer,
            file_index,
        )
        .await
    }

    /// Reports transfer progress straight from the engine.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - No live transfer for this info hash
    /// - `TransferError::SwarmFailure` - Engine failure
    pub async fn stats(&self, info_hash: &InfoHash) -> Result<TransferStats, TransferError> {
        let transfer = self.registry.get(info_hash).await?;
        let stats = match self.engine.stats(transfer.info_hash()).await {
            Ok(stats) => stats,
            // Acquisition has not joined yet.
            Err(SwarmError::UnknownTorrent { .. }) => SwarmStats::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(stats.into())
    }
}
