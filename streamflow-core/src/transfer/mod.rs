//! Per-torrent transfer state and its registry
//!
//! A [`Transfer`] is created on the first metadata request for an info hash,
//! becomes `Ready` once the swarm reports the file list and is evicted by the
//! registry after staying idle with no reader attached.

mod acquisition;
pub mod media;
pub mod registry;

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

pub use media::MimeClass;
pub use registry::TransferRegistry;
use crate::engine::{SwarmError, SwarmMetadata, piece_span};
use crate::torrent::InfoHash;

/// Errors surfaced by transfer, scheduling and streaming operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Transfer not found: {info_hash}")]
    TransferNotFound { info_hash: InfoHash },

    #[error("File {file_index} not found in {info_hash}")]
    FileNotFound {
        info_hash: InfoHash,
        file_index: usize,
    },

    #[error("Transfer {info_hash} is not ready (state: {state})")]
    NotReady {
        info_hash: InfoHash,
        state: TransferState,
    },

    #[error("Timed out after {timeout:?} waiting for metadata of {info_hash}")]
    MetadataTimeout {
        info_hash: InfoHash,
        timeout: Duration,
    },

    #[error("Range not satisfiable for a file of {length} bytes")]
    UnsatisfiableRange { length: u64 },

    #[error("Swarm engine failure: {0}")]
    SwarmFailure(#[from] SwarmError),

    #[error("Read failed: {reason}")]
    ReadFailure { reason: String },
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    JoiningSwarm,
    AwaitingMetadata,
    Ready,
    Failed,
    Evicted,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::JoiningSwarm => "joining swarm",
            TransferState::AwaitingMetadata => "awaiting metadata",
            TransferState::Ready => "ready",
            TransferState::Failed => "failed",
            TransferState::Evicted => "evicted",
        };
        f.write_str(name)
    }
}

/// A file of a ready transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Stable position in the torrent's file list
    pub index: usize,
    /// Last path component
    pub name: String,
    /// Full path inside the torrent
    pub path: String,
    pub length: u64,
    /// Byte offset inside the torrent's concatenated content
    pub offset: u64,
    pub mime_class: MimeClass,
    pub mime_type: String,
}

impl FileEntry {
    /// Inclusive torrent-global piece range of this file, `None` when empty.
    pub fn piece_span(&self, piece_length: u32) -> Option<(u32, u32)> {
        piece_span(self.offset, self.length, piece_length)
    }
}

/// File list and layout of a transfer, fixed once metadata arrives.
#[derive(Debug, Clone)]
pub struct TransferContent {
    pub name: String,
    pub piece_length: u32,
    pub piece_count: u32,
    pub files: Vec<FileEntry>,
}

impl TransferContent {
    /// Classifies the files reported by the swarm.
    pub fn from_metadata(metadata: &SwarmMetadata) -> Self {
        let files = metadata
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let (mime_class, mime_type) = media::classify(&file.path);
                FileEntry {
                    index,
                    name: file
                        .path
                        .rsplit('/')
                        .next()
                        .unwrap_or(&file.path)
                        .to_string(),
                    path: file.path.clone(),
                    length: file.length,
                    offset: file.offset,
                    mime_class,
                    mime_type,
                }
            })
            .collect();

        Self {
            name: metadata.name.clone(),
            piece_length: metadata.piece_length,
            piece_count: metadata.piece_count,
            files,
        }
    }

    pub fn files_of_class(&self, class: MimeClass) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().filter(move |file| file.mime_class == class)
    }
}

/// Outcome of metadata acquisition, shared with every waiter.
#[derive(Debug, Clone, PartialEq)]
enum MetadataOutcome {
    Pending,
    Ready,
    Failed(TransferError),
}

#[derive(Debug)]
struct Lifecycle {
    state: TransferState,
    last_activity: Instant,
    in_flight: usize,
}

/// Exclusive selection of a transfer, mutated only by the scheduler.
#[derive(Debug, Default)]
pub struct Selection {
    pub selected: Option<usize>,
    pub window: Option<CriticalWindow>,
}

/// Pieces most recently raised to the critical tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalWindow {
    pub file_index: usize,
    pub first_piece: u32,
    pub last_piece: u32,
}

impl CriticalWindow {
    pub fn contains(&self, piece: u32) -> bool {
        (self.first_piece..=self.last_piece).contains(&piece)
    }
}

/// Per-info-hash transfer state.
pub struct Transfer {
    info_hash: InfoHash,
    display_name: Mutex<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
    selection: tokio::sync::Mutex<Selection>,
    content: OnceLock<TransferContent>,
    outcome: watch::Sender<MetadataOutcome>,
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("info_hash", &self.info_hash)
            .field("state", &self.state())
            .finish()
    }
}

impl Transfer {
    pub(crate) fn new(info_hash: InfoHash, display_name: Option<String>) -> Self {
        let (outcome, _) = watch::channel(MetadataOutcome::Pending);
        Self {
            info_hash,
            display_name: Mutex::new(display_name),
            lifecycle: Mutex::new(Lifecycle {
                state: TransferState::JoiningSwarm,
                last_activity: Instant::now(),
                in_flight: 0,
            }),
            selection: tokio::sync::Mutex::new(Selection::default()),
            content: OnceLock::new(),
            outcome,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Magnet display name until metadata arrives, then the torrent name.
    pub fn display_name(&self) -> Option<String> {
        self.display_name.lock().clone()
    }

    pub fn state(&self) -> TransferState {
        self.lifecycle.lock().state
    }

    pub fn last_activity(&self) -> Instant {
        self.lifecycle.lock().last_activity
    }

    pub fn in_flight(&self) -> usize {
        self.lifecycle.lock().in_flight
    }

    /// Records client activity.
    pub fn touch(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.last_activity = lifecycle.last_activity.max(Instant::now());
    }

    /// File layout, available once the transfer is ready.
    ///
    /// # Errors
    /// - `TransferError::NotReady` - Metadata has not arrived or acquisition failed
    pub fn content(&self) -> Result<&TransferContent, TransferError> {
        let state = self.state();
        match self.content.get() {
            Some(content) if state == TransferState::Ready => Ok(content),
            _ => Err(TransferError::NotReady {
                info_hash: self.info_hash,
                state,
            }),
        }
    }

    /// Looks up a file of a ready transfer.
    ///
    /// # Errors
    /// - `TransferError::NotReady` - Transfer has no file list yet
    /// - `TransferError::FileNotFound` - Index is out of range
    pub fn file(&self, file_index: usize) -> Result<&FileEntry, TransferError> {
        self.content()?
            .files
            .get(file_index)
            .ok_or(TransferError::FileNotFound {
                info_hash: self.info_hash,
                file_index,
            })
    }

    /// Waits for metadata acquisition to finish.
    ///
    /// Every caller observes the same outcome.
    ///
    /// # Errors
    /// - `TransferError::MetadataTimeout` - Swarm did not deliver metadata in time
    /// - `TransferError::SwarmFailure` - Engine failed while joining
    /// - `TransferError::NotReady` - Transfer was evicted while waiting
    pub async fn wait_for_metadata(&self) -> Result<&TransferContent, TransferError> {
        let mut receiver = self.outcome.subscribe();
        let outcome = receiver
            .wait_for(|outcome| *outcome != MetadataOutcome::Pending)
            .await
            .map(|outcome| (*outcome).clone())
            .map_err(|_| TransferError::NotReady {
                info_hash: self.info_hash,
                state: self.state(),
            })?;

        match outcome {
            MetadataOutcome::Failed(error) => Err(error),
            _ => self.content(),
        }
    }

    /// Selection state, locked across back-to-back priority changes.
    pub(crate) fn selection(&self) -> &tokio::sync::Mutex<Selection> {
        &self.selection
    }

    /// Currently selected file index.
    pub async fn selected_file(&self) -> Option<usize> {
        self.selection.lock().await.selected
    }

    /// Registers a reader. The guard keeps the transfer from being evicted
    /// until it is dropped.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - Transfer has already been evicted
    pub fn begin_read(self: &Arc<Self>) -> Result<ReadGuard, TransferError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == TransferState::Evicted {
            return Err(TransferError::TransferNotFound {
                info_hash: self.info_hash,
            });
        }
        lifecycle.in_flight += 1;
        lifecycle.last_activity = lifecycle.last_activity.max(Instant::now());

        Ok(ReadGuard {
            transfer: Arc::clone(self),
        })
    }

    pub(crate) fn set_state(&self, state: TransferState) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == TransferState::Evicted {
            return;
        }
        tracing::debug!(
            "Transfer {} {} -> {}",
            self.info_hash,
            lifecycle.state,
            state
        );
        lifecycle.state = state;
    }

    pub(crate) fn mark_ready(&self, content: TransferContent) {
        *self.display_name.lock() = Some(content.name.clone());
        let _ = self.content.set(content);
        self.set_state(TransferState::Ready);
        self.outcome.send_replace(MetadataOutcome::Ready);
    }

    pub(crate) fn mark_failed(&self, error: TransferError) {
        self.set_state(TransferState::Failed);
        self.outcome.send_replace(MetadataOutcome::Failed(error));
    }

    /// Marks the transfer evicted if it has been idle for at least
    /// `idle_threshold` with no reader attached.
    pub(crate) fn try_evict(&self, now: Instant, idle_threshold: Duration) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == TransferState::Evicted {
            return true;
        }
        if lifecycle.in_flight > 0 {
            return false;
        }
        if now.saturating_duration_since(lifecycle.last_activity) < idle_threshold {
            return false;
        }
        lifecycle.state = TransferState::Evicted;
        true
    }
}

/// In-flight read registration, released on drop.
#[derive(Debug)]
pub struct ReadGuard {
    transfer: Arc<Transfer>,
}

impl ReadGuard {
    pub fn transfer(&self) -> &Arc<Transfer> {
        &self.transfer
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let mut lifecycle = self.transfer.lifecycle.lock();
        lifecycle.in_flight = lifecycle.in_flight.saturating_sub(1);
        lifecycle.last_activity = lifecycle.last_activity.max(Instant::now());
    }
}
