//! Mock swarm engine for testing the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{
    ByteStream, EngineFile, MetadataReceiver, PriorityTier, SwarmEngine, SwarmError,
    SwarmMetadata, SwarmStats,
};
use crate::torrent::{InfoHash, MagnetLink};

/// Chunk size of mock reads, small enough to produce several chunks in tests.
const MOCK_CHUNK_SIZE: usize = 4096;

/// A call observed by [`MockSwarm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmCall {
    Join(InfoHash),
    ListFiles(InfoHash),
    SetPriority {
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
    },
    ReadRange {
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
    },
    Release(InfoHash),
}

/// How the mock answers metadata subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBehavior {
    /// Known torrents resolve as soon as they are joined
    Immediate,
    /// Subscriptions never resolve
    Withhold,
    /// Subscriptions resolve with an engine error
    Fail,
}

struct MockTorrent {
    metadata: SwarmMetadata,
    data: Vec<Bytes>,
}

struct MockState {
    torrents: HashMap<InfoHash, MockTorrent>,
    joined: HashMap<InfoHash, bool>,
    pending: HashMap<InfoHash, Vec<oneshot::Sender<Result<SwarmMetadata, SwarmError>>>>,
    calls: Vec<SwarmCall>,
    metadata_behavior: MetadataBehavior,
    fail_join: bool,
    release_delay: Duration,
    stats: SwarmStats,
}

/// In-memory swarm that delivers metadata instantly and records every call.
///
/// All content is considered downloaded, so reads never block.
#[derive(Clone)]
pub struct MockSwarm {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSwarm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSwarm {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                torrents: HashMap::new(),
                joined: HashMap::new(),
                pending: HashMap::new(),
                calls: Vec::new(),
                metadata_behavior: MetadataBehavior::Immediate,
                fail_join: false,
                release_delay: Duration::ZERO,
                stats: SwarmStats::default(),
            })),
        }
    }

    /// Registers a torrent and returns a magnet link for it.
    pub fn add_torrent(
        &self,
        name: &str,
        piece_length: u32,
        files: Vec<(&str, Vec<u8>)>,
    ) -> MagnetLink {
        let mut hash = [0u8; 20];
        for (i, byte) in name.bytes().enumerate() {
            hash[i % 20] = hash[i % 20].wrapping_mul(31).wrapping_add(byte);
        }
        let info_hash = InfoHash::new(hash);

        let metadata = SwarmMetadata::from_layout(
            info_hash,
            name,
            piece_length,
            files
                .iter()
                .map(|(path, data)| (path.to_string(), data.len() as u64)),
        );
        let data = files
            .into_iter()
            .map(|(_, data)| Bytes::from(data))
            .collect();

        self.state
            .lock()
            .torrents
            .insert(info_hash, MockTorrent { metadata, data });

        MagnetLink {
            info_hash,
            display_name: Some(name.to_string()),
            trackers: Vec::new(),
        }
    }

    pub fn set_metadata_behavior(&self, behavior: MetadataBehavior) {
        self.state.lock().metadata_behavior = behavior;
    }

    /// Makes every later `join` fail.
    pub fn fail_joins(&self) {
        self.state.lock().fail_join = true;
    }

    /// Makes every later `release` take `delay` before it completes.
    pub fn delay_releases(&self, delay: Duration) {
        self.state.lock().release_delay = delay;
    }

    /// Sets the counters returned by `stats` for joined torrents.
    pub fn set_stats(&self, stats: SwarmStats) {
        self.state.lock().stats = stats;
    }

    pub fn calls(&self) -> Vec<SwarmCall> {
        self.state.lock().calls.clone()
    }

    pub fn join_count(&self, info_hash: InfoHash) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == SwarmCall::Join(info_hash))
            .count()
    }

    pub fn release_count(&self, info_hash: InfoHash) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == SwarmCall::Release(info_hash))
            .count()
    }

    /// Priority calls in order as `(file_index, piece_start, piece_end, tier)`.
    pub fn priority_calls(&self, info_hash: InfoHash) -> Vec<(usize, u32, u32, PriorityTier)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SwarmCall::SetPriority {
                    info_hash: hash,
                    file_index,
                    piece_start,
                    piece_end,
                    tier,
                } if hash == info_hash => Some((file_index, piece_start, piece_end, tier)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current tier of every piece, replaying the recorded priority calls.
    ///
    /// Pieces start at `Normal`, as a freshly joined torrent downloads
    /// everything.
    pub fn piece_tiers(&self, info_hash: InfoHash) -> Vec<PriorityTier> {
        let piece_count = self
            .state
            .lock()
            .torrents
            .get(&info_hash)
            .map(|torrent| torrent.metadata.piece_count)
            .unwrap_or(0);

        let mut tiers = vec![PriorityTier::Normal; piece_count as usize];
        for (_, start, end, tier) in self.priority_calls(info_hash) {
            for piece in start..=end {
                if let Some(slot) = tiers.get_mut(piece as usize) {
                    *slot = tier;
                }
            }
        }
        tiers
    }
}

impl MockState {
    fn torrent(&self, info_hash: InfoHash) -> Result<&MockTorrent, SwarmError> {
        if !self.joined.contains_key(&info_hash) {
            return Err(SwarmError::UnknownTorrent { info_hash });
        }
        self.torrents
            .get(&info_hash)
            .ok_or(SwarmError::MetadataUnavailable { info_hash })
    }

    fn resolve_pending(&mut self, info_hash: InfoHash) {
        let outcome = match self.metadata_behavior {
            MetadataBehavior::Withhold => return,
            MetadataBehavior::Fail => Err(SwarmError::MetadataUnavailable { info_hash }),
            MetadataBehavior::Immediate => match self.torrents.get(&info_hash) {
                Some(torrent) => Ok(torrent.metadata.clone()),
                None => return,
            },
        };
        for sender in self.pending.remove(&info_hash).unwrap_or_default() {
            let _ = sender.send(outcome.clone());
        }
    }
}

#[async_trait]
impl SwarmEngine for MockSwarm {
    async fn join(&self, magnet: &MagnetLink) -> Result<(), SwarmError> {
        let mut state = self.state.lock();
        state.calls.push(SwarmCall::Join(magnet.info_hash));
        if state.fail_join {
            return Err(SwarmError::Io {
                reason: "mock join failure".to_string(),
            });
        }
        state.joined.insert(magnet.info_hash, true);
        state.resolve_pending(magnet.info_hash);
        Ok(())
    }

    async fn on_metadata(&self, info_hash: InfoHash) -> Result<MetadataReceiver, SwarmError> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        state.pending.entry(info_hash).or_default().push(sender);
        if state.joined.contains_key(&info_hash) {
            state.resolve_pending(info_hash);
        }
        Ok(receiver)
    }

    async fn list_files(&self, info_hash: InfoHash) -> Result<Vec<EngineFile>, SwarmError> {
        let mut state = self.state.lock();
        let files = state.torrent(info_hash)?.metadata.files.clone();
        state.calls.push(SwarmCall::ListFiles(info_hash));
        Ok(files)
    }

    async fn set_priority(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
    ) -> Result<(), SwarmError> {
        let mut state = self.state.lock();
        let torrent = state.torrent(info_hash)?;
        if file_index >= torrent.metadata.files.len() {
            return Err(SwarmError::InvalidFile {
                info_hash,
                file_index,
            });
        }
        if piece_start > piece_end || piece_end >= torrent.metadata.piece_count {
            return Err(SwarmError::InvalidPieceRange {
                piece_start,
                piece_end,
                piece_count: torrent.metadata.piece_count,
            });
        }
        state.calls.push(SwarmCall::SetPriority {
            info_hash,
            file_index,
            piece_start,
            piece_end,
            tier,
        });
        Ok(())
    }

    async fn read_range(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, SwarmError> {
        let mut state = self.state.lock();
        let torrent = state.torrent(info_hash)?;
        let data = torrent
            .data
            .get(file_index)
            .cloned()
            .ok_or(SwarmError::InvalidFile {
                info_hash,
                file_index,
            })?;
        if start > end || end >= data.len() as u64 {
            return Err(SwarmError::InvalidByteRange {
                start,
                end,
                length: data.len() as u64,
            });
        }
        state.calls.push(SwarmCall::ReadRange {
            info_hash,
            file_index,
            start,
            end,
        });

        let span = data.slice(start as usize..=end as usize);
        let chunks: Vec<Result<Bytes, SwarmError>> = span
            .chunks(MOCK_CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn release(&self, info_hash: InfoHash) -> Result<(), SwarmError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(SwarmCall::Release(info_hash));
            state.release_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.pending.remove(&info_hash);
        state
            .joined
            .remove(&info_hash)
            .map(|_| ())
            .ok_or(SwarmError::UnknownTorrent { info_hash })
    }

    async fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError> {
        let state = self.state.lock();
        if !state.joined.contains_key(&info_hash) {
            return Err(SwarmError::UnknownTorrent { info_hash });
        }
        let mut stats = state.stats;
        if stats.length == 0 {
            stats.length = state
                .torrents
                .get(&info_hash)
                .map(|torrent| torrent.metadata.total_length())
                .unwrap_or(0);
        }
        Ok(stats)
    }
}
