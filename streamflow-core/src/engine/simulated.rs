//! State of the simulated swarm, owned by the engine actor.
//!
//! Pieces "arrive" at the configured download rate in priority order. Readers
//! live outside the actor and wait on a shared [`PieceStore`] for the pieces
//! covering their range.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use super::catalog::{Catalog, CatalogEntry, ContentSource};
use super::{
    ByteStream, EngineFile, MetadataReceiver, PriorityTier, SwarmError, SwarmMetadata,
    SwarmStats, piece_span,
};
use crate::config::SimulationConfig;
use crate::torrent::{InfoHash, MagnetLink};

/// Largest chunk handed to a reader at once.
const READ_CHUNK_SIZE: u64 = 64 * 1024;

/// Window over which download speed is averaged.
const SPEED_WINDOW: Duration = Duration::from_secs(1);

/// Piece completion bitmap shared between the actor and readers.
pub(super) struct PieceStore {
    completed: RwLock<Vec<bool>>,
    changes: watch::Sender<u64>,
    closed: AtomicBool,
}

impl PieceStore {
    fn new(piece_count: u32) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new(Self {
            completed: RwLock::new(vec![false; piece_count as usize]),
            changes,
            closed: AtomicBool::new(false),
        })
    }

    fn has(&self, piece: u32) -> bool {
        self.completed
            .read()
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    fn complete(&self, piece: u32) {
        if let Some(slot) = self.completed.write().get_mut(piece as usize) {
            *slot = true;
        }
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Wakes every waiting reader with a failure.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Waits until `piece` is available. Returns false if the torrent was
    /// released first.
    async fn wait_for(&self, piece: u32) -> bool {
        let mut changes = self.changes.subscribe();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            if self.has(piece) {
                return true;
            }
            if changes.changed().await.is_err() {
                return false;
            }
        }
    }
}

/// Everything a reader needs to serve a byte range without the actor.
pub(crate) struct ReadPlan {
    info_hash: InfoHash,
    pieces: Arc<PieceStore>,
    source: ContentSource,
    file_offset: u64,
    piece_length: u64,
    start: u64,
    end: u64,
}

struct ReadState {
    plan: ReadPlan,
    position: u64,
    file: Option<tokio::fs::File>,
    done: bool,
}

impl ReadPlan {
    /// Converts the plan into a pull-based stream of piece-aligned chunks.
    pub(crate) fn into_stream(self) -> ByteStream {
        let state = ReadState {
            position: self.start,
            plan: self,
            file: None,
            done: false,
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            if state.done || state.position > state.plan.end {
                return None;
            }
            match state.next_chunk().await {
                Ok(chunk) => Some((Ok(chunk), state)),
                Err(e) => {
                    state.done = true;
                    Some((Err(e), state))
                }
            }
        }))
    }
}

impl ReadState {
    async fn next_chunk(&mut self) -> Result<Bytes, SwarmError> {
        let plan = &self.plan;
        let global = plan.file_offset + self.position;
        let piece = global / plan.piece_length;
        let piece_last_byte = (piece + 1) * plan.piece_length - 1 - plan.file_offset;
        let chunk_end = plan
            .end
            .min(piece_last_byte)
            .min(self.position + READ_CHUNK_SIZE - 1);

        if !plan.pieces.wait_for(piece as u32).await {
            return Err(SwarmError::UnknownTorrent {
                info_hash: plan.info_hash,
            });
        }

        let chunk = match &plan.source {
            ContentSource::Memory(data) => {
                data.slice(self.position as usize..=chunk_end as usize)
            }
            ContentSource::Disk(path) => {
                if self.file.is_none() {
                    self.file = Some(tokio::fs::File::open(path).await?);
                }
                let Some(file) = self.file.as_mut() else {
                    return Err(SwarmError::Io {
                        reason: format!("{} is not open", path.display()),
                    });
                };
                let mut buffer = vec![0u8; (chunk_end - self.position + 1) as usize];
                file.seek(SeekFrom::Start(self.position)).await?;
                file.read_exact(&mut buffer).await?;
                Bytes::from(buffer)
            }
        };

        self.position = chunk_end + 1;
        Ok(chunk)
    }
}

/// A torrent whose metadata the swarm can deliver.
struct TorrentContent {
    entry: Arc<CatalogEntry>,
    metadata: SwarmMetadata,
    pieces: Arc<PieceStore>,
    /// Priority per file, indexed by piece relative to the file's first piece
    file_priorities: Vec<Vec<PriorityTier>>,
    /// Bytes earned toward the next piece
    credit: u64,
    /// Completed bytes with completion time, for speed estimation
    recent: VecDeque<(Instant, u64)>,
    downloaded: u64,
}

impl TorrentContent {
    fn new(entry: Arc<CatalogEntry>, piece_length: u32) -> Self {
        let metadata = SwarmMetadata::from_layout(
            entry.info_hash,
            entry.name.clone(),
            piece_length,
            entry.files.iter().map(|f| (f.path.clone(), f.length)),
        );
        let file_priorities = metadata
            .files
            .iter()
            .map(|file| match piece_span(file.offset, file.length, piece_length) {
                Some((first, last)) => vec![PriorityTier::Normal; (last - first + 1) as usize],
                None => Vec::new(),
            })
            .collect();

        Self {
            pieces: PieceStore::new(metadata.piece_count),
            entry,
            metadata,
            file_priorities,
            credit: 0,
            recent: VecDeque::new(),
            downloaded: 0,
        }
    }

    fn file(&self, file_index: usize) -> Result<&EngineFile, SwarmError> {
        self.metadata
            .files
            .get(file_index)
            .ok_or(SwarmError::InvalidFile {
                info_hash: self.metadata.info_hash,
                file_index,
            })
    }

    fn piece_size(&self, piece: u32) -> u64 {
        let piece_length = u64::from(self.metadata.piece_length);
        let start = u64::from(piece) * piece_length;
        piece_length.min(self.metadata.total_length() - start)
    }

    /// Highest priority any file assigns to each piece.
    fn effective_priorities(&self) -> Vec<PriorityTier> {
        let mut priorities = vec![PriorityTier::Skip; self.metadata.piece_count as usize];
        for (file, tiers) in self.metadata.files.iter().zip(&self.file_priorities) {
            let Some((first, _)) =
                piece_span(file.offset, file.length, self.metadata.piece_length)
            else {
                continue;
            };
            for (i, tier) in tiers.iter().enumerate() {
                let slot = &mut priorities[first as usize + i];
                *slot = (*slot).max(*tier);
            }
        }
        priorities
    }

    fn download(&mut self, budget: u64, now: Instant) {
        let priorities = self.effective_priorities();
        let mut wanted: Vec<u32> = (0..self.metadata.piece_count)
            .filter(|&piece| {
                priorities[piece as usize] > PriorityTier::Skip && !self.pieces.has(piece)
            })
            .collect();
        wanted.sort_by_key(|&piece| (Reverse(priorities[piece as usize]), piece));

        self.credit += budget;
        let mut exhausted = true;
        for piece in wanted {
            let size = self.piece_size(piece);
            if self.credit < size {
                exhausted = false;
                break;
            }
            self.credit -= size;
            self.downloaded += size;
            self.recent.push_back((now, size));
            self.pieces.complete(piece);
        }
        if exhausted {
            self.credit = 0;
        }

        while let Some(&(at, _)) = self.recent.front() {
            if now.duration_since(at) <= SPEED_WINDOW {
                break;
            }
            self.recent.pop_front();
        }
    }

    fn download_speed(&self) -> u64 {
        let bytes: u64 = self.recent.iter().map(|(_, size)| size).sum();
        bytes * 1_000 / SPEED_WINDOW.as_millis() as u64
    }
}

struct JoinedTorrent {
    /// `None` when nobody in the swarm has the content
    content: Option<TorrentContent>,
    metadata_at: Instant,
    announced: bool,
}

/// Simulated swarm state driven by the engine actor.
pub(super) struct SimulatedSwarm {
    config: SimulationConfig,
    catalog: Catalog,
    torrents: HashMap<InfoHash, JoinedTorrent>,
    subscribers: HashMap<InfoHash, Vec<oneshot::Sender<Result<SwarmMetadata, SwarmError>>>>,
}

impl SimulatedSwarm {
    pub(super) fn new(config: SimulationConfig, catalog: Catalog) -> Self {
        Self {
            config,
            catalog,
            torrents: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }

    pub(super) fn join(&mut self, magnet: &MagnetLink) {
        let info_hash = magnet.info_hash;
        if self.torrents.contains_key(&info_hash) {
            return;
        }

        let now = Instant::now();
        let content = self
            .catalog
            .get(&info_hash)
            .map(|entry| TorrentContent::new(entry, self.config.piece_length));
        if content.is_none() {
            tracing::debug!("Joined swarm {info_hash} with no peers holding the content");
        }

        self.torrents.insert(
            info_hash,
            JoinedTorrent {
                content,
                metadata_at: now + self.config.metadata_delay,
                announced: false,
            },
        );
        self.announce_due(now);
    }

    pub(super) fn subscribe(&mut self, info_hash: InfoHash) -> MetadataReceiver {
        let (sender, receiver) = oneshot::channel();
        match self.torrents.get(&info_hash) {
            Some(JoinedTorrent {
                content: Some(content),
                announced: true,
                ..
            }) => {
                let _ = sender.send(Ok(content.metadata.clone()));
            }
            _ => self.subscribers.entry(info_hash).or_default().push(sender),
        }
        receiver
    }

    /// Delivers metadata to subscribers of every torrent whose delay elapsed.
    fn announce_due(&mut self, now: Instant) {
        for (info_hash, torrent) in &mut self.torrents {
            let Some(content) = &torrent.content else {
                continue;
            };
            if torrent.announced || torrent.metadata_at > now {
                continue;
            }
            torrent.announced = true;
            tracing::debug!("Metadata available for {info_hash}");
            for subscriber in self.subscribers.remove(info_hash).unwrap_or_default() {
                let _ = subscriber.send(Ok(content.metadata.clone()));
            }
        }
    }

    fn ready(&self, info_hash: InfoHash) -> Result<&TorrentContent, SwarmError> {
        let torrent = self
            .torrents
            .get(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        match &torrent.content {
            Some(content) if torrent.announced => Ok(content),
            _ => Err(SwarmError::MetadataUnavailable { info_hash }),
        }
    }

    fn ready_mut(&mut self, info_hash: InfoHash) -> Result<&mut TorrentContent, SwarmError> {
        let torrent = self
            .torrents
            .get_mut(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        match &mut torrent.content {
            Some(content) if torrent.announced => Ok(content),
            _ => Err(SwarmError::MetadataUnavailable { info_hash }),
        }
    }

    pub(super) fn list_files(&self, info_hash: InfoHash) -> Result<Vec<EngineFile>, SwarmError> {
        Ok(self.ready(info_hash)?.metadata.files.clone())
    }

    pub(super) fn set_priority(
        &mut self,
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
    ) -> Result<(), SwarmError> {
        let content = self.ready_mut(info_hash)?;
        let file = content.file(file_index)?;
        let out_of_range = SwarmError::InvalidPieceRange {
            piece_start,
            piece_end,
            piece_count: content.metadata.piece_count,
        };
        let Some((first, last)) =
            piece_span(file.offset, file.length, content.metadata.piece_length)
        else {
            return Err(out_of_range);
        };
        if piece_start > piece_end || piece_start < first || piece_end > last {
            return Err(out_of_range);
        }

        let tiers = &mut content.file_priorities[file_index];
        for piece in piece_start..=piece_end {
            tiers[(piece - first) as usize] = tier;
        }
        tracing::trace!(
            "Priority {tier:?} for pieces {piece_start}..={piece_end} of {info_hash} file {file_index}"
        );
        Ok(())
    }

    pub(super) fn read_plan(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ReadPlan, SwarmError> {
        let content = self.ready(info_hash)?;
        let file = content.file(file_index)?;
        if start > end || end >= file.length {
            return Err(SwarmError::InvalidByteRange {
                start,
                end,
                length: file.length,
            });
        }

        Ok(ReadPlan {
            info_hash,
            pieces: Arc::clone(&content.pieces),
            source: content.entry.files[file_index].source.clone(),
            file_offset: file.offset,
            piece_length: u64::from(content.metadata.piece_length),
            start,
            end,
        })
    }

    pub(super) fn release(&mut self, info_hash: InfoHash) -> Result<(), SwarmError> {
        self.subscribers.remove(&info_hash);
        let torrent = self
            .torrents
            .remove(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        if let Some(content) = torrent.content {
            content.pieces.close();
        }
        tracing::debug!("Left swarm {info_hash}");
        Ok(())
    }

    pub(super) fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError> {
        let torrent = self
            .torrents
            .get(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        let Some(content) = &torrent.content else {
            return Ok(SwarmStats::default());
        };

        let mut stats = SwarmStats {
            peer_count: self.config.peer_count,
            ..SwarmStats::default()
        };
        if torrent.announced {
            stats.downloaded = content.downloaded;
            stats.length = content.metadata.total_length();
            stats.download_speed = content.download_speed();
        }
        Ok(stats)
    }

    /// Advances the simulation by one tick.
    pub(super) fn tick(&mut self, now: Instant) {
        self.announce_due(now);

        let budget = self.config.bytes_per_tick();
        for torrent in self.torrents.values_mut() {
            if !torrent.announced {
                continue;
            }
            if let Some(content) = torrent.content.as_mut() {
                content.download(budget, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn swarm_with(
        data: Vec<(&str, Vec<u8>)>,
        config: SimulationConfig,
    ) -> (SimulatedSwarm, MagnetLink) {
        let mut catalog = Catalog::new();
        let info_hash = catalog.insert_memory(
            "pack",
            data.into_iter()
                .map(|(path, bytes)| (path.to_string(), Bytes::from(bytes))),
        );
        let magnet = MagnetLink {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
        };
        (SimulatedSwarm::new(config, catalog), magnet)
    }

    fn slow_config() -> SimulationConfig {
        SimulationConfig {
            piece_length: 10,
            download_rate: 100,
            metadata_delay: Duration::ZERO,
            peer_count: 3,
            tick_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_skipped_pieces_are_never_downloaded() {
        let (mut swarm, magnet) =
            swarm_with(vec![("a", vec![1; 30]), ("b", vec![2; 30])], slow_config());
        swarm.join(&magnet);
        swarm
            .set_priority(magnet.info_hash, 0, 0, 2, PriorityTier::Skip)
            .unwrap();

        for _ in 0..10 {
            swarm.tick(Instant::now());
        }

        let stats = swarm.stats(magnet.info_hash).unwrap();
        assert_eq!(stats.downloaded, 30);
        let content = swarm.ready(magnet.info_hash).unwrap();
        assert!(!content.pieces.has(0));
        assert!(content.pieces.has(3));
    }

    #[tokio::test]
    async fn test_critical_pieces_download_first() {
        let config = SimulationConfig {
            download_rate: 200,
            ..slow_config()
        };
        let (mut swarm, magnet) = swarm_with(vec![("a", vec![1; 100])], config);
        swarm.join(&magnet);
        swarm
            .set_priority(magnet.info_hash, 0, 7, 8, PriorityTier::Critical)
            .unwrap();

        swarm.tick(Instant::now());

        let content = swarm.ready(magnet.info_hash).unwrap();
        assert!(content.pieces.has(7));
        assert!(content.pieces.has(8));
        assert!(!content.pieces.has(0));
    }

    #[tokio::test]
    async fn test_priority_outside_file_is_rejected() {
        let (mut swarm, magnet) =
            swarm_with(vec![("a", vec![1; 30]), ("b", vec![2; 30])], slow_config());
        swarm.join(&magnet);

        let result = swarm.set_priority(magnet.info_hash, 0, 0, 3, PriorityTier::Normal);
        assert!(matches!(result, Err(SwarmError::InvalidPieceRange { .. })));
    }

    #[tokio::test]
    async fn test_read_waits_for_pieces() {
        let data: Vec<u8> = (0..50u8).collect();
        let (mut swarm, magnet) = swarm_with(vec![("a", data)], slow_config());
        swarm.join(&magnet);

        let mut stream = swarm
            .read_plan(magnet.info_hash, 0, 5, 24)
            .unwrap()
            .into_stream();

        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());

        for _ in 0..5 {
            swarm.tick(Instant::now());
        }

        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, (5..25u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_release_fails_waiting_reads() {
        let stalled = SimulationConfig {
            download_rate: 0,
            ..slow_config()
        };
        let (mut swarm, magnet) = swarm_with(vec![("a", vec![0; 20])], stalled);
        swarm.join(&magnet);
        let mut stream = swarm
            .read_plan(magnet.info_hash, 0, 0, 9)
            .unwrap()
            .into_stream();

        swarm.release(magnet.info_hash).unwrap();

        let result = stream.next().await.unwrap();
        assert!(matches!(result, Err(SwarmError::UnknownTorrent { .. })));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_content_never_announces() {
        let (mut swarm, _) = swarm_with(vec![("a", vec![0; 20])], slow_config());
        let stranger = MagnetLink {
            info_hash: InfoHash::new([9; 20]),
            display_name: None,
            trackers: Vec::new(),
        };

        let mut receiver = swarm.subscribe(stranger.info_hash);
        swarm.join(&stranger);
        swarm.tick(Instant::now());

        assert!(receiver.try_recv().is_err());
        assert_eq!(
            swarm.stats(stranger.info_hash).unwrap(),
            SwarmStats::default()
        );
    }
}
