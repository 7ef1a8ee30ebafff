//! Registry of live transfers keyed by info hash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::acquisition::acquire_metadata;
use super::{Transfer, TransferError, TransferState};
use crate::engine::SwarmEngine;
use crate::torrent::{InfoHash, MagnetLink};

/// Lock held while an evicted transfer is released from the swarm.
pub(super) type ReleaseBarrier = Arc<tokio::sync::Mutex<()>>;

/// Maps each info hash to at most one live [`Transfer`].
///
/// Lookups take the read lock. Creation and eviction take the write lock.
/// Evicted transfers are released from the swarm after the write lock is
/// dropped; a transfer re-created for the same info hash in the meantime
/// joins only once that release has finished.
pub struct TransferRegistry {
    transfers: RwLock<HashMap<InfoHash, Arc<Transfer>>>,
    releasing: parking_lot::Mutex<HashMap<InfoHash, ReleaseBarrier>>,
    engine: Arc<dyn SwarmEngine>,
    metadata_timeout: Duration,
}

impl TransferRegistry {
    pub fn new(engine: Arc<dyn SwarmEngine>, metadata_timeout: Duration) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            releasing: parking_lot::Mutex::new(HashMap::new()),
            engine,
            metadata_timeout,
        }
    }

    /// Returns the live transfer for the magnet's info hash, creating it and
    /// starting metadata acquisition if there is none.
    ///
    /// Never waits for the swarm. Callers wait on
    /// [`Transfer::wait_for_metadata`].
    pub async fn get_or_create(&self, magnet: &MagnetLink) -> Arc<Transfer> {
        let info_hash = magnet.info_hash;

        if let Some(transfer) = self.live(&*self.transfers.read().await, &info_hash) {
            return transfer;
        }

        let mut transfers = self.transfers.write().await;
        if let Some(transfer) = self.live(&transfers, &info_hash) {
            return transfer;
        }

        let transfer = Arc::new(Transfer::new(info_hash, magnet.display_name.clone()));
        transfers.insert(info_hash, Arc::clone(&transfer));
        let pending_release = self.releasing.lock().get(&info_hash).cloned();
        drop(transfers);

        tracing::info!(
            "Created transfer {info_hash} ({})",
            magnet.display_name.as_deref().unwrap_or("unnamed")
        );
        tokio::spawn(acquire_metadata(
            Arc::clone(&self.engine),
            Arc::clone(&transfer),
            magnet.clone(),
            self.metadata_timeout,
            pending_release,
        ));

        transfer
    }

    /// Looks up a live transfer.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - No live transfer for this info hash
    pub async fn get(&self, info_hash: &InfoHash) -> Result<Arc<Transfer>, TransferError> {
        self.live(&*self.transfers.read().await, info_hash)
            .ok_or(TransferError::TransferNotFound {
                info_hash: *info_hash,
            })
    }

    fn live(
        &self,
        transfers: &HashMap<InfoHash, Arc<Transfer>>,
        info_hash: &InfoHash,
    ) -> Option<Arc<Transfer>> {
        let transfer = transfers.get(info_hash)?;
        if transfer.state() == TransferState::Evicted {
            return None;
        }
        transfer.touch();
        Some(Arc::clone(transfer))
    }

    /// Evicts every transfer idle for at least `idle_threshold` with no
    /// reader attached and releases it from the swarm.
    ///
    /// Transfers with in-flight reads are left for a later pass. Returns the
    /// evicted info hashes.
    pub async fn sweep(&self, idle_threshold: Duration) -> Vec<InfoHash> {
        let mut releases = Vec::new();
        {
            let mut transfers = self.transfers.write().await;
            let now = Instant::now();

            let evicted: Vec<InfoHash> = transfers
                .iter()
                .filter(|(_, transfer)| transfer.try_evict(now, idle_threshold))
                .map(|(info_hash, _)| *info_hash)
                .collect();

            for info_hash in evicted {
                transfers.remove(&info_hash);
                let barrier = ReleaseBarrier::default();
                let held = Arc::clone(&barrier).lock_owned().await;
                self.releasing.lock().insert(info_hash, barrier);
                releases.push((info_hash, held));
            }
        }

        let mut evicted = Vec::with_capacity(releases.len());
        for (info_hash, held) in releases {
            if let Err(e) = self.engine.release(info_hash).await {
                tracing::warn!("Failed to release {info_hash} from the swarm: {e}");
            }
            self.releasing.lock().remove(&info_hash);
            drop(held);
            tracing::info!("Evicted idle transfer {info_hash}");
            evicted.push(info_hash);
        }

        evicted
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the registry is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_threshold: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.sweep(idle_threshold).await;
                tracing::debug!(
                    "Idle sweep evicted {} transfers, {} remain",
                    evicted.len(),
                    registry.len().await
                );
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transfers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_mocks::{MetadataBehavior, MockSwarm, SwarmCall};

    fn registry_with(mock: &MockSwarm, timeout: Duration) -> Arc<TransferRegistry> {
        Arc::new(TransferRegistry::new(Arc::new(mock.clone()), timeout))
    }

    #[tokio::test]
    async fn test_concurrent_creation_joins_once() {
        let mock = MockSwarm::new();
        let magnet = mock.add_torrent("movie", 1024, vec![("movie.mp4", vec![0; 4096])]);
        let registry = registry_with(&mock, Duration::from_secs(5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let magnet = magnet.clone();
                tokio::spawn(async move {
                    let transfer = registry.get_or_create(&magnet).await;
                    transfer.wait_for_metadata().await.map(|c| c.files.len())
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(mock.join_count(magnet.info_hash), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_ready_transfer_skips_every_file() {
        let mock = MockSwarm::new();
        let magnet = mock.add_torrent(
            "show",
            1000,
            vec![("show/a.mkv", vec![0; 2500]), ("show/a.srt", vec![0; 100])],
        );
        let registry = registry_with(&mock, Duration::from_secs(5));

        let transfer = registry.get_or_create(&magnet).await;
        transfer.wait_for_metadata().await.unwrap();

        assert_eq!(transfer.state(), TransferState::Ready);
        let calls = mock.calls();
        let position = |call: SwarmCall| calls.iter().position(|c| *c == call);
        let join = position(SwarmCall::Join(magnet.info_hash));
        let list = position(SwarmCall::ListFiles(magnet.info_hash));
        assert!(matches!((join, list), (Some(join), Some(list)) if join < list));
        assert_eq!(
            mock.priority_calls(magnet.info_hash),
            vec![
                (0, 0, 2, crate::engine::PriorityTier::Skip),
                (1, 2, 2, crate::engine::PriorityTier::Skip),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout_fails_transfer() {
        let mock = MockSwarm::new();
        mock.set_metadata_behavior(MetadataBehavior::Withhold);
        let magnet = mock.add_torrent("slow", 1024, vec![("slow.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(20));

        let transfer = registry.get_or_create(&magnet).await;
        let result = transfer.wait_for_metadata().await.map(|_| ());

        assert_eq!(
            result,
            Err(TransferError::MetadataTimeout {
                info_hash: magnet.info_hash,
                timeout: Duration::from_secs(20),
            })
        );
        assert_eq!(transfer.state(), TransferState::Failed);
        assert!(registry.get(&magnet.info_hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_join_failure_is_published() {
        let mock = MockSwarm::new();
        mock.fail_joins();
        let magnet = mock.add_torrent("broken", 1024, vec![("broken.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(5));

        let transfer = registry.get_or_create(&magnet).await;
        assert!(matches!(
            transfer.wait_for_metadata().await,
            Err(TransferError::SwarmFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_active_readers() {
        let mock = MockSwarm::new();
        let idle = mock.add_torrent("idle", 1024, vec![("idle.mp4", vec![0; 10])]);
        let busy = mock.add_torrent("busy", 1024, vec![("busy.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(5));

        registry.get_or_create(&idle).await;
        let busy_transfer = registry.get_or_create(&busy).await;
        let guard = busy_transfer.begin_read().unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let evicted = registry.sweep(Duration::from_secs(30 * 60)).await;

        assert_eq!(evicted, vec![idle.info_hash]);
        assert_eq!(mock.release_count(idle.info_hash), 1);
        assert!(matches!(
            registry.get(&idle.info_hash).await,
            Err(TransferError::TransferNotFound { .. })
        ));
        assert!(registry.get(&busy.info_hash).await.is_ok());

        drop(guard);
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(
            registry.sweep(Duration::from_secs(30 * 60)).await,
            vec![busy.info_hash]
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_after_eviction_joins_again() {
        let mock = MockSwarm::new();
        let magnet = mock.add_torrent("again", 1024, vec![("again.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(5));

        let first = registry.get_or_create(&magnet).await;
        first.wait_for_metadata().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        registry.sweep(Duration::from_secs(60)).await;
        assert_eq!(first.state(), TransferState::Evicted);

        let second = registry.get_or_create(&magnet).await;
        second.wait_for_metadata().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(mock.join_count(magnet.info_hash), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_release_leaves_lookups_unblocked() {
        let mock = MockSwarm::new();
        mock.delay_releases(Duration::from_secs(60));
        let idle = mock.add_torrent("idle", 1024, vec![("idle.mp4", vec![0; 10])]);
        let busy = mock.add_torrent("busy", 1024, vec![("busy.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(5));

        registry.get_or_create(&idle).await.wait_for_metadata().await.unwrap();
        let busy_transfer = registry.get_or_create(&busy).await;
        busy_transfer.wait_for_metadata().await.unwrap();
        let _guard = busy_transfer.begin_read().unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let sweeping = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.sweep(Duration::from_secs(30 * 60)).await }
        });
        while mock.release_count(idle.info_hash) == 0 {
            tokio::task::yield_now().await;
        }

        let lookup = tokio::time::timeout(Duration::from_secs(1), registry.get(&busy.info_hash)).await;
        assert!(matches!(lookup, Ok(Ok(_))));

        let again = registry.get_or_create(&idle).await;
        assert_eq!(mock.join_count(idle.info_hash), 1);

        assert_eq!(sweeping.await.unwrap(), vec![idle.info_hash]);
        again.wait_for_metadata().await.unwrap();
        assert_eq!(mock.join_count(idle.info_hash), 2);

        let calls = mock.calls();
        let released = calls
            .iter()
            .position(|call| *call == SwarmCall::Release(idle.info_hash));
        let rejoined = calls
            .iter()
            .rposition(|call| *call == SwarmCall::Join(idle.info_hash));
        assert!(matches!((released, rejoined), (Some(r), Some(j)) if r < j));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let mock = MockSwarm::new();
        let magnet = mock.add_torrent("timer", 1024, vec![("timer.mp4", vec![0; 10])]);
        let registry = registry_with(&mock, Duration::from_secs(5));
        registry.get_or_create(&magnet).await;

        let sweeper = registry.spawn_sweeper(Duration::from_secs(600), Duration::from_secs(1800));

        tokio::time::sleep(Duration::from_secs(1799)).await;
        assert_eq!(registry.len().await, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.is_empty().await);
        sweeper.abort();
    }
}
