//! Actor implementation for the simulated swarm.

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::catalog::Catalog;
use super::commands::SwarmCommand;
use super::handle::SimulatedSwarmHandle;
use super::simulated::SimulatedSwarm;
use crate::config::SimulationConfig;

/// Spawns the simulated swarm actor and returns its handle.
///
/// The actor owns the swarm state, applies commands in order and advances
/// downloads on a fixed tick. Torrents in `catalog` deliver metadata after
/// the configured delay; any other info hash joins a swarm with no peers.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use streamflow_core::config::SimulationConfig;
/// use streamflow_core::engine::{Catalog, spawn_simulated_swarm};
///
/// let catalog = Catalog::from_directory("media".as_ref()).await.unwrap();
/// let handle = spawn_simulated_swarm(SimulationConfig::default(), catalog);
/// # }
/// ```
pub fn spawn_simulated_swarm(config: SimulationConfig, catalog: Catalog) -> SimulatedSwarmHandle {
    let (sender, receiver) = mpsc::channel(100);
    let tick_interval = config.tick_interval;
    let swarm = SimulatedSwarm::new(config, catalog);

    tokio::spawn(async move {
        run_actor_loop(swarm, receiver, tick_interval).await;
    });

    SimulatedSwarmHandle::new(sender)
}

/// Runs the actor loop until the channel closes or a shutdown arrives.
async fn run_actor_loop(
    mut swarm: SimulatedSwarm,
    mut receiver: mpsc::Receiver<SwarmCommand>,
    tick_interval: std::time::Duration,
) {
    tracing::debug!("Simulated swarm actor started");

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    break;
                };
                if !handle_command(&mut swarm, command) {
                    break;
                }
            }
            _ = ticker.tick() => {
                swarm.tick(Instant::now());
            }
        }
    }

    tracing::debug!("Simulated swarm actor stopped");
}

/// Handles a single command. Returns false to stop the actor.
fn handle_command(swarm: &mut SimulatedSwarm, command: SwarmCommand) -> bool {
    match command {
        SwarmCommand::Join { magnet, responder } => {
            swarm.join(&magnet);
            let _ = responder.send(());
        }

        SwarmCommand::SubscribeMetadata {
            info_hash,
            responder,
        } => {
            let _ = responder.send(swarm.subscribe(info_hash));
        }

        SwarmCommand::ListFiles {
            info_hash,
            responder,
        } => {
            let _ = responder.send(swarm.list_files(info_hash));
        }

        SwarmCommand::SetPriority {
            info_hash,
            file_index,
            piece_start,
            piece_end,
            tier,
            responder,
        } => {
            let result = swarm.set_priority(info_hash, file_index, piece_start, piece_end, tier);
            let _ = responder.send(result);
        }

        SwarmCommand::PlanRead {
            info_hash,
            file_index,
            start,
            end,
            responder,
        } => {
            let _ = responder.send(swarm.read_plan(info_hash, file_index, start, end));
        }

        SwarmCommand::Release {
            info_hash,
            responder,
        } => {
            let _ = responder.send(swarm.release(info_hash));
        }

        SwarmCommand::GetStats {
            info_hash,
            responder,
        } => {
            let _ = responder.send(swarm.stats(info_hash));
        }

        SwarmCommand::Shutdown { responder } => {
            let _ = responder.send(());
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;

    use super::*;
    use crate::engine::{PriorityTier, SwarmEngine, SwarmError};
    use crate::torrent::MagnetParser;

    fn catalog_with_movie(data: Vec<u8>) -> (Catalog, String) {
        let mut catalog = Catalog::new();
        let info_hash = catalog.insert_memory(
            "Movie",
            [
                ("Movie/movie.mp4".to_string(), Bytes::from(data)),
                ("Movie/movie.srt".to_string(), Bytes::from_static(b"1\n")),
            ],
        );
        let magnet = catalog.get(&info_hash).unwrap().magnet_uri();
        (catalog, magnet)
    }

    #[tokio::test]
    async fn test_metadata_then_full_read() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (catalog, magnet) = catalog_with_movie(data.clone());
        let handle = spawn_simulated_swarm(SimulationConfig::deterministic_testing(), catalog);
        let magnet = MagnetParser::parse_magnet_link(&magnet).unwrap();

        let metadata_rx = handle.on_metadata(magnet.info_hash).await.unwrap();
        handle.join(&magnet).await.unwrap();
        let metadata = metadata_rx.await.unwrap().unwrap();
        assert_eq!(metadata.name, "Movie");
        assert_eq!(metadata.files.len(), 2);

        let mut stream = handle
            .read_range(magnet.info_hash, 0, 0, 99_999)
            .await
            .unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
        {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, data);

        let stats = handle.stats(magnet.info_hash).await.unwrap();
        assert_eq!(stats.length, 100_002);
    }

    #[tokio::test]
    async fn test_priority_and_release_round_trip() {
        let (catalog, magnet) = catalog_with_movie(vec![7; 40_000]);
        let handle = spawn_simulated_swarm(SimulationConfig::deterministic_testing(), catalog);
        let magnet = MagnetParser::parse_magnet_link(&magnet).unwrap();

        let metadata_rx = handle.on_metadata(magnet.info_hash).await.unwrap();
        handle.join(&magnet).await.unwrap();
        metadata_rx.await.unwrap().unwrap();

        handle
            .set_priority(magnet.info_hash, 0, 0, 2, PriorityTier::Critical)
            .await
            .unwrap();
        assert!(matches!(
            handle
                .set_priority(magnet.info_hash, 5, 0, 0, PriorityTier::Normal)
                .await,
            Err(SwarmError::InvalidFile { .. })
        ));

        handle.release(magnet.info_hash).await.unwrap();
        assert!(matches!(
            handle.stats(magnet.info_hash).await,
            Err(SwarmError::UnknownTorrent { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let handle = spawn_simulated_swarm(SimulationConfig::deterministic_testing(), Catalog::new());
        handle.shutdown().await.unwrap();

        let result = handle.stats(crate::torrent::InfoHash::new([0; 20])).await;
        assert_eq!(result, Err(SwarmError::EngineShutdown));
    }
}
