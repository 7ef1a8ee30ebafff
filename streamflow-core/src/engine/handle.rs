//! Handle for communicating with the simulated swarm actor.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::commands::SwarmCommand;
use super::{
    ByteStream, EngineFile, MetadataReceiver, PriorityTier, SwarmEngine, SwarmError, SwarmStats,
};
use crate::torrent::{InfoHash, MagnetLink};

/// Handle for communicating with the simulated swarm actor.
///
/// Cheap to clone and shared across tasks. Every operation becomes a command
/// with a oneshot reply; a closed channel means the actor has stopped.
#[derive(Clone)]
pub struct SimulatedSwarmHandle {
    sender: mpsc::Sender<SwarmCommand>,
}

impl SimulatedSwarmHandle {
    /// Creates a new handle with the given command sender.
    pub(crate) fn new(sender: mpsc::Sender<SwarmCommand>) -> Self {
        Self { sender }
    }

    /// Sends a command built around a fresh responder and waits for the reply.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SwarmCommand,
    ) -> Result<T, SwarmError> {
        let (responder, rx) = oneshot::channel();

        self.sender
            .send(command(responder))
            .await
            .map_err(|_| SwarmError::EngineShutdown)?;

        rx.await.map_err(|_| SwarmError::EngineShutdown)
    }

    /// Shuts down the actor. Later calls fail with `SwarmError::EngineShutdown`.
    pub async fn shutdown(&self) -> Result<(), SwarmError> {
        self.request(|responder| SwarmCommand::Shutdown { responder })
            .await
    }
}

#[async_trait]
impl SwarmEngine for SimulatedSwarmHandle {
    async fn join(&self, magnet: &MagnetLink) -> Result<(), SwarmError> {
        let magnet = magnet.clone();
        self.request(|responder| SwarmCommand::Join { magnet, responder })
            .await
    }

    async fn on_metadata(&self, info_hash: InfoHash) -> Result<MetadataReceiver, SwarmError> {
        self.request(|responder| SwarmCommand::SubscribeMetadata {
            info_hash,
            responder,
        })
        .await
    }

    async fn list_files(&self, info_hash: InfoHash) -> Result<Vec<EngineFile>, SwarmError> {
        self.request(|responder| SwarmCommand::ListFiles {
            info_hash,
            responder,
        })
        .await?
    }

    async fn set_priority(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
    ) -> Result<(), SwarmError> {
        self.request(|responder| SwarmCommand::SetPriority {
            info_hash,
            file_index,
            piece_start,
            piece_end,
            tier,
            responder,
        })
        .await?
    }

    async fn read_range(
        &self,
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, SwarmError> {
        let plan = self
            .request(|responder| SwarmCommand::PlanRead {
                info_hash,
                file_index,
                start,
                end,
                responder,
            })
            .await??;
        Ok(plan.into_stream())
    }

    async fn release(&self, info_hash: InfoHash) -> Result<(), SwarmError> {
        self.request(|responder| SwarmCommand::Release {
            info_hash,
            responder,
        })
        .await?
    }

    async fn stats(&self, info_hash: InfoHash) -> Result<SwarmStats, SwarmError> {
        self.request(|responder| SwarmCommand::GetStats {
            info_hash,
            responder,
        })
        .await?
    }
}
