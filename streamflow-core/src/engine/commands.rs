//! Command definitions for the simulated swarm actor.

use tokio::sync::oneshot;

use super::simulated::ReadPlan;
use super::{EngineFile, MetadataReceiver, PriorityTier, SwarmError, SwarmStats};
use crate::torrent::{InfoHash, MagnetLink};

/// Commands that can be sent to the simulated swarm actor.
///
/// Each command carries a response channel for the result. The actor owns
/// all swarm state, so commands are applied one at a time.
pub(crate) enum SwarmCommand {
    Join {
        magnet: MagnetLink,
        responder: oneshot::Sender<()>,
    },
    SubscribeMetadata {
        info_hash: InfoHash,
        responder: oneshot::Sender<MetadataReceiver>,
    },
    ListFiles {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<Vec<EngineFile>, SwarmError>>,
    },
    SetPriority {
        info_hash: InfoHash,
        file_index: usize,
        piece_start: u32,
        piece_end: u32,
        tier: PriorityTier,
        responder: oneshot::Sender<Result<(), SwarmError>>,
    },
    /// Resolves the pieces and source a read needs; the read itself runs in
    /// the caller's task.
    PlanRead {
        info_hash: InfoHash,
        file_index: usize,
        start: u64,
        end: u64,
        responder: oneshot::Sender<Result<ReadPlan, SwarmError>>,
    },
    Release {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<(), SwarmError>>,
    },
    GetStats {
        info_hash: InfoHash,
        responder: oneshot::Sender<Result<SwarmStats, SwarmError>>,
    },
    /// Stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}
