//! Metadata acquisition for a newly created transfer.

use std::sync::Arc;
use std::time::Duration;

use super::registry::ReleaseBarrier;
use super::{Transfer, TransferContent, TransferError, TransferState};
use crate::engine::{PriorityTier, SwarmEngine, SwarmError, SwarmMetadata};
use crate::torrent::MagnetLink;

/// Joins the swarm and waits, bounded, for the file list.
///
/// A release of the same info hash still in flight is waited out first.
/// Publishes the outcome on the transfer so that every waiting request sees
/// the same result. This is the only place a transfer joins the swarm.
pub(super) async fn acquire_metadata(
    engine: Arc<dyn SwarmEngine>,
    transfer: Arc<Transfer>,
    magnet: MagnetLink,
    timeout: Duration,
    pending_release: Option<ReleaseBarrier>,
) {
    let info_hash = transfer.info_hash();
    if let Some(release) = pending_release {
        let _released = release.lock().await;
        tracing::debug!("Previous transfer {info_hash} released, joining again");
    }
    match fetch_content(engine.as_ref(), &transfer, &magnet, timeout).await {
        Ok(content) => {
            tracing::info!(
                "Transfer {info_hash} ready: \"{}\" with {} files",
                content.name,
                content.files.len()
            );
            transfer.mark_ready(content);
        }
        Err(e) => {
            tracing::warn!("Transfer {info_hash} failed: {e}");
            transfer.mark_failed(e);
        }
    }
}

async fn fetch_content(
    engine: &dyn SwarmEngine,
    transfer: &Transfer,
    magnet: &MagnetLink,
    timeout: Duration,
) -> Result<TransferContent, TransferError> {
    let info_hash = transfer.info_hash();

    transfer.set_state(TransferState::AwaitingMetadata);
    let metadata_rx = engine.on_metadata(info_hash).await?;
    engine.join(magnet).await?;

    let metadata = match tokio::time::timeout(timeout, metadata_rx).await {
        Ok(Ok(result)) => result?,
        Ok(Err(_)) => return Err(SwarmError::MetadataUnavailable { info_hash }.into()),
        Err(_) => return Err(TransferError::MetadataTimeout { info_hash, timeout }),
    };

    let files = engine.list_files(info_hash).await?;
    let content = TransferContent::from_metadata(&SwarmMetadata { files, ..metadata });

    // Nothing downloads until a file is selected.
    for file in &content.files {
        if let Some((first, last)) = file.piece_span(content.piece_length) {
            engine
                .set_priority(info_hash, file.index, first, last, PriorityTier::Skip)
                .await?;
        }
    }

    Ok(content)
}
