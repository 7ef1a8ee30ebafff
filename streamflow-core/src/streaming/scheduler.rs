//! Exclusive file selection and critical-window prioritization
//!
//! Only the selected file of a transfer downloads. Changing the selection
//! deselects the previous file and selects the new one back to back under
//! the transfer's selection lock. Pieces right ahead of the playback offset
//! are raised to [`PriorityTier::Critical`].

use std::sync::Arc;

use crate::engine::{PriorityTier, SwarmEngine};
use crate::torrent::InfoHash;
use crate::transfer::{CriticalWindow, FileEntry, Selection, Transfer, TransferError};

/// Pieces to raise for playback at `offset` bytes into `file`.
///
/// Covers `floor((file.offset + offset) / P)` through that piece plus
/// `ceil(window_bytes / P)`, clamped to the file's last piece. Returns `None`
/// when the offset is past the end of the file.
pub fn critical_window(
    file: &FileEntry,
    piece_length: u32,
    offset: u64,
    window_bytes: u64,
) -> Option<CriticalWindow> {
    if offset >= file.length {
        return None;
    }
    let (_, file_last) = file.piece_span(piece_length)?;
    let piece_length = u64::from(piece_length);

    let first_piece = ((file.offset + offset) / piece_length) as u32;
    let span = window_bytes.div_ceil(piece_length).min(u64::from(u32::MAX)) as u32;
    let last_piece = first_piece.saturating_add(span).min(file_last);

    Some(CriticalWindow {
        file_index: file.index,
        first_piece,
        last_piece,
    })
}

/// Drives file selection and piece priorities for transfers.
pub struct SelectionScheduler {
    engine: Arc<dyn SwarmEngine>,
    critical_window_bytes: u64,
}

impl SelectionScheduler {
    pub fn new(engine: Arc<dyn SwarmEngine>, critical_window_bytes: u64) -> Self {
        Self {
            engine,
            critical_window_bytes,
        }
    }

    /// Makes `file_index` the only selected file of the transfer.
    ///
    /// No-op if it is already selected.
    ///
    /// # Errors
    /// - `TransferError::NotReady` - Transfer has no file list yet
    /// - `TransferError::FileNotFound` - Index is out of range
    /// - `TransferError::SwarmFailure` - Engine rejected a priority change
    pub async fn select(&self, transfer: &Transfer, file_index: usize) -> Result<(), TransferError> {
        transfer.file(file_index)?;
        let mut selection = transfer.selection().lock().await;
        self.select_locked(transfer, &mut selection, file_index)
            .await
    }

    /// Raises the critical window around `offset`, selecting the file first
    /// if needed.
    ///
    /// No-op when `offset` falls inside the window last raised for this file.
    ///
    /// # Errors
    /// - `TransferError::NotReady` - Transfer has no file list yet
    /// - `TransferError::FileNotFound` - Index is out of range
    /// - `TransferError::SwarmFailure` - Engine rejected a priority change
    pub async fn prioritize_window(
        &self,
        transfer: &Transfer,
        file_index: usize,
        offset: u64,
    ) -> Result<(), TransferError> {
        let content = transfer.content()?;
        let file = transfer.file(file_index)?;
        let info_hash = transfer.info_hash();

        let mut selection = transfer.selection().lock().await;
        self.select_locked(transfer, &mut selection, file_index)
            .await?;

        let Some(window) =
            critical_window(file, content.piece_length, offset, self.critical_window_bytes)
        else {
            return Ok(());
        };

        if let Some(current) = selection.window {
            let offset_piece = ((file.offset + offset) / u64::from(content.piece_length)) as u32;
            if current.file_index == file_index && current.contains(offset_piece) {
                return Ok(());
            }
            selection.window = None;
            self.set_window(info_hash, current, PriorityTier::Normal)
                .await?;
        }

        self.set_window(info_hash, window, PriorityTier::Critical)
            .await?;
        selection.window = Some(window);
        tracing::debug!(
            "Critical window for {info_hash} file {file_index}: pieces {}..={}",
            window.first_piece,
            window.last_piece
        );
        Ok(())
    }

    /// Lets a file that is not selected download at baseline priority while
    /// it is read in full. Returns whether priorities were changed.
    ///
    /// Until [`lower_transient`](Self::lower_transient) runs, two files of the
    /// transfer are above `Skip`: the selected one and this one. The selection
    /// itself does not change.
    pub(crate) async fn raise_transient(
        &self,
        transfer: &Transfer,
        file: &FileEntry,
        piece_length: u32,
    ) -> Result<bool, TransferError> {
        let selection = transfer.selection().lock().await;
        if selection.selected == Some(file.index) {
            return Ok(false);
        }
        let Some((first, last)) = file.piece_span(piece_length) else {
            return Ok(false);
        };
        self.engine
            .set_priority(
                transfer.info_hash(),
                file.index,
                first,
                last,
                PriorityTier::Normal,
            )
            .await?;
        Ok(true)
    }

    /// Undoes [`raise_transient`](Self::raise_transient) unless the file has
    /// been selected in the meantime.
    pub(crate) async fn lower_transient(
        &self,
        transfer: &Transfer,
        file: &FileEntry,
        piece_length: u32,
    ) -> Result<(), TransferError> {
        let selection = transfer.selection().lock().await;
        if selection.selected == Some(file.index) {
            return Ok(());
        }
        let Some((first, last)) = file.piece_span(piece_length) else {
            return Ok(());
        };
        self.engine
            .set_priority(
                transfer.info_hash(),
                file.index,
                first,
                last,
                PriorityTier::Skip,
            )
            .await?;
        Ok(())
    }

    async fn select_locked(
        &self,
        transfer: &Transfer,
        selection: &mut Selection,
        file_index: usize,
    ) -> Result<(), TransferError> {
        if selection.selected == Some(file_index) {
            return Ok(());
        }

        let content = transfer.content()?;
        let info_hash = transfer.info_hash();

        if let Some(previous) = selection.selected {
            let previous = transfer.file(previous)?;
            self.set_file(info_hash, previous, content.piece_length, PriorityTier::Skip)
                .await?;
            selection.selected = None;
            selection.window = None;
        }

        let file = transfer.file(file_index)?;
        self.set_file(info_hash, file, content.piece_length, PriorityTier::Normal)
            .await?;
        selection.selected = Some(file_index);

        tracing::debug!("Selected file {file_index} ({}) of {info_hash}", file.name);
        Ok(())
    }

    async fn set_file(
        &self,
        info_hash: InfoHash,
        file: &FileEntry,
        piece_length: u32,
        tier: PriorityTier,
    ) -> Result<(), TransferError> {
        if let Some((first, last)) = file.piece_span(piece_length) {
            self.engine
                .set_priority(info_hash, file.index, first, last, tier)
                .await?;
        }
        Ok(())
    }

    async fn set_window(
        &self,
        info_hash: InfoHash,
        window: CriticalWindow,
        tier: PriorityTier,
    ) -> Result<(), TransferError> {
        self.engine
            .set_priority(
                info_hash,
                window.file_index,
                window.first_piece,
                window.last_piece,
                tier,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MimeClass;

    fn file(index: usize, offset: u64, length: u64) -> FileEntry {
        FileEntry {
            index,
            name: "f.mp4".to_string(),
            path: "f.mp4".to_string(),
            length,
            offset,
            mime_class: MimeClass::Video,
            mime_type: "video/mp4".to_string(),
        }
    }

    #[test]
    fn test_window_covers_ceil_of_window_bytes() {
        let file = file(0, 0, 100_000);
        let window = critical_window(&file, 1000, 2500, 2500).unwrap();
        assert_eq!((window.first_piece, window.last_piece), (2, 5));
    }

    #[test]
    fn test_window_clamps_to_last_piece_of_file() {
        let file = file(1, 1500, 3000);
        let window = critical_window(&file, 1000, 2900, 20_000).unwrap();
        assert_eq!((window.first_piece, window.last_piece), (4, 4));
        assert_eq!(window.file_index, 1);
    }

    #[test]
    fn test_window_uses_torrent_global_pieces() {
        let file = file(2, 10_000, 50_000);
        let window = critical_window(&file, 4096, 0, 4096).unwrap();
        assert_eq!((window.first_piece, window.last_piece), (2, 3));
    }

    #[test]
    fn test_no_window_past_end_of_file() {
        assert!(critical_window(&file(0, 0, 10), 1000, 10, 1000).is_none());
        assert!(critical_window(&file(0, 0, 0), 1000, 0, 1000).is_none());
    }
}
