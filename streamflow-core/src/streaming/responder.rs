//! Range streaming of a selected file.
//!
//! Turns a `Range` header into priority hints plus exactly one engine read
//! and frames the result as a full or partial response.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use super::range::{ByteRange, parse_range_header};
use super::scheduler::SelectionScheduler;
use crate::engine::{ByteStream, SwarmEngine};
use crate::transfer::{ReadGuard, Transfer, TransferError};

/// Whether the response carries the whole file or a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// 200
    Full,
    /// 206
    Partial,
}

/// A framed file response ready to be written to the client.
pub struct FileStream {
    pub status: StreamStatus,
    pub content_type: String,
    /// Exact number of body bytes
    pub content_length: u64,
    /// Total file length
    pub file_length: u64,
    /// Served range for partial responses
    pub range: Option<ByteRange>,
    pub body: InFlightStream,
}

impl FileStream {
    /// `Content-Range` header value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|range| range.content_range(self.file_length))
    }
}

/// Body stream that keeps its transfer marked as being read.
///
/// Dropping it, for example on client disconnect, drops the engine read and
/// releases the in-flight registration.
pub struct InFlightStream {
    inner: ByteStream,
    _guard: ReadGuard,
}

impl InFlightStream {
    fn new(inner: ByteStream, guard: ReadGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl Stream for InFlightStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx).map(|item| {
            item.map(|chunk| {
                chunk.map_err(|e| {
                    tracing::warn!("Stream read failed mid-body: {e}");
                    std::io::Error::other(e)
                })
            })
        })
    }
}

/// Serves byte ranges of transfer files.
pub struct RangeResponder {
    engine: Arc<dyn SwarmEngine>,
    scheduler: Arc<SelectionScheduler>,
}

impl RangeResponder {
    pub fn new(engine: Arc<dyn SwarmEngine>, scheduler: Arc<SelectionScheduler>) -> Self {
        Self { engine, scheduler }
    }

    /// Streams a file of a ready transfer, honoring an optional `Range` header.
    ///
    /// Selects the file if another one is selected and raises the critical
    /// window at the start of the requested range. The body reads nothing
    /// ahead of its consumer.
    ///
    /// # Errors
    /// - `TransferError::TransferNotFound` - Transfer was evicted
    /// - `TransferError::NotReady` - Transfer has no file list yet
    /// - `TransferError::FileNotFound` - Index is out of range
    /// - `TransferError::UnsatisfiableRange` - Range cannot be served
    /// - `TransferError::SwarmFailure` - Engine rejected the read or a priority change
    pub async fn stream(
        &self,
        transfer: &Arc<Transfer>,
        file_index: usize,
        range_header: Option<&str>,
    ) -> Result<FileStream, TransferError> {
        let guard = transfer.begin_read()?;
        let file = transfer.file(file_index)?;
        let length = file.length;

        let range = range_header
            .map(|header| parse_range_header(header, length))
            .transpose()?;
        let (status, span) = match range {
            Some(range) => (StreamStatus::Partial, Some(range)),
            None if length == 0 => (StreamStatus::Full, None),
            None => (
                StreamStatus::Full,
                Some(ByteRange {
                    start: 0,
                    end: length - 1,
                }),
            ),
        };

        let Some(span) = span else {
            self.scheduler.select(transfer, file_index).await?;
            return Ok(FileStream {
                status,
                content_type: file.mime_type.clone(),
                content_length: 0,
                file_length: 0,
                range: None,
                body: InFlightStream::new(Box::pin(futures::stream::empty()), guard),
            });
        };

        self.scheduler
            .prioritize_window(transfer, file_index, span.start)
            .await?;
        let inner = self
            .engine
            .read_range(transfer.info_hash(), file_index, span.start, span.end)
            .await?;

        tracing::debug!(
            "Streaming {} bytes {}-{} of {} file {file_index}",
            if status == StreamStatus::Partial { "range" } else { "full" },
            span.start,
            span.end,
            transfer.info_hash()
        );

        Ok(FileStream {
            status,
            content_type: file.mime_type.clone(),
            content_length: span.content_length(),
            file_length: length,
            range,
            body: InFlightStream::new(inner, guard),
        })
    }
}
