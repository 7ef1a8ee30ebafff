//! Selection scheduling, range streaming and subtitle normalization.
//!
//! [`SelectionScheduler`] decides which pieces the swarm fetches,
//! [`RangeResponder`] turns HTTP ranges into engine reads and
//! [`subtitles`] converts subtitle files into a format browsers render.

pub mod range;
pub mod responder;
pub mod scheduler;
pub mod subtitles;

pub use range::{ByteRange, parse_range_header};
pub use responder::{FileStream, InFlightStream, RangeResponder, StreamStatus};
pub use scheduler::{SelectionScheduler, critical_window};
pub use subtitles::{Subtitle, SubtitleFormat, normalize, srt_to_webvtt};
