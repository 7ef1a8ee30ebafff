//! Subtitle retrieval and SRT to WebVTT conversion
//!
//! Browsers only render WebVTT text tracks, so SubRip files are rewritten on
//! the fly: timestamps get a period before the milliseconds and SubRip's
//! `{\b}`-style override codes become `<b>`-style tags.

use std::sync::{Arc, LazyLock};

use futures::StreamExt;
use regex::{Captures, Regex};

use super::scheduler::SelectionScheduler;
use crate::engine::{SwarmEngine, SwarmError};
use crate::transfer::{MimeClass, Transfer, TransferError, media};

/// Content type of converted SubRip files.
pub const WEBVTT_CONTENT_TYPE: &str = "text/vtt; charset=utf-8";

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})").expect("timestamp pattern compiles")
});

static STYLE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\\([biu])([01]?)\}").expect("style code pattern compiles"));

/// Subtitle formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Ass,
    Ssa,
    Sub,
}

impl SubtitleFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        match media::extension(path)?.as_str() {
            "srt" => Some(Self::Srt),
            "vtt" => Some(Self::Vtt),
            "ass" => Some(Self::Ass),
            "ssa" => Some(Self::Ssa),
            "sub" => Some(Self::Sub),
            _ => None,
        }
    }

    /// Content type the normalized text is served with.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Srt | Self::Vtt => WEBVTT_CONTENT_TYPE,
            Self::Ass | Self::Ssa => "text/x-ssa; charset=utf-8",
            Self::Sub => "text/plain; charset=utf-8",
        }
    }
}

/// Normalized subtitle text with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    pub text: String,
    pub content_type: &'static str,
}

/// Normalizes raw subtitle bytes. Invalid UTF-8 is replaced, never rejected.
pub fn normalize(format: SubtitleFormat, bytes: &[u8]) -> Subtitle {
    let text = String::from_utf8_lossy(bytes);
    let text = match format {
        SubtitleFormat::Srt => srt_to_webvtt(&text),
        _ => text.into_owned(),
    };
    Subtitle {
        text,
        content_type: format.content_type(),
    }
}

/// Converts SubRip text to WebVTT.
///
/// # Examples
/// ```
/// use streamflow_core::streaming::subtitles::srt_to_webvtt;
///
/// let vtt = srt_to_webvtt("1\r\n00:00:01,000 --> 00:00:02,500\r\n{\\i}Hi{\\i}\r\n");
/// assert_eq!(vtt, "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.500\n<i>Hi</i>\n");
/// ```
pub fn srt_to_webvtt(input: &str) -> String {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let input = input.replace("\r\n", "\n").replace('\r', "\n");

    let mut cues: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in input.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                cues.push(convert_cue(&current));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        cues.push(convert_cue(&current));
    }

    let mut output = String::from("WEBVTT\n");
    for cue in cues {
        output.push('\n');
        for line in cue {
            output.push_str(&line);
            output.push('\n');
        }
    }
    output
}

/// Rewrites one cue, closing any style left open at its end.
fn convert_cue(lines: &[&str]) -> Vec<String> {
    let mut open: Vec<char> = Vec::new();
    let mut converted: Vec<String> = lines
        .iter()
        .map(|line| {
            if line.contains("-->") {
                rewrite_timestamps(line)
            } else {
                rewrite_styles(line, &mut open)
            }
        })
        .collect();

    if let Some(last) = converted.last_mut() {
        while let Some(tag) = open.pop() {
            last.push_str(&format!("</{tag}>"));
        }
    }
    converted
}

fn rewrite_timestamps(line: &str) -> String {
    TIMESTAMP
        .replace_all(line, |caps: &Captures<'_>| {
            format!(
                "{:0>2}:{}:{}.{:0<3}",
                &caps[1], &caps[2], &caps[3], &caps[4]
            )
        })
        .into_owned()
}

/// `{\x}` toggles, `{\x1}` opens and `{\x0}` closes; redundant codes vanish.
fn rewrite_styles(line: &str, open: &mut Vec<char>) -> String {
    STYLE_CODE
        .replace_all(line, |caps: &Captures<'_>| {
            let tag = caps[1].chars().next().unwrap_or('i');
            let is_open = open.contains(&tag);
            let (opens, closes) = match &caps[2] {
                "1" => (!is_open, false),
                "0" => (false, is_open),
                _ => (!is_open, is_open),
            };

            if opens {
                open.push(tag);
                format!("<{tag}>")
            } else if closes {
                open.retain(|t| *t != tag);
                format!("</{tag}>")
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Reads a subtitle file in full and normalizes it.
///
/// A file that is not selected downloads at baseline priority for the
/// duration of the read only; the transfer's selection is left untouched.
/// During that read the one-file-downloading rule is relaxed to the selected
/// file plus this subtitle.
///
/// # Errors
/// - `TransferError::TransferNotFound` - Transfer was evicted
/// - `TransferError::NotReady` - Transfer has no file list yet
/// - `TransferError::FileNotFound` - Index is out of range or not a subtitle
/// - `TransferError::ReadFailure` - Engine read failed
pub async fn fetch_subtitle(
    engine: &dyn SwarmEngine,
    scheduler: &SelectionScheduler,
    transfer: &Arc<Transfer>,
    file_index: usize,
) -> Result<Subtitle, TransferError> {
    let _guard = transfer.begin_read()?;
    let piece_length = transfer.content()?.piece_length;
    let file = transfer.file(file_index)?;
    let not_subtitle = || TransferError::FileNotFound {
        info_hash: transfer.info_hash(),
        file_index,
    };
    if file.mime_class != MimeClass::Subtitle {
        return Err(not_subtitle());
    }
    let format = SubtitleFormat::from_path(&file.path).ok_or_else(not_subtitle)?;

    if file.length == 0 {
        return Ok(normalize(format, &[]));
    }

    let raised = scheduler
        .raise_transient(transfer, file, piece_length)
        .await?;
    let bytes = read_all(engine, transfer, file_index, file.length).await;
    if raised && let Err(e) = scheduler.lower_transient(transfer, file, piece_length).await {
        tracing::warn!(
            "Failed to restore priority of subtitle {file_index} in {}: {e}",
            transfer.info_hash()
        );
    }

    Ok(normalize(format, &bytes?))
}

async fn read_all(
    engine: &dyn SwarmEngine,
    transfer: &Transfer,
    file_index: usize,
    length: u64,
) -> Result<Vec<u8>, TransferError> {
    let read_failure = |e: SwarmError| TransferError::ReadFailure {
        reason: e.to_string(),
    };

    let mut stream = engine
        .read_range(transfer.info_hash(), file_index, 0, length - 1)
        .await
        .map_err(read_failure)?;

    let mut bytes = Vec::with_capacity(length as usize);
    while let Some(chunk) = stream.next().await {
        bytes.extend_from_slice(&chunk.map_err(read_failure)?);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_conversion() {
        let srt = "\u{feff}1\r\n00:01:02,500 --> 00:01:05,000\r\n{\\i}Hello there{\\i}\r\n\r\n2\r\n0:01:06,000 --> 0:01:08,000\r\n{\\b1}Bold{\\b0} and {\\u}open\r\nsecond line\r\n";
        let expected = "WEBVTT\n\n1\n00:01:02.500 --> 00:01:05.000\n<i>Hello there</i>\n\n2\n00:01:06.000 --> 00:01:08.000\n<b>Bold</b> and <u>open\nsecond line</u>\n";

        assert_eq!(srt_to_webvtt(srt), expected);
        assert_eq!(srt_to_webvtt(srt), srt_to_webvtt(srt));
    }

    #[test]
    fn test_timestamps_only_rewritten_on_timing_lines() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nMeet me at 10:00:00,000\n";
        let vtt = srt_to_webvtt(srt);
        assert!(vtt.contains("00:00:01.000 --> 00:00:02.000"));
        assert!(vtt.contains("Meet me at 10:00:00,000"));
    }

    #[test]
    fn test_redundant_style_codes_are_dropped() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\n{\\b0}plain{\\b1}{\\b1}bold\n";
        assert!(srt_to_webvtt(srt).ends_with("plain<b>bold</b>\n"));
    }

    #[test]
    fn test_extra_blank_lines_collapse() {
        let srt = "\n\n1\n00:00:01,000 --> 00:00:02,000\nA\n\n\n\n2\n00:00:03,000 --> 00:00:04,000\nB\n\n";
        assert_eq!(
            srt_to_webvtt(srt),
            "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nA\n\n2\n00:00:03.000 --> 00:00:04.000\nB\n"
        );
    }

    #[test]
    fn test_other_formats_pass_through() {
        let ass = b"[Script Info]\nTitle: x\n";
        let subtitle = normalize(SubtitleFormat::Ass, ass);
        assert_eq!(subtitle.text, "[Script Info]\nTitle: x\n");
        assert_eq!(subtitle.content_type, "text/x-ssa; charset=utf-8");

        let vtt = normalize(SubtitleFormat::Vtt, b"WEBVTT\n\n");
        assert_eq!(vtt.text, "WEBVTT\n\n");
        assert_eq!(vtt.content_type, WEBVTT_CONTENT_TYPE);
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let subtitle = normalize(SubtitleFormat::Srt, b"1\n00:00:01,000 --> 00:00:02,000\n\xffok\n");
        assert!(subtitle.text.ends_with("\u{fffd}ok\n"));
    }

    #[test]
    fn test_patterns_compile() {
        assert!(TIMESTAMP.is_match("0:01:06,000"));
        assert!(STYLE_CODE.is_match("{\\b1}"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(SubtitleFormat::from_path("a/b.SRT"), Some(SubtitleFormat::Srt));
        assert_eq!(SubtitleFormat::from_path("a/b.mp4"), None);
    }
}
