//! File classification by extension

use serde::Serialize;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "avi", "mov", "wmv", "flv", "ts", "m2ts", "mpg", "mpeg", "ogv",
    "3gp",
];

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub"];

/// Broad media class of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeClass {
    Video,
    Subtitle,
    Other,
}

/// Lowercased extension of the last path component.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classifies a file from its name alone.
///
/// Returns the class and the mime type to serve the file with.
pub fn classify(path: &str) -> (MimeClass, String) {
    let Some(ext) = extension(path) else {
        return (MimeClass::Other, "application/octet-stream".to_string());
    };

    if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        let mime = match ext.as_str() {
            "srt" => "text/x-subrip",
            "vtt" => "text/vtt",
            "ass" | "ssa" => "text/x-ssa",
            _ => "text/plain",
        };
        return (MimeClass::Subtitle, mime.to_string());
    }

    let guessed = mime_guess::from_ext(&ext).first();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        let mime = match guessed {
            Some(mime) if mime.type_() == mime_guess::mime::VIDEO => mime.to_string(),
            _ => video_mime_fallback(&ext).to_string(),
        };
        return (MimeClass::Video, mime);
    }

    let mime = guessed
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    (MimeClass::Other, mime)
}

fn video_mime_fallback(ext: &str) -> &'static str {
    match ext {
        "mkv" => "video/x-matroska",
        "ts" | "m2ts" => "video/mp2t",
        "3gp" => "video/3gpp",
        "ogv" => "video/ogg",
        _ => "video/mp4",
    }
}
