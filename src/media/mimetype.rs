use std::path::Path;
use anyhow::{Result, Context};

const GENERIC_MIME: &str = "application/octet-stream";

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .context("Failed to read file for mimetype detection")?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok(GENERIC_MIME.to_string()),
    }
}

/// Resolves the media type of in-memory content.
///
/// A specific declared type is trusted as-is; an empty or generic one falls
/// back to sniffing the leading bytes.
pub fn resolve_mimetype(declared: &str, bytes: &[u8]) -> String {
    let declared = declared.trim();
    if !declared.is_empty() && !declared.eq_ignore_ascii_case(GENERIC_MIME) {
        return declared.to_ascii_lowercase();
    }
    infer::get(bytes)
        .map(|k| k.mime_type().to_string())
        .unwrap_or_else(|| GENERIC_MIME.to_string())
}

pub fn is_video(mime: &str) -> bool {
    mime.to_ascii_lowercase().starts_with("video/")
}

/// File extension ffmpeg can use to pick a demuxer for a temp copy.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        "video/x-flv" => "flv",
        "video/mpeg" => "mpg",
        "video/x-m4v" => "m4v",
        _ => "bin",
    }
}
