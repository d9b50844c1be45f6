use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config;

use super::SourceError;

/// Reject downloads that are too small or that are actually HTML pages.
pub fn ensure_valid_video(path: &Path) -> Result<(), SourceError> {
    let size = std::fs::metadata(path)?.len();
    if size < config::MIN_VIDEO_BYTES {
        return Err(SourceError::TooSmall(size));
    }

    let mut head = Vec::with_capacity(config::HTML_SNIFF_BYTES);
    File::open(path)?
        .take(config::HTML_SNIFF_BYTES as u64)
        .read_to_end(&mut head)?;

    if looks_like_html(&head) {
        return Err(SourceError::UnexpectedHtml);
    }
    Ok(())
}

/// Case-insensitive doctype prefix or `<html` anywhere in `head`.
pub fn looks_like_html(head: &[u8]) -> bool {
    let lower = head.to_ascii_lowercase();
    let start = lower
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(lower.len());
    lower[start..].starts_with(b"<!doctype html") || contains(&lower, b"<html")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
