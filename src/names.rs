//! Filename hygiene and user-facing error message redaction.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const MAX_FILENAME_LEN: usize = 200;
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace filesystem-hostile characters, trim stray dots/spaces and cap the
/// length. Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    cleaned = cleaned.trim_matches(|c| c == ' ' || c == '.').to_string();
    if cleaned.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// First free path of the form `dir/base.ext`, `dir/base_1.ext`, ...
pub fn unique_output_path(dir: &Path, base: &str, extension: &str) -> PathBuf {
    let base = sanitize_filename(base);
    let mut candidate = dir.join(format!("{base}.{extension}"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{base}_{counter}.{extension}"));
        counter += 1;
    }
    candidate
}

const THUMBNAIL_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png"];

/// Remove thumbnail sidecar files yt-dlp leaves next to the media file.
pub fn cleanup_thumbnails(dir: &Path, base: Option<&str>) {
    if let Some(base) = base {
        let base = sanitize_filename(base);
        for ext in THUMBNAIL_EXTENSIONS {
            for name in [
                format!("{base}.{ext}"),
                format!("{base}.thumb.{ext}"),
                format!("{base}.thumbnail.{ext}"),
                format!("{base}_thumb.{ext}"),
            ] {
                let path = dir.join(name);
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_thumbnail = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| THUMBNAIL_EXTENSIONS.iter().any(|t| *t == e));
        if is_thumbnail {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn path_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"[A-Za-z]:\\[^\s]*").expect("windows path pattern"),
            Regex::new(r"/home/[^\s]*").expect("home path pattern"),
            Regex::new(r"/tmp/[^\s]*").expect("tmp path pattern"),
            Regex::new(r"/[A-Za-z][^\s]*/[^\s]*").expect("unix path pattern"),
        ]
    })
}

/// Map raw tool/OS errors to a short user-facing message with filesystem
/// paths stripped out.
pub fn redact_error_message(raw: &str) -> String {
    const FRIENDLY: &[(&str, &str)] = &[
        ("permission denied", "Access denied. Please check folder permissions."),
        (
            "no space left on device",
            "Insufficient disk space. Please free up some space.",
        ),
        (
            "connection refused",
            "Network connection failed. Please check your internet connection.",
        ),
        ("timed out", "Operation timed out. Please try again."),
        ("timeout", "Operation timed out. Please try again."),
        ("file not found", "The requested file could not be found."),
        ("invalid url", "The provided URL is not valid."),
        ("yt-dlp", "Download tool error. Please try again."),
        ("ffmpeg", "Media processing error. Please try again."),
    ];

    let lower = raw.to_lowercase();
    for (needle, friendly) in FRIENDLY {
        if lower.contains(needle) {
            return (*friendly).to_string();
        }
    }

    let mut redacted = raw.to_string();
    for pattern in path_patterns() {
        redacted = pattern.replace_all(&redacted, "[PATH]").into_owned();
    }
    redacted
}
