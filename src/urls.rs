//! URL validation and playlist probing.

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::paths::AppPaths;
use crate::{cmd, EngineError, Result};

const MAX_URL_LEN: usize = 2048;
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtu.be",
    "www.youtu.be",
];

// URLs end up on a tool command line; reject anything shell-flavored
// outright rather than trying to quote it.
const FORBIDDEN_SEQUENCES: &[&str] = &[
    ";", "|", "`", "$", "(", ")", "{", "}", "[", "]", ">", "<",
];

/// Validate a user-supplied URL and return it in trimmed form.
pub fn sanitize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidUrl("URL is empty".to_string()));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(EngineError::InvalidUrl(format!(
            "URL is too long (maximum {MAX_URL_LEN} characters)"
        )));
    }
    for seq in FORBIDDEN_SEQUENCES {
        if trimmed.contains(seq) {
            return Err(EngineError::InvalidUrl(format!(
                "URL contains forbidden sequence: {seq}"
            )));
        }
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| EngineError::InvalidUrl(format!("malformed URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::InvalidUrl(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| EngineError::InvalidUrl("URL has no host".to_string()))?;
    if !YOUTUBE_HOSTS.iter().any(|h| *h == host) {
        return Err(EngineError::InvalidUrl(format!(
            "unsupported host: {host}"
        )));
    }

    if host.contains("youtube.com") {
        let has_id = parsed
            .query_pairs()
            .any(|(key, _)| key == "v" || key == "list");
        if !has_id {
            return Err(EngineError::InvalidUrl(
                "YouTube URL must contain a video or playlist id".to_string(),
            ));
        }
    } else if parsed.path().len() < 2 {
        return Err(EngineError::InvalidUrl(
            "short URL is missing the video id".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

pub fn is_valid_url(raw: &str) -> bool {
    sanitize_url(raw).is_ok()
}

#[derive(Debug, Clone)]
pub struct PlaylistVideo {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct PlaylistProbe {
    pub video_count: usize,
    pub playlist_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylistDump {
    title: Option<String>,
    webpage_url: Option<String>,
    entries: Option<Vec<Option<FlatPlaylistEntry>>>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylistEntry {
    url: Option<String>,
    title: Option<String>,
}

fn flat_playlist_dump(paths: &AppPaths, url: &str) -> Result<FlatPlaylistDump> {
    let url = sanitize_url(url)?;
    let mut command = cmd::command(paths.ytdlp_cmd());
    command.args(["--quiet", "--flat-playlist", "--dump-single-json", &url]);

    let output = cmd::run_with_control("yt-dlp", &mut command, Some(PROBE_TIMEOUT), &|| false)?;
    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: "yt-dlp".to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Whether a URL names a playlist, and how many videos it carries.
pub fn probe_playlist(paths: &AppPaths, url: &str) -> Result<PlaylistProbe> {
    let dump = flat_playlist_dump(paths, url)?;
    match dump.entries {
        Some(entries) => {
            let count = entries.iter().flatten().count();
            Ok(PlaylistProbe {
                video_count: count,
                playlist_title: dump.title,
            })
        }
        None => Ok(PlaylistProbe {
            video_count: 1,
            playlist_title: None,
        }),
    }
}

/// Expand a playlist URL into its individual videos; a single video comes
/// back as a one-element list.
pub fn playlist_videos(paths: &AppPaths, url: &str) -> Result<Vec<PlaylistVideo>> {
    let dump = flat_playlist_dump(paths, url)?;
    match dump.entries {
        Some(entries) => Ok(entries
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let url = entry.url?;
                if url.is_empty() {
                    return None;
                }
                Some(PlaylistVideo {
                    url,
                    title: entry.title.unwrap_or_else(|| "Unknown Video".to_string()),
                })
            })
            .collect()),
        None => Ok(vec![PlaylistVideo {
            url: dump.webpage_url.unwrap_or_else(|| url.trim().to_string()),
            title: dump.title.unwrap_or_else(|| "Unknown Video".to_string()),
        }]),
    }
}
