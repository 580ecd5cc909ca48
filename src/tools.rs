//! Managed yt-dlp and ffmpeg installs under the app's tools directory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::paths::AppPaths;
use crate::version::{update_priority, UpdatePriority};
use crate::{EngineError, Result};

const YTDLP_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const YTDLP_LATEST_API: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";
const YTDLP_MIN_SIZE: u64 = 512 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct FfmpegStatus {
    pub installed: bool,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ffmpeg_version: Option<String>,
    pub ffprobe_version: Option<String>,
}

pub fn ffmpeg_status(paths: &AppPaths) -> FfmpegStatus {
    let ffmpeg_path = paths.ffmpeg_bin_path();
    let ffprobe_path = paths.ffprobe_bin_path();
    let installed = ffmpeg_path.exists() && ffprobe_path.exists();
    let ffmpeg_version = tool_version_first_line(paths.ffmpeg_cmd(), "-version");
    let ffprobe_version = tool_version_first_line(paths.ffprobe_cmd(), "-version");

    FfmpegStatus {
        installed,
        ffmpeg_path: ffmpeg_path.to_string_lossy().to_string(),
        ffprobe_path: ffprobe_path.to_string_lossy().to_string(),
        ffmpeg_version,
        ffprobe_version,
    }
}

pub fn install_ffmpeg(paths: &AppPaths) -> Result<FfmpegStatus> {
    paths.ensure_dirs()?;

    let destination = paths.ffmpeg_dir();
    std::fs::create_dir_all(&destination)?;

    let download_url = ffmpeg_sidecar::download::ffmpeg_download_url()
        .map_err(|e| EngineError::InstallFailed(e.to_string()))?;
    let archive_path =
        ffmpeg_sidecar::download::download_ffmpeg_package(download_url, &destination)
            .map_err(|e| EngineError::InstallFailed(e.to_string()))?;
    ffmpeg_sidecar::download::unpack_ffmpeg(&archive_path, &destination)
        .map_err(|e| EngineError::InstallFailed(e.to_string()))?;

    Ok(ffmpeg_status(paths))
}

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpStatus {
    pub available: bool,
    pub bundled_installed: bool,
    pub bundled_path: String,
    pub ytdlp_path: String,
    pub ytdlp_version: Option<String>,
}

pub fn ytdlp_status(paths: &AppPaths) -> YtDlpStatus {
    let bundled = paths.ytdlp_bin_path();
    let bundled_installed = bundled.exists();

    let mut resolved_path = String::new();
    let mut resolved_version: Option<String> = None;
    let mut available = false;

    let mut candidates: Vec<PathBuf> = Vec::new();
    if bundled_installed {
        candidates.push(bundled.clone());
    }
    candidates.push(PathBuf::from("yt-dlp"));

    for candidate in candidates {
        let version = tool_version_first_line(&candidate, "--version");
        if version.is_some() {
            available = true;
            resolved_path = candidate.to_string_lossy().to_string();
            resolved_version = version;
            break;
        }
    }

    YtDlpStatus {
        available,
        bundled_installed,
        bundled_path: bundled.to_string_lossy().to_string(),
        ytdlp_path: resolved_path,
        ytdlp_version: resolved_version,
    }
}

fn ytdlp_asset_name() -> &'static str {
    if cfg!(windows) {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    }
}

/// Download the latest yt-dlp release asset into the tools directory,
/// verifying it against the release checksum file before it replaces any
/// existing binary. The previous binary is kept as a backup and restored if
/// the new one fails its version probe.
pub fn install_ytdlp(paths: &AppPaths) -> Result<YtDlpStatus> {
    paths.ensure_dirs()?;

    let destination = paths.ytdlp_bin_path();
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let asset = ytdlp_asset_name();
    let tmp_path = destination.with_extension("download");
    let actual_sha = download_to_file(&format!("{YTDLP_RELEASE_BASE}/{asset}"), &tmp_path)?;

    let downloaded_size = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
    if downloaded_size < YTDLP_MIN_SIZE {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(EngineError::InstallFailed(
            "downloaded yt-dlp is unexpectedly small".to_string(),
        ));
    }

    let sums = fetch_text(&format!("{YTDLP_RELEASE_BASE}/SHA2-256SUMS"))?;
    let expected_sha = parse_sha256sums(&sums, asset).ok_or_else(|| {
        EngineError::InstallFailed(format!("checksum file has no entry for {asset}"))
    })?;
    if !expected_sha.eq_ignore_ascii_case(&actual_sha) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(EngineError::HashMismatch {
            path: tmp_path,
            expected: expected_sha,
            actual: actual_sha,
        });
    }

    let backup = backup_existing(paths, &destination)?;

    if std::fs::rename(&tmp_path, &destination).is_err() {
        std::fs::copy(&tmp_path, &destination)?;
        let _ = std::fs::remove_file(&tmp_path);
    }
    make_executable(&destination)?;

    if tool_version_first_line(&destination, "--version").is_none() {
        let _ = std::fs::remove_file(&destination);
        if let Some(backup) = backup {
            let _ = std::fs::copy(&backup, &destination);
            make_executable(&destination)?;
        }
        return Err(EngineError::InstallFailed(
            "installed yt-dlp failed its version probe".to_string(),
        ));
    }

    Ok(ytdlp_status(paths))
}

fn backup_existing(paths: &AppPaths, destination: &Path) -> Result<Option<PathBuf>> {
    if !destination.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(paths.backups_dir())?;
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "yt-dlp".to_string());
    let backup = paths
        .backups_dir()
        .join(format!("{name}.{}", crate::joblog::now_ms()));
    std::fs::copy(destination, &backup)?;
    let _ = std::fs::remove_file(destination);
    Ok(Some(backup))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Stream a URL to disk, hashing as it goes. Returns the hex SHA-256 of the
/// written bytes.
fn download_to_file(url: &str, destination: &Path) -> Result<String> {
    let resp = ureq::get(url)
        .call()
        .map_err(|e| EngineError::InstallFailed(format!("download failed: {e}")))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(EngineError::InstallFailed(format!(
            "download failed (status={status})"
        )));
    }

    let mut reader = resp.into_body().into_reader();
    let mut file = std::fs::File::create(destination)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = std::io::Read::read(&mut reader, &mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        file.write_all(&buf[..read])?;
    }
    file.flush()?;

    Ok(hex::encode(hasher.finalize()))
}

fn fetch_text(url: &str) -> Result<String> {
    let resp = ureq::get(url)
        .call()
        .map_err(|e| EngineError::InstallFailed(format!("download failed: {e}")))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(EngineError::InstallFailed(format!(
            "download failed (status={status})"
        )));
    }
    resp.into_body()
        .read_to_string()
        .map_err(|e| EngineError::InstallFailed(format!("download failed: {e}")))
}

/// One `<hex>  <name>` pair per line, the standard sha256sum layout.
fn parse_sha256sums(contents: &str, asset: &str) -> Option<String> {
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        let Some(hash) = parts.next() else { continue };
        let name = parts.next().unwrap_or("");
        if name.trim_start_matches('*') == asset && hash.len() == 64 {
            return Some(hash.to_string());
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateInfo {
    pub current_version: Option<String>,
    pub latest_version: String,
    pub update_available: bool,
    pub download_url: String,
    pub priority: UpdatePriority,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// Compare the installed yt-dlp against the latest GitHub release.
pub fn check_ytdlp_update(paths: &AppPaths) -> Result<UpdateInfo> {
    let release: LatestRelease = serde_json::from_str(&fetch_text(YTDLP_LATEST_API)?)?;
    let latest = release.tag_name.trim().to_string();
    let current = ytdlp_status(paths).ytdlp_version;

    let priority = match &current {
        Some(current) => update_priority(current, &latest),
        None => UpdatePriority::High,
    };

    Ok(UpdateInfo {
        current_version: current,
        latest_version: latest,
        update_available: priority > UpdatePriority::None,
        download_url: format!("{YTDLP_RELEASE_BASE}/{}", ytdlp_asset_name()),
        priority,
    })
}

fn tool_version_first_line(program: impl AsRef<std::ffi::OsStr>, arg: &str) -> Option<String> {
    let output = crate::cmd::command(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}
