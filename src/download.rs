//! yt-dlp download pipeline: metadata probe, argument assembly, progress
//! streaming and retry with backoff.

use serde::Deserialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::formats::MediaFormat;
use crate::names::{cleanup_thumbnails, sanitize_filename, unique_output_path};
use crate::paths::AppPaths;
use crate::queue::{Job, JobRequest};
use crate::urls::sanitize_url;
use crate::{cmd, EngineError, Result};

const MAX_ATTEMPTS: u32 = 3;
const INFO_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_CACHE_CAP: usize = 100;

/// What the worker is asked to fetch. Built once by the UI and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub format: MediaFormat,
    pub output_dir: PathBuf,
    /// Re-encode to the most widely playable codecs instead of keeping
    /// whatever the source uses.
    pub compatibility_mode: bool,
    pub custom_title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadActivity {
    pub speed: Option<String>,
    pub eta: Option<String>,
}

impl JobRequest for DownloadRequest {
    type Activity = DownloadActivity;
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MusicTags {
    artist: String,
    track: String,
    album: String,
}

/// FIFO-evicting cache of `--dump-json` probes, keyed by sanitized URL.
/// Re-queuing the same video (playlists, retries after cancel) skips the
/// network round trip.
struct MetadataCache {
    entries: HashMap<String, VideoInfo>,
    order: VecDeque<String>,
}

impl MetadataCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, url: &str) -> Option<VideoInfo> {
        self.entries.get(url).cloned()
    }

    fn insert(&mut self, url: String, info: VideoInfo) {
        if self.entries.insert(url.clone(), info).is_none() {
            self.order.push_back(url);
        }
        while self.order.len() > METADATA_CACHE_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }
}

pub struct Downloader {
    paths: AppPaths,
    metadata_cache: Mutex<MetadataCache>,
}

impl Downloader {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            metadata_cache: Mutex::new(MetadataCache::new()),
        }
    }

    /// Queue callback entry point: runs one download with retries. Only
    /// transient errors are retried; cancellation and tool failures are
    /// final.
    pub fn run(&self, job: &Job<DownloadRequest>) -> Result<()> {
        let mut attempt = 0;
        loop {
            if job.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            match self.download_once(job) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    job.update_progress(0.0);
                    job.update_activity(|activity| *activity = DownloadActivity::default());
                    thread::sleep(Duration::from_secs(1 << attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn download_once(&self, job: &Job<DownloadRequest>) -> Result<()> {
        let request = job.request();
        let url = sanitize_url(&request.url)?;

        let info = self.video_info(job, &url)?;
        let title = request
            .custom_title
            .clone()
            .or_else(|| info.title.clone())
            .unwrap_or_else(|| "Unknown Video".to_string());
        job.set_title(&title);

        let uploader = info
            .uploader
            .clone()
            .or_else(|| info.channel.clone())
            .unwrap_or_else(|| "Unknown Artist".to_string());
        let tags = derive_music_tags(&title, &uploader);

        std::fs::create_dir_all(&request.output_dir)?;
        let output_path = unique_output_path(
            &request.output_dir,
            &title,
            request.format.extension(),
        );
        let base = output_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| sanitize_filename(&title));

        let args = build_args(request, &request.output_dir, &base, &tags, &self.paths, &url);

        let mut command = cmd::command(self.paths.ytdlp_cmd());
        command.args(&args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| cmd::spawn_error("yt-dlp", e))?;

        let stderr_handle = child.stderr.take().map(|pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                    text.push_str(&line);
                    text.push('\n');
                }
                text
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                if job.is_cancelled() {
                    cmd::kill_child_tree(&mut child);
                    cleanup_thumbnails(&request.output_dir, Some(&base));
                    return Err(EngineError::Canceled);
                }
                if let Some(update) = parse_progress_line(&line) {
                    if let Some(percent) = update.percent {
                        job.update_progress(percent);
                    }
                    job.update_activity(|activity| {
                        activity.speed = update.speed.clone();
                        activity.eta = update.eta.clone();
                    });
                }
            }
        }

        let status = child.wait()?;
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        cleanup_thumbnails(&request.output_dir, Some(&base));

        if job.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        if !status.success() {
            // Postprocessor warnings can fail the exit code after the media
            // file already landed; an existing non-empty output wins.
            let produced = std::fs::metadata(&output_path)
                .map(|m| m.len() > 0)
                .unwrap_or(false);
            if !produced {
                return Err(classify_failure(status.code(), &stderr));
            }
        }

        Ok(())
    }

    /// `--dump-json` probe for one video, served from the cache when the
    /// same URL was seen recently.
    fn video_info(&self, job: &Job<DownloadRequest>, url: &str) -> Result<VideoInfo> {
        {
            let cache = self
                .metadata_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(info) = cache.get(url) {
                return Ok(info);
            }
        }

        let mut command = cmd::command(self.paths.ytdlp_cmd());
        command.args(["--quiet", "--dump-json", "--no-playlist", url]);
        let output = cmd::run_with_control(
            "yt-dlp",
            &mut command,
            Some(INFO_PROBE_TIMEOUT),
            &|| job.is_cancelled(),
        )?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)?;
        let mut cache = self
            .metadata_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache.insert(url.to_string(), info.clone());
        Ok(info)
    }
}

fn build_args(
    request: &DownloadRequest,
    output_dir: &Path,
    base: &str,
    tags: &MusicTags,
    paths: &AppPaths,
    url: &str,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let format_args: &[&str] = match (request.format, request.compatibility_mode) {
        (MediaFormat::Mp4, true) => &[
            "-f",
            "bv*+ba/b",
            "--merge-output-format",
            "mp4",
            "--recode-video",
            "mp4",
            "--postprocessor-args",
            "ffmpeg:-c:v libx264 -c:a aac -strict -2",
        ],
        (MediaFormat::Mp4, false) => &[
            "-f",
            "bv*+ba/b",
            "--merge-output-format",
            "mp4",
            "--postprocessor-args",
            "ffmpeg:-c:a aac",
        ],
        (MediaFormat::Mp3, true) => &[
            "-f",
            "ba",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "0",
            "--postprocessor-args",
            "ffmpeg:-codec:a libmp3lame",
            "--embed-thumbnail",
        ],
        (MediaFormat::Mp3, false) => &[
            "-f",
            "ba",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "0",
            "--embed-thumbnail",
        ],
    };
    args.extend(format_args.iter().map(OsString::from));

    args.extend(["--write-thumbnail", "--add-metadata"].map(OsString::from));
    for mapping in [
        format!("{}:%(meta_artist)s", tags.artist),
        format!("{}:%(meta_title)s", tags.track),
        format!("{}:%(meta_album)s", tags.album),
    ] {
        args.push(OsString::from("--parse-metadata"));
        args.push(OsString::from(mapping));
    }

    args.extend(
        [
            "--no-playlist",
            "--concurrent-fragments",
            "1",
            "--no-part",
            "--limit-rate",
            "4M",
            "--no-write-info-json",
            "--no-write-description",
            "--no-mtime",
            "--newline",
            "--progress-template",
            concat!(
                "download:%(progress.downloaded_bytes)s/",
                "%(progress.total_bytes)s/%(progress.speed)s/%(progress.eta)s"
            ),
        ]
        .map(OsString::from),
    );

    if paths.ffmpeg_bin_path().exists() {
        args.push(OsString::from("--ffmpeg-location"));
        args.push(paths.ffmpeg_dir().into_os_string());
    }

    args.push(OsString::from("-o"));
    args.push(output_dir.join(format!("{base}.%(ext)s")).into_os_string());
    args.push(OsString::from(url));

    args
}

/// Title patterns seen in the wild, most specific first. Falls back to the
/// uploader as artist.
fn derive_music_tags(title: &str, uploader: &str) -> MusicTags {
    let album = uploader.to_string();

    if let Some((artist, track)) = title.split_once(" - ") {
        let artist = artist.trim();
        let track = track.trim();
        if !artist.is_empty() && !track.is_empty() {
            return MusicTags {
                artist: artist.to_string(),
                track: track.to_string(),
                album,
            };
        }
    }

    if let Some((artist, track)) = title.split_once(": ") {
        let artist = artist.trim();
        let track = track.trim();
        if !artist.is_empty() && !track.is_empty() {
            return MusicTags {
                artist: artist.to_string(),
                track: track.to_string(),
                album,
            };
        }
    }

    // "Track (Artist)" with the parenthetical at the very end.
    if let Some(open) = title.rfind('(') {
        if title.trim_end().ends_with(')') {
            let track = title[..open].trim();
            let artist = title[open + 1..title.rfind(')').unwrap_or(title.len())].trim();
            if !artist.is_empty() && !track.is_empty() {
                return MusicTags {
                    artist: artist.to_string(),
                    track: track.to_string(),
                    album,
                };
            }
        }
    }

    MusicTags {
        artist: uploader.to_string(),
        track: title.trim().to_string(),
        album,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProgressUpdate {
    percent: Option<f32>,
    speed: Option<String>,
    eta: Option<String>,
}

/// Parse one `--progress-template` line:
/// `download:<downloaded>/<total>/<speed>/<eta>`, any field may be `NA`.
fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.trim().strip_prefix("download:")?;
    let mut fields = rest.split('/');
    let downloaded = fields.next()?;
    let total = fields.next()?;
    let speed = fields.next()?;
    let eta = fields.next()?;

    let percent = match (parse_bytes(downloaded), parse_bytes(total)) {
        (Some(done), Some(total)) if total > 0.0 => {
            Some(((done / total) * 100.0).clamp(0.0, 100.0) as f32)
        }
        _ => None,
    };

    Some(ProgressUpdate {
        percent,
        speed: parse_bytes(speed).map(format_speed),
        eta: parse_eta_seconds(eta),
    })
}

fn parse_bytes(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == "NA" || field == "None" {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn format_speed(bytes_per_sec: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes_per_sec >= MIB {
        format!("{:.1} MiB/s", bytes_per_sec / MIB)
    } else if bytes_per_sec >= KIB {
        format!("{:.1} KiB/s", bytes_per_sec / KIB)
    } else {
        format!("{bytes_per_sec:.0} B/s")
    }
}

fn parse_eta_seconds(field: &str) -> Option<String> {
    let secs = parse_bytes(field)? as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        Some(format!("{h}:{m:02}:{s:02}"))
    } else {
        Some(format!("{m}:{s:02}"))
    }
}

/// Map a nonzero yt-dlp exit to the most specific error its stderr supports.
fn classify_failure(code: Option<i32>, stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();
    if lower.contains("no space left") {
        return EngineError::DiskFull(stderr.trim().to_string());
    }
    if lower.contains("permission denied") {
        return EngineError::PermissionDenied(stderr.trim().to_string());
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("timed out")
        || lower.contains("unable to download")
    {
        return EngineError::Network(stderr.trim().to_string());
    }
    EngineError::ExternalToolFailed {
        tool: "yt-dlp".to_string(),
        code,
        stderr: stderr.trim().to_string(),
    }
}
