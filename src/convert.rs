//! ffmpeg conversion pipeline: output placement, codec presets and
//! `time=` progress parsing off stderr.

use regex::Regex;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use crate::ffmpeg;
use crate::formats::MediaFormat;
use crate::names::unique_output_path;
use crate::paths::AppPaths;
use crate::queue::{Job, JobRequest};
use crate::{cmd, EngineError, Result};

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub target_format: MediaFormat,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionActivity {
    pub output_path: Option<PathBuf>,
}

impl JobRequest for ConversionRequest {
    type Activity = ConversionActivity;
}

pub struct Converter {
    paths: AppPaths,
}

impl Converter {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    /// Queue callback entry point for one conversion.
    pub fn run(&self, job: &Job<ConversionRequest>) -> Result<()> {
        let request = job.request();

        if !request.input_path.is_file() {
            return Err(EngineError::InputNotFound(request.input_path.clone()));
        }
        ensure_output_dir_usable(&request.output_dir)?;

        let stem = request
            .input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("converted");
        job.set_title(stem);
        let output_path = unique_output_path(
            &request.output_dir,
            &format!("{stem}_converted"),
            request.target_format.extension(),
        );
        job.update_activity(|activity| activity.output_path = Some(output_path.clone()));

        let duration_ms = ffmpeg::probe(&self.paths, &request.input_path)
            .ok()
            .and_then(|p| p.duration_ms);

        let args = build_args(&request.input_path, request.target_format, &output_path);
        let mut command = cmd::command(self.paths.ffmpeg_cmd());
        command.args(&args);
        command.stdout(Stdio::null());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| cmd::spawn_error("ffmpeg", e))?;

        let mut stderr_tail = String::new();
        if let Some(stderr) = child.stderr.take() {
            // ffmpeg rewrites its status line with carriage returns, so the
            // reader splits on '\r' instead of newlines.
            let mut reader = BufReader::new(stderr);
            let mut chunk = Vec::new();
            loop {
                chunk.clear();
                let read = reader.read_until(b'\r', &mut chunk).unwrap_or(0);
                if read == 0 {
                    break;
                }
                if job.is_cancelled() {
                    cmd::kill_child_tree(&mut child);
                    let _ = std::fs::remove_file(&output_path);
                    return Err(EngineError::Canceled);
                }
                let text = String::from_utf8_lossy(&chunk);
                stderr_tail = text.trim().to_string();
                if let Some(elapsed_ms) = parse_time_ms(&text) {
                    job.update_progress(estimate_percent(elapsed_ms, duration_ms));
                }
            }
        }

        let status = child.wait()?;

        if job.is_cancelled() {
            let _ = std::fs::remove_file(&output_path);
            return Err(EngineError::Canceled);
        }
        if !status.success() {
            let _ = std::fs::remove_file(&output_path);
            return Err(EngineError::ExternalToolFailed {
                tool: "ffmpeg".to_string(),
                code: status.code(),
                stderr: stderr_tail,
            });
        }
        let produced = std::fs::metadata(&output_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(EngineError::ExternalToolFailed {
                tool: "ffmpeg".to_string(),
                code: status.code(),
                stderr: "no output file was produced".to_string(),
            });
        }

        job.update_progress(100.0);
        Ok(())
    }
}

/// The output directory must exist and take writes; probed with a scratch
/// file because a permissions check alone misses read-only mounts.
fn ensure_output_dir_usable(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::OutputDirUnusable(format!("{}: {e}", dir.display())))?;
    let probe = dir.join(".mediagrab_write_probe");
    std::fs::write(&probe, b"probe")
        .map_err(|e| EngineError::OutputDirUnusable(format!("{}: {e}", dir.display())))?;
    let _ = std::fs::remove_file(probe);
    Ok(())
}

fn build_args(input: &Path, target: MediaFormat, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        OsString::from("-y"),
        OsString::from("-i"),
        input.as_os_str().to_os_string(),
    ];
    let codec_args: &[&str] = match target {
        MediaFormat::Mp4 => &[
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
        ],
        MediaFormat::Mp3 => &[
            "-vn",
            "-c:a",
            "libmp3lame",
            "-b:a",
            "192k",
            "-ar",
            "44100",
            "-ac",
            "2",
        ],
    };
    args.extend(codec_args.iter().map(OsString::from));
    args.push(output.as_os_str().to_os_string());
    args
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("time pattern")
    })
}

/// Pull the elapsed media time out of an ffmpeg status line.
fn parse_time_ms(chunk: &str) -> Option<i64> {
    let caps = time_pattern().captures(chunk)?;
    let hours: i64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: i64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0).round() as i64)
}

/// Real percentage when the input duration is known; otherwise a coarse
/// ramp that never claims completion.
fn estimate_percent(elapsed_ms: i64, duration_ms: Option<i64>) -> f32 {
    match duration_ms {
        Some(total) if total > 0 => {
            ((elapsed_ms as f64 / total as f64) * 100.0).clamp(0.0, 99.0) as f32
        }
        _ => {
            let minutes = elapsed_ms as f64 / 60_000.0;
            (minutes * 10.0).min(95.0) as f32
        }
    }
}
