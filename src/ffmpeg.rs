//! ffprobe wrapper used to size conversion progress.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::paths::AppPaths;
use crate::{cmd, EngineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct MediaProbe {
    pub duration_ms: Option<i64>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

pub fn probe(paths: &AppPaths, input: &Path) -> Result<MediaProbe> {
    let output = cmd::command(paths.ffprobe_cmd())
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input)
        .output()
        .map_err(|e| cmd::spawn_error("ffprobe", e))?;

    if !output.status.success() {
        return Err(EngineError::ExternalToolFailed {
            tool: "ffprobe".to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let container = parsed
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .map(first_format_name);
    let duration_ms = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_seconds_to_ms);

    let video_codec = stream_codec(&parsed, "video");
    let audio_codec = stream_codec(&parsed, "audio");

    Ok(MediaProbe {
        duration_ms,
        container,
        video_codec,
        audio_codec,
    })
}

fn stream_codec(parsed: &FfprobeOutput, kind: &str) -> Option<String> {
    parsed
        .streams
        .as_ref()?
        .iter()
        .find(|st| st.codec_type.as_deref() == Some(kind))
        .and_then(|st| st.codec_name.clone())
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

fn first_format_name(value: &str) -> String {
    value.split(',').next().unwrap_or(value).trim().to_string()
}

fn parse_seconds_to_ms(value: &str) -> Option<i64> {
    let seconds: f64 = value.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_parses_duration_and_codecs() {
        let raw = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264"},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"format_name": "mov,mp4,m4a", "duration": "12.500"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).expect("parse");
        assert_eq!(stream_codec(&parsed, "video").as_deref(), Some("h264"));
        assert_eq!(stream_codec(&parsed, "audio").as_deref(), Some("aac"));
        assert_eq!(
            parsed
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(parse_seconds_to_ms),
            Some(12_500)
        );
        assert_eq!(
            parsed
                .format
                .as_ref()
                .and_then(|f| f.format_name.as_deref())
                .map(first_format_name)
                .as_deref(),
            Some("mov")
        );
    }

    #[test]
    fn negative_or_garbage_durations_are_dropped() {
        assert_eq!(parse_seconds_to_ms("-1.0"), None);
        assert_eq!(parse_seconds_to_ms("NaN"), None);
        assert_eq!(parse_seconds_to_ms("abc"), None);
    }
}
