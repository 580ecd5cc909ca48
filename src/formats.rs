use serde::{Deserialize, Serialize};

/// Target container for downloads and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Mp4,
    Mp3,
}

impl MediaFormat {
    pub fn extension(self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Mp3 => "mp3",
        }
    }

    pub fn from_extension(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mp4" => Some(MediaFormat::Mp4),
            "mp3" => Some(MediaFormat::Mp3),
            _ => None,
        }
    }

    pub fn is_audio_only(self) -> bool {
        matches!(self, MediaFormat::Mp3)
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Input containers ffmpeg is expected to handle for conversions.
pub const SUPPORTED_INPUT_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mp3", "m4a", "wav", "flac", "ogg", "aac",
];

pub fn is_supported_input(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    SUPPORTED_INPUT_EXTENSIONS.iter().any(|e| *e == lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_round_trip() {
        assert_eq!(MediaFormat::from_extension("MP4"), Some(MediaFormat::Mp4));
        assert_eq!(MediaFormat::from_extension("mp3"), Some(MediaFormat::Mp3));
        assert_eq!(MediaFormat::from_extension("flac"), None);
        assert_eq!(MediaFormat::Mp3.extension(), "mp3");
    }

    #[test]
    fn supported_inputs_cover_common_containers() {
        assert!(is_supported_input("MKV"));
        assert!(is_supported_input("wav"));
        assert!(!is_supported_input("docx"));
    }
}
