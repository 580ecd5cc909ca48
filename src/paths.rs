use std::path::{Path, PathBuf};

/// All on-disk locations used by the engine, rooted at one base directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    pub fn ytdlp_dir(&self) -> PathBuf {
        self.tools_dir().join("yt-dlp")
    }

    pub fn ytdlp_bin_path(&self) -> PathBuf {
        let mut path = self.ytdlp_dir().join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    /// Bundled yt-dlp when installed, otherwise whatever is on PATH.
    pub fn ytdlp_cmd(&self) -> PathBuf {
        let path = self.ytdlp_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("yt-dlp")
        }
    }

    pub fn ffmpeg_dir(&self) -> PathBuf {
        self.tools_dir().join("ffmpeg")
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        let mut path = self.ffmpeg_dir().join("ffmpeg");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffprobe_bin_path(&self) -> PathBuf {
        let mut path = self.ffmpeg_dir().join("ffprobe");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffmpeg_cmd(&self) -> PathBuf {
        let path = self.ffmpeg_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffmpeg")
        }
    }

    pub fn ffprobe_cmd(&self) -> PathBuf {
        let path = self.ffprobe_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffprobe")
        }
    }

    pub fn download_dir_override_path(&self) -> PathBuf {
        self.config_dir().join("download_dir.txt")
    }

    pub fn default_download_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    pub fn download_dir_override(&self) -> std::io::Result<Option<PathBuf>> {
        let path = self.download_dir_override_path();
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        Ok(Some(PathBuf::from(trimmed)))
    }

    pub fn effective_download_dir(&self) -> std::io::Result<PathBuf> {
        if let Some(override_dir) = self.download_dir_override()? {
            return Ok(override_dir);
        }
        Ok(self.default_download_dir())
    }

    pub fn set_download_dir_override(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::write(
            self.download_dir_override_path(),
            format!("{}\n", dir.to_string_lossy()),
        )?;
        Ok(())
    }

    pub fn clear_download_dir_override(&self) -> std::io::Result<()> {
        let path = self.download_dir_override_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        std::fs::create_dir_all(self.ytdlp_dir())?;
        std::fs::create_dir_all(self.ffmpeg_dir())?;
        std::fs::create_dir_all(self.default_download_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_dir_override_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());

        assert_eq!(paths.download_dir_override().expect("read"), None);
        assert_eq!(
            paths.effective_download_dir().expect("effective"),
            paths.default_download_dir()
        );

        let custom = dir.path().join("elsewhere");
        paths.set_download_dir_override(&custom).expect("set");
        assert_eq!(
            paths.effective_download_dir().expect("effective"),
            custom
        );

        paths.clear_download_dir_override().expect("clear");
        assert_eq!(paths.download_dir_override().expect("read"), None);
    }

    #[test]
    fn blank_override_file_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.download_dir_override_path(), "  \n").expect("write");
        assert_eq!(paths.download_dir_override().expect("read"), None);
    }
}
