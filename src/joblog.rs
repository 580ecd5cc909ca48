//! Structured JSONL event logs, one file per queue, size-rotated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Result;

const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const LOG_MAX_BACKUPS: usize = 3;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// `logs_dir/<scope>.jsonl`.
    pub fn new(logs_dir: &Path, scope: &str) -> Self {
        Self {
            path: logs_dir.join(format!("{scope}.jsonl")),
        }
    }

    pub fn log(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "level": level,
            "event": event,
            "data": data,
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn rotate_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < LOG_ROTATE_BYTES {
        return Ok(());
    }
    rotate_file_backups(path, LOG_MAX_BACKUPS)
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Shift `file.1 -> file.2 -> ...`, dropping the oldest, then move the live
/// file to `.1`.
fn rotate_file_backups(path: &Path, max_backups: usize) -> Result<()> {
    if max_backups == 0 {
        std::fs::remove_file(path)?;
        return Ok(());
    }

    let oldest = path_with_suffix(path, &format!(".{max_backups}"));
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for n in (1..max_backups).rev() {
        let from = path_with_suffix(path, &format!(".{n}"));
        if from.exists() {
            std::fs::rename(&from, path_with_suffix(path, &format!(".{}", n + 1)))?;
        }
    }
    std::fs::rename(path, path_with_suffix(path, ".1"))?;
    Ok(())
}
