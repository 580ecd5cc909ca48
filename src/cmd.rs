use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::{EngineError, Result};

const CHILD_POLL_INTERVAL_MS: u64 = 200;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus on Windows while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

pub fn kill_child_tree(child: &mut Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = command("taskkill").args(["/PID", &pid, "/T", "/F"]).status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Run a command to completion with a cancellation check and an optional
/// timeout. The child is killed (with its process tree) when the check fires
/// or the timeout elapses.
pub fn run_with_control(
    tool: &str,
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancelled: &dyn Fn() -> bool,
) -> Result<Output> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        EngineError::Io(std::io::Error::other("stdout pipe missing"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        EngineError::Io(std::io::Error::other("stderr pipe missing"))
    })?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let mut abort: Option<EngineError> = None;

    loop {
        if abort.is_none() && cancelled() {
            kill_child_tree(&mut child);
            abort = Some(EngineError::Canceled);
        }
        if abort.is_none() {
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    kill_child_tree(&mut child);
                    abort = Some(EngineError::TimedOut(limit.as_secs()));
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = stdout_handle.join().unwrap_or_default();
                let stderr = stderr_handle.join().unwrap_or_default();
                if let Some(reason) = abort {
                    return Err(reason);
                }
                return Ok(Output {
                    status,
                    stdout,
                    stderr,
                });
            }
            Ok(None) => {
                thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS));
            }
            Err(err) => {
                kill_child_tree(&mut child);
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(EngineError::Io(err));
            }
        }
    }
}

pub fn spawn_error(tool: &str, err: std::io::Error) -> EngineError {
    match err.kind() {
        std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
            tool: tool.to_string(),
        },
        _ => EngineError::Io(err),
    }
}
