use std::path::PathBuf;

use mediagrab_engine::paths::AppPaths;
use mediagrab_engine::tools;

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut install_all = false;
    let mut install_ffmpeg = false;
    let mut install_ytdlp = false;
    let mut check_update = false;
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "--install-all" => install_all = true,
            "--install-ffmpeg" => install_ffmpeg = true,
            "--install-ytdlp" => install_ytdlp = true,
            "--check-update" => check_update = true,
            "--force" => force = true,
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        i += 1;
    }

    if install_all {
        install_ffmpeg = true;
        install_ytdlp = true;
    }

    if !install_ffmpeg && !install_ytdlp && !check_update {
        return Err("nothing to do (pass --install-all or flags)".to_string());
    }

    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;

    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;

    println!("Base dir: {}", paths.base_dir.to_string_lossy());

    if install_ffmpeg {
        let status = tools::ffmpeg_status(&paths);
        if status.installed && !force {
            println!("FFmpeg: already installed ({})", status.ffmpeg_path);
        } else {
            println!("FFmpeg: installing...");
            let next = tools::install_ffmpeg(&paths).map_err(|e| e.to_string())?;
            if !next.installed {
                return Err("FFmpeg install did not result in installed=true".to_string());
            }
            println!("FFmpeg: installed ({})", next.ffmpeg_path);
        }
    }

    if install_ytdlp {
        let status = tools::ytdlp_status(&paths);
        if status.bundled_installed && !force {
            println!("yt-dlp: already installed ({})", status.bundled_path);
        } else {
            println!("yt-dlp: installing...");
            let next = tools::install_ytdlp(&paths).map_err(|e| e.to_string())?;
            println!(
                "yt-dlp: installed ({}, version {})",
                next.bundled_path,
                next.ytdlp_version.as_deref().unwrap_or("unknown")
            );
        }
    }

    if check_update {
        let info = tools::check_ytdlp_update(&paths).map_err(|e| e.to_string())?;
        println!(
            "yt-dlp: current={} latest={} update_available={} priority={:?}",
            info.current_version.as_deref().unwrap_or("none"),
            info.latest_version,
            info.update_available,
            info.priority
        );
    }

    Ok(())
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("MEDIAGRAB_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }

    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            let t = appdata.trim();
            if !t.is_empty() {
                return Some(PathBuf::from(t).join("com.mediagrab.mediagrab"));
            }
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let t = home.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t).join(".mediagrab"));
        }
    }

    None
}

fn print_help() {
    println!(
        r#"mediagrab_setup

Bootstraps runtime dependencies (FFmpeg + yt-dlp) into the app data directory.

Usage:
  cargo run --bin mediagrab_setup -- --install-all
  cargo run --bin mediagrab_setup -- --install-ffmpeg
  cargo run --bin mediagrab_setup -- --install-ytdlp
  cargo run --bin mediagrab_setup -- --check-update

Options:
  --base-dir <path>  Override base dir (default: ~/.mediagrab, %APPDATA%\com.mediagrab.mediagrab on Windows)
  --install-all      Install FFmpeg + yt-dlp
  --install-ffmpeg   Install FFmpeg tools into <base-dir>/tools/ffmpeg
  --install-ytdlp    Install the latest yt-dlp into <base-dir>/tools/yt-dlp
  --check-update     Compare the installed yt-dlp against the latest release
  --force            Reinstall even if present
"#
    );
}
