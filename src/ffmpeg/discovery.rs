//! Locate the ffmpeg and ffprobe binaries.

use std::path::{Path, PathBuf};
use std::process::Command;
#[cfg(any(test, feature = "integration-test-api"))]
use std::sync::OnceLock;

use crate::error::AppError;

fn find_in_path() -> Option<PathBuf> {
    let lookup = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(lookup).arg("ffmpeg").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    (!first.is_empty()).then(|| PathBuf::from(first))
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

#[cfg(any(test, feature = "integration-test-api"))]
static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Resolution order: explicit override, `FFMPEG_PATH`, common install paths, `PATH`.
pub fn resolve_ffmpeg_path(explicit: Option<&Path>) -> Result<PathBuf, AppError> {
    if let Some(p) = explicit.filter(|p| p.exists()) {
        log::debug!(
            target: "vari_vid::ffmpeg::discovery",
            "FFmpeg path from config: {}",
            p.display()
        );
        return Ok(p.to_path_buf());
    }

    if let Some(p) = std::env::var_os("FFMPEG_PATH")
        .map(PathBuf::from)
        .filter(|p| p.exists())
    {
        log::debug!(
            target: "vari_vid::ffmpeg::discovery",
            "FFmpeg path from FFMPEG_PATH env: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "vari_vid::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            p.display()
        );
        return Ok(p);
    }

    if let Some(p) = find_in_path().filter(|p| p.exists()) {
        log::debug!(
            target: "vari_vid::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "vari_vid::ffmpeg::discovery",
        "FFmpeg not found in config, FFMPEG_PATH, PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Install it (e.g. `apt install ffmpeg`) or set FFMPEG_PATH.".to_string(),
    ))
}

/// Cached for process lifetime once resolved without an explicit override.
/// Test harnesses use it to share one lookup across many cases.
#[cfg(any(test, feature = "integration-test-api"))]
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let resolved = resolve_ffmpeg_path(None)?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| resolved).as_path())
}

/// ffprobe candidates next to an ffmpeg binary, platform-suffixed first.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(windows) { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

pub fn resolve_ffprobe_path(ffmpeg_path: &Path) -> Result<PathBuf, AppError> {
    let candidates = ffprobe_candidates(ffmpeg_path);
    if let Some(found) = candidates.iter().find(|c| c.exists()) {
        return Ok(found.clone());
    }
    Err(AppError::FfmpegNotFound(format!(
        "ffprobe not found next to {} (tried {:?})",
        ffmpeg_path.display(),
        candidates
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ffprobe_candidates_plain_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/usr/bin/ffmpeg"));
        assert_eq!(candidates, vec![PathBuf::from("/usr/bin/ffprobe")]);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ffprobe_candidates_suffixed_ffmpeg() {
        let candidates = ffprobe_candidates(Path::new("/opt/bin/ffmpeg-x86_64-linux"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/bin/ffprobe-x86_64-linux"),
                PathBuf::from("/opt/bin/ffprobe"),
            ]
        );
    }

    #[test]
    fn explicit_path_wins_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"").expect("write fake binary");
        let resolved = resolve_ffmpeg_path(Some(&fake)).expect("resolve");
        assert_eq!(resolved, fake);
    }

    #[test]
    fn missing_ffprobe_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve_ffprobe_path(&dir.path().join("ffmpeg")).expect_err("no ffprobe");
        assert!(matches!(err, AppError::FfmpegNotFound(_)));
    }
}
