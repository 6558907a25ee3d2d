#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use vari_vid_core::ffmpeg::discovery::{get_ffmpeg_path, resolve_ffprobe_path};
use vari_vid_core::ffmpeg::{SourceInfo, probe_source};
use vari_vid_core::{Config, Coordinator, JobId, JobSnapshot};

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = get_ffmpeg_path().expect("FFmpeg not found").to_path_buf();
        let ffprobe = resolve_ffprobe_path(&ffmpeg).expect("ffprobe not found");
        let dir = tempfile::tempdir().expect("tempdir");
        Self {
            ffmpeg,
            ffprobe,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Small output frame so real encodes finish quickly.
    pub fn config(&self) -> Config {
        Config {
            upload_dir: self.path("uploads"),
            output_dir: self.path("outputs"),
            source_grace: Duration::from_millis(50),
            output_geometry: vari_vid_core::plan::Geometry::new(320, 180),
            ffmpeg_path: Some(self.ffmpeg.clone()),
            ..Config::default()
        }
    }

    pub fn with_test_video(&self, name: &str, duration_secs: f32, with_audio: bool) -> PathBuf {
        std::fs::create_dir_all(self.path("uploads")).expect("uploads dir");
        let output = self.path("uploads").join(name);
        let status = create_test_video(&self.ffmpeg, &output, duration_secs, with_audio)
            .expect("failed to spawn ffmpeg");
        assert!(status.success(), "ffmpeg failed to create test video");
        output
    }

    pub fn probe(&self, path: &Path) -> SourceInfo {
        probe_source(&self.ffprobe, path).expect("probe output")
    }
}

pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    with_audio: bool,
) -> std::io::Result<ExitStatus> {
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_secs),
    ];
    if with_audio {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency=440:duration={}", duration_secs),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
        ]);
    }
    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.to_string_lossy().to_string(),
    ]);

    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

pub async fn wait_finished(coordinator: &Coordinator, id: &JobId, limit: Duration) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let snapshot = coordinator.status(id).expect("status");
        if snapshot.job.is_finished() {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still processing after {limit:?}: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
