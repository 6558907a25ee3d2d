//! The external encoder capability. Workers only see the [`Encoder`] trait;
//! [`FfmpegEncoder`] drives real ffmpeg/ffprobe binaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::AppError;
use crate::ffmpeg::discovery::{resolve_ffmpeg_path, resolve_ffprobe_path};
use crate::ffmpeg::{
    ChildSlot, EncodeProfile, ProgressCallback, SourceInfo, build_ffmpeg_command,
    format_args_for_display_multiline, path_to_string, probe_source, run_ffmpeg_blocking,
};
use crate::plan::TranscodePlan;

/// One encode: a source, a destination and the plan connecting them.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub plan: TranscodePlan,
    pub source: SourceInfo,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<SourceInfo, AppError>;

    /// Produce `request.output`. `progress` receives output-timeline fractions in [0,1].
    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressCallback,
    ) -> Result<(), AppError>;
}

/// Kills the child when the owning future is dropped, e.g. on timeout.
struct KillOnDrop(ChildSlot);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        self.0.kill();
    }
}

pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    profile: EncodeProfile,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            profile: EncodeProfile::default(),
        }
    }

    /// Locate binaries using the configured override, `FFMPEG_PATH`, then `PATH`.
    pub fn discover(config: &Config) -> Result<Arc<Self>, AppError> {
        let ffmpeg = resolve_ffmpeg_path(config.ffmpeg_path.as_deref())?;
        let ffprobe = resolve_ffprobe_path(&ffmpeg)?;
        log::info!(
            target: "vari_vid::encoder",
            "Using ffmpeg={} ffprobe={}",
            ffmpeg.display(),
            ffprobe.display()
        );
        Ok(Arc::new(Self::new(ffmpeg, ffprobe)))
    }

    pub fn profile(&self) -> &EncodeProfile {
        &self.profile
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn probe(&self, path: &Path) -> Result<SourceInfo, AppError> {
        let ffprobe = self.ffprobe.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_source(&ffprobe, &path))
            .await
            .map_err(|e| AppError::from(e.to_string()))?
    }

    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressCallback,
    ) -> Result<(), AppError> {
        let args = build_ffmpeg_command(
            &path_to_string(&request.input),
            &path_to_string(&request.output),
            &request.plan,
            request.source.has_audio,
            &self.profile,
        );
        log::debug!(
            target: "vari_vid::encoder",
            "FFmpeg args:\n{}",
            format_args_for_display_multiline(&args)
        );

        let output_duration = request.plan.output_duration(request.source.duration);
        let speed = request.plan.speed;
        let ffmpeg = self.ffmpeg.clone();
        let slot = ChildSlot::default();
        let guard = KillOnDrop(slot.clone());

        let result = tokio::task::spawn_blocking(move || {
            run_ffmpeg_blocking(&ffmpeg, args, output_duration, speed, Some(progress), &slot)
        })
        .await;
        drop(guard);

        match result {
            Ok(outcome) => outcome,
            Err(join_err) => Err(AppError::from(join_err.to_string())),
        }
    }
}
