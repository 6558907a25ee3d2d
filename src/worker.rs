//! Produces a single version: probe, plan, encode, describe the output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::encoder::{Encoder, TranscodeRequest};
use crate::error::AppError;
use crate::ffmpeg::{ProgressCallback, fraction_to_percent};
use crate::job::{JobId, OutputDescriptor};
use crate::plan::{Geometry, build_plan_for_output};
use crate::preset::Preset;

#[derive(Debug, Clone)]
pub struct VersionTask {
    pub job_id: JobId,
    pub key: String,
    pub preset: &'static Preset,
    pub source: PathBuf,
    pub output: PathBuf,
    pub output_geometry: Geometry,
    pub encode_timeout: Option<Duration>,
}

/// Messages a worker sends about its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionUpdate {
    Started,
    /// Percent in 0..=99; completion is reported by the worker's return value.
    Progress(u8),
}

pub async fn run_version(
    encoder: &dyn Encoder,
    task: &VersionTask,
    updates: &UnboundedSender<VersionUpdate>,
) -> Result<OutputDescriptor, AppError> {
    let _ = updates.send(VersionUpdate::Started);

    let result = encode_version(encoder, task, updates).await;
    if result.is_err() {
        match tokio::fs::remove_file(&task.output).await {
            Ok(()) => log::debug!(
                target: "vari_vid::worker",
                "Removed partial output {}",
                task.output.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "vari_vid::worker",
                "Failed to remove partial output {}: {}",
                task.output.display(),
                e
            ),
        }
    }
    result
}

async fn encode_version(
    encoder: &dyn Encoder,
    task: &VersionTask,
    updates: &UnboundedSender<VersionUpdate>,
) -> Result<OutputDescriptor, AppError> {
    let source = within_limit(task.encode_timeout, encoder.probe(&task.source)).await?;
    let plan = build_plan_for_output(
        task.preset,
        Geometry::new(source.width, source.height),
        task.output_geometry,
    );
    log::info!(
        target: "vari_vid::worker",
        "job={} version={} source={}x{} {:.1}s audio={} vf={}",
        task.job_id,
        task.key,
        source.width,
        source.height,
        source.duration,
        source.has_audio,
        plan.video_filter()
    );

    let sender = updates.clone();
    let progress: ProgressCallback = Arc::new(move |fraction| {
        let _ = sender.send(VersionUpdate::Progress(fraction_to_percent(fraction)));
    });
    let request = TranscodeRequest {
        input: task.source.clone(),
        output: task.output.clone(),
        plan,
        source,
    };

    within_limit(task.encode_timeout, encoder.transcode(request, progress)).await?;

    let meta = tokio::fs::metadata(&task.output).await?;
    let file_name = task
        .output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(OutputDescriptor {
        file_name,
        size_bytes: meta.len(),
        path: task.output.clone(),
    })
}

/// Dropping `work` on expiry is what stops it; see `KillOnDrop` in the encoder.
async fn within_limit<T>(
    limit: Option<Duration>,
    work: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| AppError::EncodeTimeout(limit))?,
        None => work.await,
    }
}
