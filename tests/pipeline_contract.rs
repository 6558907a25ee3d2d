//! Drives the public pipeline API with an in-test encoder, no FFmpeg needed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vari_vid_core::error::AppError;
use vari_vid_core::ffmpeg::{ProgressCallback, SourceInfo};
use vari_vid_core::output::Bundle;
use vari_vid_core::{
    Config, Coordinator, Encoder, JobId, JobSnapshot, JobStatus, Submission, TranscodeRequest,
    VersionRequest,
};

/// Copies the source to the output and records the filters it was asked to apply.
#[derive(Default)]
struct CopyEncoder {
    filters: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Encoder for CopyEncoder {
    async fn probe(&self, _path: &Path) -> Result<SourceInfo, AppError> {
        Ok(SourceInfo {
            width: 1000,
            height: 800,
            duration: 8.0,
            has_audio: true,
            video_codec: None,
        })
    }

    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressCallback,
    ) -> Result<(), AppError> {
        self.filters
            .lock()
            .push((request.plan.video_filter(), request.plan.audio_filter()));
        progress(0.5);
        tokio::fs::copy(&request.input, &request.output).await?;
        Ok(())
    }
}

fn config(dir: &Path) -> Config {
    Config {
        upload_dir: dir.join("uploads"),
        output_dir: dir.join("outputs"),
        source_grace: Duration::from_secs(60),
        ..Config::default()
    }
}

async fn wait_finished(coordinator: &Coordinator, id: &JobId) -> JobSnapshot {
    for _ in 0..500 {
        let snapshot = coordinator.status(id).expect("status");
        if snapshot.job.is_finished() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn five_versions_get_distinct_filter_graphs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path());
    config.ensure_dirs().expect("dirs");
    let source = config.upload_dir.join("clip.mp4");
    std::fs::write(&source, b"pretend this is video").expect("source");

    let encoder = Arc::new(CopyEncoder::default());
    let coordinator = Coordinator::new(config, encoder.clone());
    let id = coordinator
        .submit(Submission {
            source_path: source,
            original_name: "clip.mp4".into(),
            request: VersionRequest::Count(5),
        })
        .await
        .expect("submit");

    let snapshot = wait_finished(&coordinator, &id).await;
    assert_eq!(snapshot.job.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100.0);

    let filters = encoder.filters.lock().clone();
    assert_eq!(filters.len(), 5);
    let mut video: Vec<&str> = filters.iter().map(|(v, _)| v.as_str()).collect();
    video.sort_unstable();
    video.dedup();
    assert_eq!(video.len(), 5, "every preset should produce its own graph");
    assert!(video.iter().any(|vf| vf.starts_with("crop=900:720:50:40,")));

    let Bundle::Archive(bundle) = coordinator.download_all(&id).await.expect("bundle") else {
        panic!("five versions should bundle into an archive");
    };
    let mut archive = tar::Archive::new(std::fs::File::open(&bundle.path).expect("open"));
    assert_eq!(archive.entries().expect("entries").count(), 5);
}

#[tokio::test]
async fn status_serializes_for_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path());
    config.ensure_dirs().expect("dirs");
    let source = config.upload_dir.join("clip.mp4");
    std::fs::write(&source, b"video").expect("source");

    let coordinator = Coordinator::new(config, Arc::new(CopyEncoder::default()));
    let id = coordinator
        .submit(Submission {
            source_path: source,
            original_name: "clip.mp4".into(),
            request: VersionRequest::Presets(vec!["vivid".into(), "cool".into()]),
        })
        .await
        .expect("submit");
    let snapshot = wait_finished(&coordinator, &id).await;

    let value = serde_json::to_value(&snapshot).expect("serialize");
    assert_eq!(value["id"], id.to_string());
    assert_eq!(value["status"], "completed");
    assert_eq!(value["versionCount"], 2);
    assert_eq!(value["versions"][0]["key"], "vivid");
    assert_eq!(value["versions"][0]["progress"], 100);
    assert_eq!(
        value["versions"][1]["output"]["fileName"],
        format!("{}_cool.mp4", id)
    );
    assert!(value["completedAt"].is_string());
}
