//! Job coordinator: validates submissions, fans versions out to workers and
//! folds their progress into the shared [`JobStore`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::Config;
use crate::encoder::Encoder;
use crate::error::AppError;
use crate::job::{Job, JobId, JobSnapshot, JobStatus, VersionStatus};
use crate::output::{self, Bundle, DownloadFile, OutputStore};
use crate::preset::{Preset, get_preset, list_presets};
use crate::retention::{self, RetentionPolicy, SweepReport};
use crate::store::JobStore;
use crate::worker::{VersionTask, VersionUpdate, run_version};

const EVENT_CAPACITY: usize = 256;

/// Which versions to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    /// The first N catalog presets.
    Count(usize),
    /// Explicit preset keys, in output order.
    Presets(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub source_path: PathBuf,
    pub original_name: String,
    pub request: VersionRequest,
}

/// Lifecycle notifications for observers such as the sidecar.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum JobEvent {
    #[serde(rename = "job.version.progress", rename_all = "camelCase")]
    VersionProgress {
        job_id: JobId,
        version_key: String,
        progress: u8,
    },
    #[serde(rename = "job.version.finished", rename_all = "camelCase")]
    VersionFinished {
        job_id: JobId,
        version_key: String,
        status: VersionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "job.finished", rename_all = "camelCase")]
    JobFinished { job_id: JobId, status: JobStatus },
}

#[derive(Clone)]
pub struct Coordinator {
    store: JobStore,
    outputs: OutputStore,
    encoder: Arc<dyn Encoder>,
    config: Arc<Config>,
    events: broadcast::Sender<JobEvent>,
}

impl Coordinator {
    pub fn new(config: Config, encoder: Arc<dyn Encoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: JobStore::new(),
            outputs: OutputStore::new(config.output_dir.clone()),
            encoder,
            config: Arc::new(config),
            events,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn outputs(&self) -> &OutputStore {
        &self.outputs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn resolve_versions(
        &self,
        request: &VersionRequest,
    ) -> Result<Vec<(&'static str, &'static Preset)>, AppError> {
        let (min, max) = (self.config.min_versions, self.config.max_versions);
        match request {
            VersionRequest::Count(count) => {
                if *count < min || *count > max {
                    return Err(AppError::InvalidCount {
                        requested: *count,
                        min,
                        max,
                    });
                }
                list_presets(*count)
            }
            VersionRequest::Presets(keys) => {
                if keys.len() < min || keys.len() > max {
                    return Err(AppError::InvalidCount {
                        requested: keys.len(),
                        min,
                        max,
                    });
                }
                let mut resolved = Vec::with_capacity(keys.len());
                for key in keys {
                    let found = get_preset(key)
                        .ok_or_else(|| AppError::intake(format!("unknown preset '{}'", key)))?;
                    if resolved.iter().any(|(k, _)| *k == found.0) {
                        return Err(AppError::intake(format!("duplicate preset '{}'", key)));
                    }
                    resolved.push(found);
                }
                Ok(resolved)
            }
        }
    }

    /// Register a job and start its versions. Returns as soon as the job is
    /// visible through [`Coordinator::status`]; nothing is registered when
    /// validation fails.
    pub async fn submit(&self, submission: Submission) -> Result<JobId, AppError> {
        let Submission {
            source_path,
            original_name,
            request,
        } = submission;

        match tokio::fs::metadata(&source_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(AppError::intake(format!(
                    "source is not a file: {}",
                    source_path.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::intake(format!(
                    "source file not found: {}",
                    source_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let versions = self.resolve_versions(&request)?;
        tokio::fs::create_dir_all(self.outputs.dir()).await?;
        let source_path = self.stage_source(source_path).await?;

        let job = Job::new(
            original_name,
            source_path.clone(),
            versions
                .iter()
                .map(|&(key, preset)| (key.to_string(), preset.name.to_string())),
            OffsetDateTime::now_utc(),
        );
        let job_id = job.id;
        let tasks: Vec<VersionTask> = versions
            .iter()
            .map(|&(key, preset)| VersionTask {
                job_id,
                key: key.to_string(),
                preset,
                source: source_path.clone(),
                output: self.outputs.version_path(&job_id, key),
                output_geometry: self.config.output_geometry,
                encode_timeout: self.config.encode_timeout,
            })
            .collect();
        self.store.insert(job);

        log::info!(
            target: "vari_vid::coordinator",
            "Submitted job {} with {} versions: {:?}",
            job_id,
            tasks.len(),
            tasks.iter().map(|t| t.key.as_str()).collect::<Vec<_>>()
        );
        tokio::spawn(self.clone().run_job(job_id, tasks));
        Ok(job_id)
    }

    /// Sources outside the upload dir are copied in first; the job only ever
    /// deletes its own copy.
    async fn stage_source(&self, source_path: PathBuf) -> Result<PathBuf, AppError> {
        let upload_dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(upload_dir).await?;
        if retention::is_inside(upload_dir, &source_path) {
            return Ok(source_path);
        }
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let staged = upload_dir.join(format!("{}_{}", uuid::Uuid::new_v4().simple(), file_name));
        tokio::fs::copy(&source_path, &staged).await?;
        log::info!(
            target: "vari_vid::coordinator",
            "Copied {} into {}",
            source_path.display(),
            staged.display()
        );
        Ok(staged)
    }

    async fn run_job(self, job_id: JobId, tasks: Vec<VersionTask>) {
        let mut workers = JoinSet::new();
        for task in tasks {
            let this = self.clone();
            workers.spawn(async move { this.run_tracked_version(task).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!(
                    target: "vari_vid::coordinator",
                    "Version worker for job {} ended abnormally: {}",
                    job_id,
                    e
                );
            }
        }

        let now = OffsetDateTime::now_utc();
        let finished = self.store.update(&job_id, |job| {
            let abandoned = job.abandon_unfinished("version worker stopped before finishing");
            job.refresh_status(now);
            (job.status, abandoned, job.source_path.clone())
        });
        let Some((status, abandoned, source_path)) = finished else {
            return;
        };
        if abandoned > 0 {
            log::warn!(
                target: "vari_vid::coordinator",
                "Job {}: {} versions never reported a result",
                job_id,
                abandoned
            );
        }
        log::info!(
            target: "vari_vid::coordinator",
            "Job {} finished: {:?}",
            job_id,
            status
        );
        let _ = self.events.send(JobEvent::JobFinished { job_id, status });

        tokio::time::sleep(self.config.source_grace).await;
        if !retention::is_inside(&self.config.upload_dir, &source_path) {
            log::warn!(
                target: "vari_vid::coordinator",
                "Keeping source {} of job {}: outside the upload dir",
                source_path.display(),
                job_id
            );
            return;
        }
        match tokio::fs::remove_file(&source_path).await {
            Ok(()) => log::debug!(
                target: "vari_vid::coordinator",
                "Removed source {} of job {}",
                source_path.display(),
                job_id
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "vari_vid::coordinator",
                "Failed to remove source {}: {}",
                source_path.display(),
                e
            ),
        }
    }

    /// Run one worker, applying its updates to its own slot only.
    async fn run_tracked_version(&self, task: VersionTask) {
        let (tx, mut rx) = unbounded_channel();
        let work = run_version(self.encoder.as_ref(), &task, &tx);
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                biased;
                Some(update) = rx.recv() => self.apply_update(&task, update),
                result = &mut work => break result,
            }
        };
        while let Ok(update) = rx.try_recv() {
            self.apply_update(&task, update);
        }

        let error = result.as_ref().err().map(ToString::to_string);
        match &result {
            Ok(output) => log::info!(
                target: "vari_vid::coordinator",
                "Job {} version {} completed: {} ({} bytes)",
                task.job_id,
                task.key,
                output.file_name,
                output.size_bytes
            ),
            Err(e) => log::error!(
                target: "vari_vid::coordinator",
                "Job {} version {} failed: {}",
                task.job_id,
                task.key,
                e
            ),
        }

        let now = OffsetDateTime::now_utc();
        let status = self.store.update(&task.job_id, |job| {
            let version = job.version_mut(&task.key)?;
            match result {
                Ok(output) => version.complete(output),
                Err(e) => version.fail(e.to_string()),
            }
            let status = version.status;
            job.refresh_status(now);
            Some(status)
        });
        if let Some(Some(status)) = status {
            let _ = self.events.send(JobEvent::VersionFinished {
                job_id: task.job_id,
                version_key: task.key.clone(),
                status,
                error,
            });
        }
    }

    fn apply_update(&self, task: &VersionTask, update: VersionUpdate) {
        let changed = self.store.update(&task.job_id, |job| {
            let version = job.version_mut(&task.key)?;
            let before = version.progress;
            match update {
                VersionUpdate::Started => version.mark_processing(),
                VersionUpdate::Progress(percent) => version.record_progress(percent),
            }
            (version.progress != before).then_some(version.progress)
        });
        if let Some(Some(progress)) = changed {
            let _ = self.events.send(JobEvent::VersionProgress {
                job_id: task.job_id,
                version_key: task.key.clone(),
                progress,
            });
        }
    }

    pub fn status(&self, job_id: &JobId) -> Result<JobSnapshot, AppError> {
        self.store.snapshot(job_id)
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.store.snapshots()
    }

    pub fn download(&self, job_id: &JobId, key: &str) -> Result<DownloadFile, AppError> {
        output::download(&self.store, job_id, key)
    }

    pub async fn download_all(&self, job_id: &JobId) -> Result<Bundle, AppError> {
        output::download_all(&self.store, &self.outputs, job_id).await
    }

    /// One retention pass at the current time.
    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        let store = self.store.clone();
        let outputs = self.outputs.clone();
        let upload_dir = self.config.upload_dir.clone();
        let policy = RetentionPolicy::from(self.config.as_ref());
        tokio::task::spawn_blocking(move || {
            retention::sweep(&store, &outputs, &upload_dir, policy, OffsetDateTime::now_utc())
        })
        .await
        .map_err(|e| AppError::from(e.to_string()))
    }

    /// Sweep every `sweep_interval` until the handle is aborted.
    pub fn spawn_retention_loop(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = this.sweep().await {
                    log::error!(target: "vari_vid::coordinator", "Retention sweep failed: {}", e);
                }
            }
        })
    }
}
