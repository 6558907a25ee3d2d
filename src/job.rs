//! Job and version state. All transitions go through methods here so the
//! progress and status invariants hold no matter who drives them.

use std::path::PathBuf;

use time::OffsetDateTime;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VersionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionState {
    pub preset_name: String,
    pub status: VersionStatus,
    /// 0..=99 while running, exactly 100 once completed.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VersionState {
    pub fn pending(preset_name: impl Into<String>) -> Self {
        Self {
            preset_name: preset_name.into(),
            status: VersionStatus::Pending,
            progress: 0,
            output: None,
            error: None,
        }
    }

    pub fn mark_processing(&mut self) {
        if self.status == VersionStatus::Pending {
            self.status = VersionStatus::Processing;
        }
    }

    /// Monotonic, capped at 99. Ignored once the version is terminal.
    pub fn record_progress(&mut self, percent: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.mark_processing();
        self.progress = self.progress.max(percent.min(99));
    }

    pub fn complete(&mut self, output: OutputDescriptor) {
        self.status = VersionStatus::Completed;
        self.progress = 100;
        self.output = Some(output);
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = VersionStatus::Failed;
        self.error = Some(error.into());
        self.output = None;
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSlot {
    pub key: String,
    #[serde(flatten)]
    pub state: VersionState,
}

/// Job status from its version statuses. `Processing` while anything is
/// still pending or running, then `Completed` only if nothing failed.
pub fn derive_job_status<'a>(statuses: impl IntoIterator<Item = &'a VersionStatus>) -> JobStatus {
    let mut any_failed = false;
    for status in statuses {
        match status {
            VersionStatus::Pending | VersionStatus::Processing => return JobStatus::Processing,
            VersionStatus::Failed => any_failed = true,
            VersionStatus::Completed => {}
        }
    }
    if any_failed {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub original_name: String,
    #[serde(skip)]
    pub source_path: PathBuf,
    pub version_count: usize,
    pub status: JobStatus,
    /// Ordered by request; keys are unique within a job.
    pub versions: Vec<VersionSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
}

impl Job {
    /// New job with one pending slot per `(key, preset name)`.
    pub fn new(
        original_name: impl Into<String>,
        source_path: PathBuf,
        versions: impl IntoIterator<Item = (String, String)>,
        now: OffsetDateTime,
    ) -> Self {
        let versions: Vec<VersionSlot> = versions
            .into_iter()
            .map(|(key, name)| VersionSlot {
                key,
                state: VersionState::pending(name),
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            original_name: original_name.into(),
            source_path,
            version_count: versions.len(),
            status: JobStatus::Processing,
            versions,
            error: None,
            completed_at: None,
        }
    }

    pub fn version(&self, key: &str) -> Option<&VersionState> {
        self.versions
            .iter()
            .find(|slot| slot.key == key)
            .map(|slot| &slot.state)
    }

    pub fn version_mut(&mut self, key: &str) -> Option<&mut VersionState> {
        self.versions
            .iter_mut()
            .find(|slot| slot.key == key)
            .map(|slot| &mut slot.state)
    }

    /// Arithmetic mean of version progress, in [0, 100].
    pub fn progress(&self) -> f64 {
        if self.versions.is_empty() {
            return 0.0;
        }
        let total: u32 = self.versions.iter().map(|v| u32::from(v.state.progress)).sum();
        f64::from(total) / self.versions.len() as f64
    }

    pub fn is_finished(&self) -> bool {
        self.status != JobStatus::Processing
    }

    /// Re-derive status from versions; stamps `completed_at` on the first
    /// transition to a terminal status.
    pub fn refresh_status(&mut self, now: OffsetDateTime) {
        self.status = derive_job_status(self.versions.iter().map(|v| &v.state.status));
        match self.status {
            JobStatus::Processing => {}
            JobStatus::Completed => {
                self.completed_at.get_or_insert(now);
            }
            JobStatus::Failed => {
                self.completed_at.get_or_insert(now);
                if self.error.is_none() {
                    let failed = self
                        .versions
                        .iter()
                        .filter(|v| v.state.status == VersionStatus::Failed)
                        .count();
                    self.error = Some(format!(
                        "{} of {} versions failed",
                        failed,
                        self.versions.len()
                    ));
                }
            }
        }
    }

    /// Fail every non-terminal version. Used when a worker ended without
    /// reporting, so the job can still reach a terminal status.
    pub fn abandon_unfinished(&mut self, reason: &str) -> usize {
        let mut abandoned = 0;
        for slot in &mut self.versions {
            if !slot.state.status.is_terminal() {
                slot.state.fail(reason);
                abandoned += 1;
            }
        }
        abandoned
    }

    pub fn output_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.versions
            .iter()
            .filter_map(|v| v.state.output.as_ref().map(|o| &o.path))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            progress: self.progress(),
            job: self.clone(),
        }
    }
}

/// Read view handed to callers; detached from the store.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    pub progress: f64,
}
