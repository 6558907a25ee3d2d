//! In-memory job registry shared by the coordinator, download paths and retention.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::error::AppError;
use crate::job::{Job, JobId, JobSnapshot};

/// Cheap to clone; all clones see the same jobs.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.write().insert(id, job);
        id
    }

    pub fn snapshot(&self, id: &JobId) -> Result<JobSnapshot, AppError> {
        self.jobs
            .read()
            .get(id)
            .map(Job::snapshot)
            .ok_or_else(|| AppError::not_found(format!("job {}", id)))
    }

    /// Snapshots of every job, oldest first.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self.jobs.read().values().map(Job::snapshot).collect();
        all.sort_by_key(|s| s.job.created_at);
        all
    }

    /// Mutate a job under the write lock. `None` when the job is gone.
    pub fn update<R>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.jobs.write().get_mut(id).map(f)
    }

    pub fn remove(&self, id: &JobId) -> Option<Job> {
        self.jobs.write().remove(id)
    }

    /// Remove and return finished jobs whose completion is older than `retention`.
    pub fn take_expired(&self, now: OffsetDateTime, retention: Duration) -> Vec<Job> {
        let mut jobs = self.jobs.write();
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| {
                job.completed_at
                    .is_some_and(|done| (now - done) >= retention)
            })
            .map(|job| job.id)
            .collect();
        expired.into_iter().filter_map(|id| jobs.remove(&id)).collect()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.read().keys().copied().collect()
    }

    /// Source and output paths still owned by registered jobs.
    pub fn live_paths(&self) -> HashSet<PathBuf> {
        let jobs = self.jobs.read();
        let mut paths = HashSet::new();
        for job in jobs.values() {
            paths.insert(job.source_path.clone());
            paths.extend(job.output_paths().cloned());
        }
        paths
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
