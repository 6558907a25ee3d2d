//! Reaps expired jobs and stray files from the working directories.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use time::OffsetDateTime;

use crate::config::Config;
use crate::output::OutputStore;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub job_retention: Duration,
    pub stray_file_age: Duration,
}

impl From<&Config> for RetentionPolicy {
    fn from(config: &Config) -> Self {
        Self {
            job_retention: config.job_retention,
            stray_file_age: config.stray_file_age,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub reaped_jobs: usize,
    pub removed_files: usize,
}

/// One retention pass. Expired jobs leave the registry before their files are
/// deleted, so no reader can be handed a path that is about to disappear.
/// Blocking; the coordinator runs it on the blocking pool.
pub fn sweep(
    store: &JobStore,
    outputs: &OutputStore,
    upload_dir: &Path,
    policy: RetentionPolicy,
    now: OffsetDateTime,
) -> SweepReport {
    let mut report = SweepReport::default();

    for job in store.take_expired(now, policy.job_retention) {
        report.reaped_jobs += 1;
        report.removed_files += outputs.remove_job_files(&job);
        if is_inside(upload_dir, &job.source_path) && remove_quietly(&job.source_path) {
            report.removed_files += 1;
        }
        log::info!(
            target: "vari_vid::retention",
            "Reaped job {} ({:?}, completed {:?})",
            job.id,
            job.status,
            job.completed_at
        );
    }

    let mut live = store.live_paths();
    live.extend(store.ids().iter().map(|id| outputs.bundle_path(id)));
    let now = SystemTime::from(now);
    for dir in [upload_dir, outputs.dir()] {
        report.removed_files += remove_stray_files(dir, policy.stray_file_age, now, &live);
    }

    if report != SweepReport::default() {
        log::info!(
            target: "vari_vid::retention",
            "Sweep removed {} jobs and {} files",
            report.reaped_jobs,
            report.removed_files
        );
    }
    report
}

/// Whether `path` resolves to somewhere under `dir`. False when either side
/// cannot be resolved.
pub fn is_inside(dir: &Path, path: &Path) -> bool {
    match (fs::canonicalize(dir), fs::canonicalize(path)) {
        (Ok(dir), Ok(path)) => path.starts_with(dir),
        _ => false,
    }
}

/// Delete regular files in `dir` older than `max_age` that no live job owns.
pub fn remove_stray_files(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
    live: &HashSet<PathBuf>,
) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            log::warn!(
                target: "vari_vid::retention",
                "Cannot scan {}: {}",
                dir.display(),
                e
            );
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if live.contains(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Ok(modified) = meta.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age && remove_quietly(&path) {
            log::debug!(
                target: "vari_vid::retention",
                "Removed stray file {} (age {}s)",
                path.display(),
                age.as_secs()
            );
            removed += 1;
        }
    }
    removed
}

fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!(
                target: "vari_vid::retention",
                "Failed to remove {}: {}",
                path.display(),
                e
            );
            false
        }
    }
}
