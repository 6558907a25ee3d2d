//! Output files on disk: naming, single downloads and the all-versions bundle.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::job::{Job, JobId, JobStatus, VersionStatus};
use crate::store::JobStore;

#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version_path(&self, job_id: &JobId, key: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.mp4", job_id, key))
    }

    pub fn bundle_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}_all.tar", job_id))
    }

    /// Delete a job's version outputs and bundle. Returns how many files were removed.
    pub fn remove_job_files(&self, job: &Job) -> usize {
        let bundle = self.bundle_path(&job.id);
        job.output_paths()
            .map(PathBuf::as_path)
            .chain(std::iter::once(bundle.as_path()))
            .filter(|path| remove_if_present(path))
            .count()
    }
}

fn remove_if_present(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!(
                target: "vari_vid::output",
                "Failed to remove {}: {}",
                path.display(),
                e
            );
            false
        }
    }
}

/// A file ready to be streamed to a caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

impl DownloadFile {
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Bundle {
    /// Single-version jobs hand out the one output directly.
    Single(DownloadFile),
    Archive(DownloadFile),
}

impl Bundle {
    pub fn file(&self) -> &DownloadFile {
        match self {
            Bundle::Single(file) | Bundle::Archive(file) => file,
        }
    }
}

/// One completed version. NotFound for unknown job or key, NotReady until it completes.
pub fn download(store: &JobStore, job_id: &JobId, key: &str) -> Result<DownloadFile, AppError> {
    let snapshot = store.snapshot(job_id)?;
    let version = snapshot
        .job
        .version(key)
        .ok_or_else(|| AppError::not_found(format!("version {} of job {}", key, job_id)))?;

    let output = match (version.status, version.output.as_ref()) {
        (VersionStatus::Completed, Some(output)) => output,
        (status, _) => {
            return Err(AppError::not_ready(format!(
                "version {} is {}",
                key,
                status_label(status)
            )));
        }
    };
    if !output.path.exists() {
        return Err(AppError::not_found(format!(
            "output file for version {} of job {}",
            key, job_id
        )));
    }
    Ok(DownloadFile {
        path: output.path.clone(),
        file_name: output.file_name.clone(),
        size_bytes: output.size_bytes,
    })
}

fn status_label(status: VersionStatus) -> &'static str {
    match status {
        VersionStatus::Pending => "pending",
        VersionStatus::Processing => "processing",
        VersionStatus::Completed => "completed",
        VersionStatus::Failed => "failed",
    }
}

/// Every completed version of a finished job. Tar entries are named `{key}.mp4`.
pub async fn download_all(
    store: &JobStore,
    outputs: &OutputStore,
    job_id: &JobId,
) -> Result<Bundle, AppError> {
    let snapshot = store.snapshot(job_id)?;
    let job = snapshot.job;
    if job.status == JobStatus::Processing {
        return Err(AppError::not_ready(format!("job {} is still processing", job_id)));
    }

    if let [only] = job.versions.as_slice() {
        return download(store, job_id, &only.key).map(Bundle::Single);
    }

    let entries: Vec<(String, PathBuf)> = job
        .versions
        .iter()
        .filter(|v| v.state.status == VersionStatus::Completed)
        .filter_map(|v| {
            v.state
                .output
                .as_ref()
                .map(|o| (format!("{}.mp4", v.key), o.path.clone()))
        })
        .collect();
    if entries.is_empty() {
        return Err(AppError::not_ready(format!(
            "job {} has no completed versions",
            job_id
        )));
    }

    let path = outputs.bundle_path(job_id);
    let bundle_path = path.clone();
    let entry_count = entries.len();
    let size_bytes = tokio::task::spawn_blocking(move || write_bundle(&bundle_path, &entries))
        .await
        .map_err(|e| AppError::from(e.to_string()))??;
    log::info!(
        target: "vari_vid::output",
        "Bundled {} versions of job {} into {} ({} bytes)",
        entry_count,
        job_id,
        path.display(),
        size_bytes
    );

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Bundle::Archive(DownloadFile {
        path,
        file_name,
        size_bytes,
    }))
}

/// Write the archive beside its final path, then rename into place. Each call
/// writes its own partial file so concurrent callers never share one.
fn write_bundle(path: &Path, entries: &[(String, PathBuf)]) -> io::Result<u64> {
    if let Ok(meta) = fs::metadata(path) {
        return Ok(meta.len());
    }
    let partial = path.with_extension(format!("tar.{}.partial", uuid::Uuid::new_v4().simple()));
    let result = (|| -> io::Result<u64> {
        let mut builder = tar::Builder::new(BufWriter::new(File::create(&partial)?));
        for (name, source) in entries {
            builder.append_path_with_name(source, name)?;
        }
        builder.into_inner()?.flush()?;
        fs::rename(&partial, path)?;
        Ok(fs::metadata(path)?.len())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::OutputDescriptor;
    use time::OffsetDateTime;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: JobStore,
        outputs: OutputStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let outputs = OutputStore::new(dir.path());
        Fixture {
            store: JobStore::new(),
            outputs,
            _dir: dir,
        }
    }

    fn insert_job(f: &Fixture, keys: &[&str]) -> JobId {
        f.store.insert(Job::new(
            "clip.mp4",
            f.outputs.dir().join("clip.mp4"),
            keys.iter().map(|k| (k.to_string(), k.to_string())),
            OffsetDateTime::UNIX_EPOCH,
        ))
    }

    fn complete(f: &Fixture, id: &JobId, key: &str) {
        let path = f.outputs.version_path(id, key);
        fs::write(&path, key.as_bytes()).expect("write output");
        f.store.update(id, |job| {
            job.version_mut(key).unwrap().complete(OutputDescriptor {
                file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
                size_bytes: key.len() as u64,
                path: path.clone(),
            });
            job.refresh_status(OffsetDateTime::UNIX_EPOCH);
        });
    }

    fn fail(f: &Fixture, id: &JobId, key: &str) {
        f.store.update(id, |job| {
            job.version_mut(key).unwrap().fail("encoder exploded");
            job.refresh_status(OffsetDateTime::UNIX_EPOCH);
        });
    }

    #[test]
    fn names_are_collision_free() {
        let outputs = OutputStore::new("/out");
        let id = uuid::Uuid::nil();
        assert_eq!(
            outputs.version_path(&id, "warm"),
            PathBuf::from("/out/00000000-0000-0000-0000-000000000000_warm.mp4")
        );
        assert_eq!(
            outputs.bundle_path(&id),
            PathBuf::from("/out/00000000-0000-0000-0000-000000000000_all.tar")
        );
    }

    #[test]
    fn download_unknown_job_or_key_is_not_found() {
        let f = fixture();
        let id = insert_job(&f, &["warm"]);
        assert!(matches!(
            download(&f.store, &uuid::Uuid::new_v4(), "warm"),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            download(&f.store, &id, "sepia"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn download_incomplete_version_is_not_ready() {
        let f = fixture();
        let id = insert_job(&f, &["warm", "cool"]);
        f.store
            .update(&id, |j| j.version_mut("warm").unwrap().record_progress(40));
        assert!(matches!(
            download(&f.store, &id, "warm"),
            Err(AppError::NotReady(_))
        ));
        fail(&f, &id, "cool");
        assert!(matches!(
            download(&f.store, &id, "cool"),
            Err(AppError::NotReady(_))
        ));
    }

    #[test]
    fn download_completed_version() {
        let f = fixture();
        let id = insert_job(&f, &["warm"]);
        complete(&f, &id, "warm");
        let file = download(&f.store, &id, "warm").expect("download");
        assert_eq!(file.file_name, format!("{}_warm.mp4", id));
        assert_eq!(file.size_bytes, 4);
    }

    #[tokio::test]
    async fn download_all_waits_for_job_to_finish() {
        let f = fixture();
        let id = insert_job(&f, &["warm", "cool"]);
        complete(&f, &id, "warm");
        let err = download_all(&f.store, &f.outputs, &id).await.expect_err("processing");
        assert!(matches!(err, AppError::NotReady(_)));
    }

    #[tokio::test]
    async fn download_all_single_version_returns_the_file() {
        let f = fixture();
        let id = insert_job(&f, &["warm"]);
        complete(&f, &id, "warm");
        let bundle = download_all(&f.store, &f.outputs, &id).await.expect("bundle");
        assert!(matches!(bundle, Bundle::Single(_)));
        assert_eq!(bundle.file().path, f.outputs.version_path(&id, "warm"));
    }

    #[tokio::test]
    async fn download_all_archives_only_completed_versions() {
        let f = fixture();
        let id = insert_job(&f, &["warm", "cool", "vivid"]);
        complete(&f, &id, "warm");
        fail(&f, &id, "cool");
        complete(&f, &id, "vivid");

        let bundle = download_all(&f.store, &f.outputs, &id).await.expect("bundle");
        let Bundle::Archive(file) = bundle else {
            panic!("expected archive");
        };
        assert_eq!(file.file_name, format!("{}_all.tar", id));

        let mut archive = tar::Archive::new(File::open(&file.path).expect("open tar"));
        let mut names: Vec<String> = archive
            .entries()
            .expect("entries")
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["vivid.mp4", "warm.mp4"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_download_all_calls_share_one_bundle() {
        let f = fixture();
        let keys = ["subtle", "warm", "cool", "vivid", "cinematic"];
        let id = insert_job(&f, &keys);
        for key in keys {
            complete(&f, &id, key);
            fs::write(f.outputs.version_path(&id, key), vec![7u8; 2 << 20]).expect("grow output");
        }

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let store = f.store.clone();
                let outputs = f.outputs.clone();
                tokio::spawn(async move { download_all(&store, &outputs, &id).await })
            })
            .collect();
        for call in calls {
            let bundle = call.await.expect("join").expect("bundle");
            assert_eq!(bundle.file().path, f.outputs.bundle_path(&id));
        }

        let mut archive = tar::Archive::new(File::open(f.outputs.bundle_path(&id)).expect("open"));
        assert_eq!(archive.entries().expect("entries").count(), 5);
        let leftovers = fs::read_dir(f.outputs.dir())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn download_all_with_nothing_completed_is_not_ready() {
        let f = fixture();
        let id = insert_job(&f, &["warm", "cool"]);
        fail(&f, &id, "warm");
        fail(&f, &id, "cool");
        let err = download_all(&f.store, &f.outputs, &id).await.expect_err("nothing");
        assert!(matches!(err, AppError::NotReady(_)));
    }

    #[test]
    fn remove_job_files_deletes_outputs_and_bundle() {
        let f = fixture();
        let id = insert_job(&f, &["warm", "cool"]);
        complete(&f, &id, "warm");
        complete(&f, &id, "cool");
        fs::write(f.outputs.bundle_path(&id), b"tar").expect("bundle");
        let job = f.store.remove(&id).expect("job");

        assert_eq!(f.outputs.remove_job_files(&job), 3);
        assert!(!f.outputs.version_path(&id, "warm").exists());
        assert!(!f.outputs.bundle_path(&id).exists());
    }
}
