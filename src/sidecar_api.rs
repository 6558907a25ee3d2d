//! Method table behind the JSON-lines sidecar. The binary owns framing and
//! stdout; everything here takes params as JSON and returns JSON.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::Config;
use crate::coordinator::{Coordinator, Submission, VersionRequest};
use crate::error::AppError;
use crate::job::JobId;
use crate::preset::{Preset, catalog, list_presets};
use crate::retention::remove_stray_files;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PresetsListParams {
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    input_path: PathBuf,
    original_name: Option<String>,
    version_count: Option<usize>,
    presets: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    job_id: JobId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams {
    job_id: JobId,
    version_key: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetEntry {
    pub key: &'static str,
    #[serde(flatten)]
    pub preset: &'static Preset,
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    // Methods without params may omit the field entirely.
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_value<T: serde::Serialize>(what: &str, value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

impl SubmitParams {
    fn into_submission(self) -> Result<Submission, AppError> {
        let request = match (self.version_count, self.presets) {
            (Some(_), Some(_)) => {
                return Err(AppError::intake("pass either versionCount or presets, not both"));
            }
            (Some(count), None) => VersionRequest::Count(count),
            (None, Some(keys)) => VersionRequest::Presets(keys),
            (None, None) => return Err(AppError::intake("versionCount or presets is required")),
        };
        let original_name = self
            .original_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| {
                self.input_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        Ok(Submission {
            source_path: self.input_path,
            original_name,
            request,
        })
    }
}

pub async fn dispatch(
    coordinator: &Coordinator,
    method: &str,
    params: Value,
) -> Result<Value, AppError> {
    match method {
        "app.info" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "version": env!("CARGO_PKG_VERSION"),
            "minVersions": coordinator.config().min_versions,
            "maxVersions": coordinator.config().max_versions,
        })),
        "presets.list" => {
            let parsed: PresetsListParams = params_from_value(params)?;
            let presets = match parsed.count {
                Some(count) => list_presets(count)?,
                None => catalog().collect(),
            };
            let entries: Vec<PresetEntry> = presets
                .into_iter()
                .map(|(key, preset)| PresetEntry { key, preset })
                .collect();
            to_value("presets", entries)
        }
        "job.submit" => {
            let parsed: SubmitParams = params_from_value(params)?;
            let job_id = coordinator.submit(parsed.into_submission()?).await?;
            Ok(json!({ "jobId": job_id }))
        }
        "job.status" => {
            let parsed: JobParams = params_from_value(params)?;
            to_value("job status", coordinator.status(&parsed.job_id)?)
        }
        "job.list" => to_value("job list", coordinator.list_jobs()),
        "job.download" => {
            let parsed: DownloadParams = params_from_value(params)?;
            to_value(
                "download",
                coordinator.download(&parsed.job_id, &parsed.version_key)?,
            )
        }
        "job.downloadAll" => {
            let parsed: JobParams = params_from_value(params)?;
            to_value("bundle", coordinator.download_all(&parsed.job_id).await?)
        }
        "job.sweep" => to_value("sweep report", coordinator.sweep().await?),
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

/// Remove leftovers from earlier runs. No jobs survive a restart, so nothing is live.
pub fn cleanup_startup_files(config: &Config) -> usize {
    let live = HashSet::new();
    let now = SystemTime::now();
    let removed: usize = [&config.upload_dir, &config.output_dir]
        .into_iter()
        .map(|dir| remove_stray_files(dir, config.stray_file_age, now, &live))
        .sum();
    if removed > 0 {
        log::info!(
            target: "vari_vid::sidecar",
            "Startup cleanup removed {} stale files",
            removed
        );
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedEncoder;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator(dir: &std::path::Path) -> Coordinator {
        let config = Config {
            upload_dir: dir.join("uploads"),
            output_dir: dir.join("outputs"),
            source_grace: Duration::ZERO,
            ..Config::default()
        };
        config.ensure_dirs().unwrap();
        Coordinator::new(config, Arc::new(ScriptedEncoder::new()))
    }

    #[tokio::test]
    async fn presets_list_returns_prefix_with_keys() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());
        let value = dispatch(&c, "presets.list", json!({ "count": 2 }))
            .await
            .expect("presets");
        let keys: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["subtle", "warm"]);
        assert_eq!(value[1]["name"], "Warm");

        let all = dispatch(&c, "presets.list", Value::Null).await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn submit_then_poll_status() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());
        let input = dir.path().join("uploads").join("holiday.mov");
        std::fs::write(&input, b"video").unwrap();

        let submitted = dispatch(
            &c,
            "job.submit",
            json!({ "inputPath": input, "versionCount": 2 }),
        )
        .await
        .expect("submit");
        let job_id = submitted["jobId"].as_str().unwrap().to_string();

        let status = dispatch(&c, "job.status", json!({ "jobId": job_id }))
            .await
            .expect("status");
        assert_eq!(status["originalName"], "holiday.mov");
        assert_eq!(status["versions"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn submit_requires_exactly_one_version_selector() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());
        let input = dir.path().join("uploads").join("a.mp4");
        std::fs::write(&input, b"video").unwrap();

        for params in [
            json!({ "inputPath": input }),
            json!({ "inputPath": input, "versionCount": 2, "presets": ["warm"] }),
        ] {
            let err = dispatch(&c, "job.submit", params).await.expect_err("rejected");
            assert!(matches!(err, AppError::Intake(_)));
        }
        assert!(c.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn unknown_job_and_method_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());
        let err = dispatch(&c, "job.status", json!({ "jobId": uuid::Uuid::new_v4() }))
            .await
            .expect_err("unknown job");
        assert!(matches!(err, AppError::NotFound(_)));

        let err = dispatch(&c, "job.cancel", Value::Null).await.expect_err("unknown");
        assert!(err.to_string().contains("Unknown method: job.cancel"));

        let err = dispatch(&c, "job.status", json!({ "jobId": "not-a-uuid" }))
            .await
            .expect_err("bad params");
        assert!(err.to_string().contains("Invalid params payload"));
    }

    #[test]
    fn startup_cleanup_tolerates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            upload_dir: dir.path().join("missing-uploads"),
            output_dir: dir.path().join("missing-outputs"),
            ..Config::default()
        };
        assert_eq!(cleanup_startup_files(&config), 0);
    }
}
