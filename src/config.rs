//! Runtime configuration. Defaults cover local use; deployments override
//! through `VARI_VID_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::plan::{DEFAULT_OUTPUT_GEOMETRY, Geometry};
use crate::preset::catalog_size;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub min_versions: usize,
    pub max_versions: usize,
    /// How long a finished job stays downloadable.
    pub job_retention: Duration,
    /// Files older than this in the upload/output dirs are removed when no live job owns them.
    pub stray_file_age: Duration,
    pub sweep_interval: Duration,
    /// Delay between job completion and deleting its uploaded source.
    pub source_grace: Duration,
    /// `None` disables the per-encode limit.
    pub encode_timeout: Option<Duration>,
    pub output_geometry: Geometry,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let base = env::temp_dir().join("vari-vid");
        Self {
            upload_dir: base.join("uploads"),
            output_dir: base.join("outputs"),
            min_versions: 1,
            max_versions: catalog_size(),
            job_retention: Duration::from_secs(60 * 60),
            stray_file_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            source_grace: Duration::from_secs(5),
            encode_timeout: Some(Duration::from_secs(2 * 60 * 60)),
            output_geometry: DEFAULT_OUTPUT_GEOMETRY,
            ffmpeg_path: None,
        }
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!(
                target: "vari_vid::config",
                "Ignoring invalid {}={:?}; using default",
                name,
                raw
            );
            None
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parsed::<u64>(name).map(Duration::from_secs)
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env::var_os("VARI_VID_UPLOAD_DIR").filter(|v| !v.is_empty()) {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env::var_os("VARI_VID_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }

        let catalog = catalog_size();
        if let Some(max) = env_parsed::<usize>("VARI_VID_MAX_VERSIONS") {
            if (1..=catalog).contains(&max) {
                config.max_versions = max;
            } else {
                log::warn!(
                    target: "vari_vid::config",
                    "VARI_VID_MAX_VERSIONS={} outside 1..={}; using {}",
                    max,
                    catalog,
                    config.max_versions
                );
            }
        }
        if let Some(min) = env_parsed::<usize>("VARI_VID_MIN_VERSIONS") {
            if (1..=config.max_versions).contains(&min) {
                config.min_versions = min;
            } else {
                log::warn!(
                    target: "vari_vid::config",
                    "VARI_VID_MIN_VERSIONS={} outside 1..={}; using {}",
                    min,
                    config.max_versions,
                    config.min_versions
                );
            }
        }

        if let Some(d) = env_secs("VARI_VID_RETENTION_SECS") {
            config.job_retention = d;
        }
        if let Some(d) = env_secs("VARI_VID_STRAY_FILE_AGE_SECS") {
            config.stray_file_age = d;
        }
        if let Some(d) = env_secs("VARI_VID_SWEEP_INTERVAL_SECS").filter(|d| !d.is_zero()) {
            config.sweep_interval = d;
        }
        if let Some(d) = env_secs("VARI_VID_SOURCE_GRACE_SECS") {
            config.source_grace = d;
        }
        if let Some(d) = env_secs("VARI_VID_ENCODE_TIMEOUT_SECS") {
            // 0 turns the limit off.
            config.encode_timeout = (!d.is_zero()).then_some(d);
        }

        let width = env_parsed::<u32>("VARI_VID_OUTPUT_WIDTH").filter(|w| *w > 0);
        let height = env_parsed::<u32>("VARI_VID_OUTPUT_HEIGHT").filter(|h| *h > 0);
        config.output_geometry = Geometry::new(
            width.unwrap_or(config.output_geometry.width),
            height.unwrap_or(config.output_geometry.height),
        );

        config.ffmpeg_path = env::var_os("FFMPEG_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        log::debug!(target: "vari_vid::config", "Loaded config: {:?}", config);
        config
    }

    /// Create the upload and output directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.output_dir)
    }
}
