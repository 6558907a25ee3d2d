//! Scripted [`Encoder`] for exercising the pipeline without FFmpeg.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::encoder::{Encoder, TranscodeRequest};
use crate::error::AppError;
use crate::ffmpeg::{ProgressCallback, SourceInfo};

/// What the fake does for one version key.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionScript {
    Succeed,
    /// Writes a partial file, then fails with this stderr.
    Fail(String),
    /// Writes a partial file and never finishes.
    Hang,
}

pub struct ScriptedEncoder {
    source: SourceInfo,
    probe_error: Option<String>,
    probe_hangs: bool,
    progress: Vec<f64>,
    delay: Duration,
    scripts: HashMap<String, VersionScript>,
    requests: Mutex<Vec<TranscodeRequest>>,
}

impl Default for ScriptedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self {
            source: SourceInfo {
                width: 1280,
                height: 720,
                duration: 12.0,
                has_audio: true,
                video_codec: Some("h264".to_string()),
            },
            probe_error: None,
            probe_hangs: false,
            progress: vec![0.25, 0.75],
            delay: Duration::ZERO,
            scripts: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_source(mut self, source: SourceInfo) -> Self {
        self.source = source;
        self
    }

    pub fn with_probe_error(mut self, message: &str) -> Self {
        self.probe_error = Some(message.to_string());
        self
    }

    /// Probe never returns, like an ffprobe stuck on a bad stream.
    pub fn with_hanging_probe(mut self) -> Self {
        self.probe_hangs = true;
        self
    }

    pub fn with_progress(mut self, fractions: Vec<f64>) -> Self {
        self.progress = fractions;
        self
    }

    /// Pause before each encode so callers can observe in-flight state.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(mut self, key: &str, script: VersionScript) -> Self {
        self.scripts.insert(key.to_string(), script);
        self
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().clone()
    }

    /// Output names end in `_{key}.mp4`.
    fn script_for(&self, output: &Path) -> VersionScript {
        let key = output
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| stem.rsplit('_').next())
            .unwrap_or_default();
        self.scripts
            .get(key)
            .cloned()
            .unwrap_or(VersionScript::Succeed)
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn probe(&self, _path: &Path) -> Result<SourceInfo, AppError> {
        if self.probe_hangs {
            return std::future::pending().await;
        }
        match &self.probe_error {
            Some(message) => Err(AppError::probe(message.clone())),
            None => Ok(self.source.clone()),
        }
    }

    async fn transcode(
        &self,
        request: TranscodeRequest,
        progress: ProgressCallback,
    ) -> Result<(), AppError> {
        self.requests.lock().push(request.clone());
        let script = self.script_for(&request.output);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        for fraction in &self.progress {
            progress(*fraction);
        }

        match script {
            VersionScript::Succeed => {
                let body = format!("encoded {}", request.plan.video_filter());
                tokio::fs::write(&request.output, body).await?;
                Ok(())
            }
            VersionScript::Fail(stderr) => {
                tokio::fs::write(&request.output, b"partial").await?;
                Err(AppError::ffmpeg_failed(1, stderr))
            }
            VersionScript::Hang => {
                tokio::fs::write(&request.output, b"partial").await?;
                std::future::pending::<Result<(), AppError>>().await
            }
        }
    }
}
