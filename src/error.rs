//! App error type for the transcode pipeline. Implements Display and Serialize for RPC callers.

use std::time::Duration;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Aborted")]
    Aborted,

    /// Submission rejected before any job state was created.
    #[error("Invalid submission: {0}")]
    Intake(String),

    #[error("Invalid version count {requested}: expected {min}..={max}")]
    InvalidCount {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Encode timed out after {}s", .0.as_secs())]
    EncodeTimeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not ready: {0}")]
    NotReady(String),
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn intake(msg: impl Into<String>) -> Self {
        Self::Intake(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn not_ready(what: impl Into<String>) -> Self {
        Self::NotReady(what.into())
    }

    /// Read-side signals that callers are expected to handle, not report as failures.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotReady(_))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::FfmpegFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
