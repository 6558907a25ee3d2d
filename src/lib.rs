pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod output;
pub mod plan;
pub mod preset;
pub mod retention;
pub mod sidecar_api;
pub mod store;
#[cfg(any(test, feature = "integration-test-api"))]
pub mod test_support;
pub mod worker;

pub use config::Config;
pub use coordinator::{Coordinator, JobEvent, Submission, VersionRequest};
pub use encoder::{Encoder, FfmpegEncoder, TranscodeRequest};
pub use job::{JobId, JobSnapshot, JobStatus, VersionStatus};
