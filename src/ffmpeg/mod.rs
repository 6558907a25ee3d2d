mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;

pub use builder::{EncodeProfile, build_ffmpeg_command, format_args_for_display_multiline};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use ffprobe::{SourceInfo, probe_source};
pub use progress::{ProgressLine, fraction_to_percent, parse_ffmpeg_progress};
pub use runner::{ChildSlot, ProgressCallback, run_ffmpeg_blocking};

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
