//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses progress from stdout (pipe:1) and
//! keeps a bounded tail of stderr for error reporting. Reader threads drain
//! both pipes while the caller's thread waits for completion. Each run owns a
//! [`ChildSlot`], so several encodes can run side by side and any one of them
//! can be killed without touching the others.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::progress::{ProgressLine, parse_ffmpeg_progress};
use crate::error::AppError;

/// Receives normalized output progress in [0,1].
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// `u64::MAX` encodes "duration not yet known" in the shared atomic.
const NONE_DURATION_BITS: u64 = u64::MAX;

/// Minimum interval between progress callbacks.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(250);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Holds the running child while it is alive. Taking it out of the slot is how
/// the runner distinguishes a normal exit from an external kill. A kill that
/// arrives before the child is spawned is remembered and applied on `put`.
#[derive(Clone, Default)]
pub struct ChildSlot(Arc<Mutex<SlotState>>);

#[derive(Default)]
struct SlotState {
    child: Option<Child>,
    killed: bool,
}

fn terminate(mut child: Child) {
    log::info!(
        target: "vari_vid::ffmpeg::runner",
        "Terminating FFmpeg process pid={}",
        child.id()
    );
    let _ = child.kill();
    let _ = child.wait();
}

impl ChildSlot {
    /// Kill and reap the child if it is still running. Returns whether a child was killed.
    pub fn kill(&self) -> bool {
        let child = {
            let mut state = self.0.lock();
            state.killed = true;
            state.child.take()
        };
        match child {
            Some(child) => {
                terminate(child);
                true
            }
            None => false,
        }
    }

    fn put(&self, child: Child) {
        let mut state = self.0.lock();
        if state.killed {
            drop(state);
            terminate(child);
        } else {
            state.child = Some(child);
        }
    }

    fn take(&self) -> Option<Child> {
        self.0.lock().child.take()
    }
}

struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    /// Output-timeline duration as f64 bits, shared by both readers.
    duration: Arc<AtomicU64>,
    /// Divides input `Duration:` lines into output length.
    speed: f64,
    progress_callback: Option<ProgressCallback>,
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let load_duration = || match config.duration.load(Ordering::Relaxed) {
            NONE_DURATION_BITS => None,
            bits => Some(f64::from_bits(bits)),
        };
        let mut last_emit: Option<Instant> = None;
        let mut last_progress = 0.0_f64;
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let line = String::from_utf8_lossy(&line_buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            let progress = match parse_ffmpeg_progress(line, load_duration()) {
                Some(ProgressLine::Duration(input_secs)) => {
                    if load_duration().is_none() && input_secs > 0.0 {
                        let output_secs = input_secs / config.speed;
                        config
                            .duration
                            .store(output_secs.to_bits(), Ordering::Relaxed);
                    }
                    None
                }
                Some(ProgressLine::Fraction(p)) => Some(p),
                Some(ProgressLine::End) => Some(1.0),
                None => None,
            };
            if let (Some(p), Some(cb)) = (progress, config.progress_callback.as_ref()) {
                let now = Instant::now();
                let due = last_emit.is_none_or(|t| now.duration_since(t) >= PROGRESS_EMIT_INTERVAL);
                if due || (p - last_progress).abs() >= 0.01 || p >= 1.0 {
                    last_emit = Some(now);
                    last_progress = p;
                    cb(p);
                }
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg and block until completion.
///
/// - `output_duration`: expected output length in seconds. When unknown, the
///   input `Duration:` line on stderr divided by `speed` is used instead.
/// - `slot`: receives the child for the lifetime of the run. Killing through
///   the slot makes this function return [`AppError::Aborted`].
pub fn run_ffmpeg_blocking(
    ffmpeg_path: &Path,
    args: Vec<String>,
    output_duration: Option<f64>,
    speed: f64,
    progress_callback: Option<ProgressCallback>,
    slot: &ChildSlot,
) -> Result<(), AppError> {
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "vari_vid::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg_path.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::ffmpeg_failed(-1, format!("Failed to spawn FFmpeg: {}", e)))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture FFmpeg output pipes"));
    };
    slot.put(child);

    let duration = Arc::new(AtomicU64::new(
        output_duration
            .filter(|&d| d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(NONE_DURATION_BITS),
    ));
    let speed = if speed > 0.0 { speed } else { 1.0 };
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            duration: Arc::clone(&duration),
            speed,
            progress_callback,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            duration: Arc::clone(&duration),
            speed,
            progress_callback: None,
        },
    );

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let Some(mut child) = slot.take() else {
        log::warn!(
            target: "vari_vid::ffmpeg::runner",
            "FFmpeg process was killed before it finished"
        );
        return Err(AppError::aborted());
    };
    let status = child.wait()?;

    let stderr_str = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

    if status.success() {
        log::info!(
            target: "vari_vid::ffmpeg::runner",
            "FFmpeg completed successfully: output={:?}",
            args.last()
        );
        return Ok(());
    }

    let code = status.code().unwrap_or(-1);
    let err_preview = stderr_str
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "vari_vid::ffmpeg::runner",
        "FFmpeg failed (code={}): {}",
        code,
        err_preview
    );
    Err(AppError::FfmpegFailed {
        code,
        stderr: stderr_str,
    })
}
