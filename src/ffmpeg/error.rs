//! Map FFmpeg exit codes to short summaries for status readers.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure and 137 for
//! a child we killed after an encode timeout. Stderr is kept as detail.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_BYTES: usize = 120;

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", code)),
        None => last_meaningful_line(stderr, SUMMARY_MAX_BYTES),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn known_exit_code_summary(code: i32) -> Option<&'static str> {
    match code {
        -1 => Some("FFmpeg not found or failed to start."),
        1 => Some("FFmpeg failed."),
        69 => Some("Encoding rate limit exceeded."),
        123 | 255 => Some("Encoding was stopped."),
        137 => Some("Encoding was killed."),
        _ => None,
    }
}

/// FFmpeg prints its fatal reason last; banner and stream info come first.
fn last_meaningful_line(stderr: &str, max_len: usize) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &line[..cut], ELLIPSIS)
}
