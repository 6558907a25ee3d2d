use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex")
});
static OUT_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^out_time_(?:ms|us)=(\d+)").expect("invalid out_time regex"));
static PROGRESS_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^progress=end").expect("invalid progress regex"));

/// One parsed line of FFmpeg output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Input duration in seconds, announced on stderr before encoding starts.
    Duration(f64),
    /// Fraction of the *output* timeline written so far, in [0,1].
    Fraction(f64),
    /// `-progress` block terminator emitted once the muxer is done.
    End,
}

/// Parse one line of `-progress pipe:1` or stderr output.
///
/// `output_duration` is the expected output length: the input duration divided
/// by the playback speed, since speed changes shorten or lengthen the timeline.
pub fn parse_ffmpeg_progress(line: &str, output_duration: Option<f64>) -> Option<ProgressLine> {
    if let Some(caps) = DURATION_RE.captures(line) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        return Some(ProgressLine::Duration(hours * 3600.0 + minutes * 60.0 + seconds));
    }

    if PROGRESS_END_RE.is_match(line) {
        return Some(ProgressLine::End);
    }

    let caps = OUT_TIME_RE.captures(line)?;
    let total = output_duration.filter(|d| *d > 0.0)?;
    // out_time_ms is microseconds despite the name.
    let micros: u64 = caps[1].parse().unwrap_or(0);
    let written = micros as f64 / 1_000_000.0;
    Some(ProgressLine::Fraction((written / total).clamp(0.0, 1.0)))
}

/// Map a [0,1] encoder fraction to a non-terminal percentage, capped at 99.
pub fn fraction_to_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).floor().min(99.0) as u8
}
