//! FFprobe-based source inspection. Versions only need geometry, duration and
//! whether an audio track exists.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// What a version needs to know about its source.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds; 0.0 when neither the container nor the stream reports it.
    pub duration: f64,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
}

fn parse_seconds(s: Option<&String>) -> Option<f64> {
    s.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse ffprobe JSON. Fails with `Probe` when no decodable video stream is present.
pub fn parse_ffprobe_json(json: &str) -> Result<SourceInfo, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::probe(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| AppError::probe("No video stream found"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(AppError::probe("Video stream has no usable dimensions")),
    };

    let duration = output
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_ref()))
        .or_else(|| parse_seconds(video.duration.as_ref()))
        .unwrap_or(0.0);

    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(SourceInfo {
        width,
        height,
        duration,
        has_audio,
        video_codec: video.codec_name.clone(),
    })
}

/// Run ffprobe on a source file. Blocking; call from `spawn_blocking`.
pub fn probe_source(ffprobe: &Path, path: &Path) -> Result<SourceInfo, AppError> {
    log::debug!(
        target: "vari_vid::ffmpeg::ffprobe",
        "probe_source: path={}",
        path.display()
    );

    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| AppError::probe(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::probe(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::probe("ffprobe output was not valid UTF-8"))?;

    parse_ffprobe_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_geometry_duration_and_audio() {
        let json = r#"{
            "format": { "duration": "30.5", "size": "12345678" },
            "streams": [
                { "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720 },
                { "codec_type": "audio", "codec_name": "aac" }
            ]
        }"#;
        let info = parse_ffprobe_json(json).expect("parse");
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.duration, 30.5);
        assert!(info.has_audio);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
    }

    #[test]
    fn falls_back_to_stream_duration() {
        let json = r#"{
            "format": {},
            "streams": [{ "codec_type": "video", "width": 640, "height": 360, "duration": "4.2" }]
        }"#;
        let info = parse_ffprobe_json(json).expect("parse");
        assert_eq!(info.duration, 4.2);
        assert!(!info.has_audio);
    }

    #[test]
    fn audio_only_source_is_a_probe_error() {
        let json = r#"{
            "format": { "duration": "10.0" },
            "streams": [{ "codec_type": "audio" }]
        }"#;
        let err = parse_ffprobe_json(json).expect_err("audio only");
        assert!(matches!(err, AppError::Probe(_)));
    }

    #[test]
    fn zero_dimensions_are_a_probe_error() {
        let json = r#"{"streams": [{ "codec_type": "video", "width": 0, "height": 0 }]}"#;
        assert!(matches!(parse_ffprobe_json(json), Err(AppError::Probe(_))));
    }

    #[test]
    fn garbage_is_a_probe_error() {
        assert!(matches!(parse_ffprobe_json("not json"), Err(AppError::Probe(_))));
    }
}
