//! Preset + source geometry -> fully resolved transformation plan.
//!
//! Everything here is pure: the same inputs always produce the same plan and
//! the same rendered filter strings.

use crate::preset::Preset;

/// Sample rate the audio chain works in and the encoder emits.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const LOUDNESS_TARGET_LUFS: f64 = -16.0;
pub const LOUDNESS_TRUE_PEAK_DB: f64 = -1.5;
pub const LOUDNESS_RANGE_LU: f64 = 11.0;

const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

pub const DEFAULT_OUTPUT_GEOMETRY: Geometry = Geometry::new(1920, 1080);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CropBox {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Visual operations in application order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum VideoOp {
    Color {
        brightness: f64,
        contrast: f64,
        saturation: f64,
    },
    Temperature {
        kelvin: u32,
    },
    Sharpen {
        amount: f64,
    },
    Blur {
        sigma: f64,
    },
    Vignette,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum AudioOp {
    /// Retune the sample rate by 2^(semitones/12), resample back, then
    /// stretch tempo by the inverse factor so duration is unchanged.
    PitchShift { semitones: f64 },
    Loudnorm {
        integrated: f64,
        true_peak: f64,
        range: f64,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodePlan {
    pub crop: Option<CropBox>,
    pub output: Geometry,
    pub video_ops: Vec<VideoOp>,
    pub audio_ops: Vec<AudioOp>,
    /// Applied to both streams; 1.0 means untouched.
    pub speed: f64,
}

/// Centered crop keeping `100 - pct` percent of each dimension. `None` when
/// the preset does not crop.
pub fn crop_box(source: Geometry, crop_percent: f64) -> Option<CropBox> {
    if crop_percent.is_nan() || crop_percent <= 0.0 {
        return None;
    }
    let keep = 100.0 - crop_percent.min(99.0);
    let width = (source.width as f64 * keep / 100.0).floor() as u32;
    let height = (source.height as f64 * keep / 100.0).floor() as u32;
    Some(CropBox {
        width,
        height,
        x: (source.width - width) / 2,
        y: (source.height - height) / 2,
    })
}

pub fn build_plan(preset: &Preset, source: Geometry) -> TranscodePlan {
    build_plan_for_output(preset, source, DEFAULT_OUTPUT_GEOMETRY)
}

pub fn build_plan_for_output(preset: &Preset, source: Geometry, output: Geometry) -> TranscodePlan {
    let mut video_ops = vec![VideoOp::Color {
        brightness: preset.brightness,
        contrast: 1.0 + preset.contrast,
        saturation: 1.0 + preset.saturation,
    }];
    if let Some(kelvin) = preset.temperature_kelvin {
        video_ops.push(VideoOp::Temperature { kelvin });
    }
    if let Some(amount) = preset.sharpen.filter(|a| *a != 0.0) {
        video_ops.push(VideoOp::Sharpen { amount });
    }
    if let Some(sigma) = preset.blur_sigma.filter(|s| *s > 0.0) {
        video_ops.push(VideoOp::Blur { sigma });
    }
    if preset.vignette {
        video_ops.push(VideoOp::Vignette);
    }

    let mut audio_ops = Vec::with_capacity(2);
    if let Some(semitones) = preset.pitch_semitones.filter(|s| *s != 0.0) {
        audio_ops.push(AudioOp::PitchShift { semitones });
    }
    audio_ops.push(AudioOp::Loudnorm {
        integrated: LOUDNESS_TARGET_LUFS,
        true_peak: LOUDNESS_TRUE_PEAK_DB,
        range: LOUDNESS_RANGE_LU,
    });

    TranscodePlan {
        crop: crop_box(source, preset.crop_percent),
        output,
        video_ops,
        audio_ops,
        speed: if preset.speed > 0.0 { preset.speed } else { 1.0 },
    }
}

/// Decompose a tempo factor into `atempo` stages each within [0.5, 2.0].
pub fn atempo_chain(factor: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !(factor.is_finite() && factor > 0.0) || factor == 1.0 {
        return stages;
    }
    let mut remaining = factor;
    while remaining > ATEMPO_MAX {
        stages.push(ATEMPO_MAX);
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        stages.push(ATEMPO_MIN);
        remaining /= ATEMPO_MIN;
    }
    stages.push(remaining);
    stages
}

/// Compact decimal rendering for filter arguments: `1.05`, `0.6`, `2`.
fn num(value: f64) -> String {
    let s = format!("{:.6}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}

impl VideoOp {
    fn render(&self) -> String {
        match self {
            VideoOp::Color {
                brightness,
                contrast,
                saturation,
            } => format!(
                "eq=brightness={}:contrast={}:saturation={}",
                num(*brightness),
                num(*contrast),
                num(*saturation)
            ),
            VideoOp::Temperature { kelvin } => format!("colortemperature=temperature={}", kelvin),
            VideoOp::Sharpen { amount } => format!("unsharp=5:5:{}:5:5:0", num(*amount)),
            VideoOp::Blur { sigma } => format!("gblur=sigma={}", num(*sigma)),
            VideoOp::Vignette => "vignette=PI/5".to_string(),
        }
    }
}

impl AudioOp {
    fn render(&self) -> Vec<String> {
        match self {
            AudioOp::PitchShift { semitones } => {
                let factor = 2f64.powf(semitones / 12.0);
                let mut stages = vec![
                    format!("asetrate={}*{}", AUDIO_SAMPLE_RATE, num(factor)),
                    format!("aresample={}", AUDIO_SAMPLE_RATE),
                ];
                stages.extend(
                    atempo_chain(1.0 / factor)
                        .into_iter()
                        .map(|t| format!("atempo={}", num(t))),
                );
                stages
            }
            AudioOp::Loudnorm {
                integrated,
                true_peak,
                range,
            } => vec![format!(
                "loudnorm=I={}:TP={}:LRA={}",
                num(*integrated),
                num(*true_peak),
                num(*range)
            )],
        }
    }
}

impl TranscodePlan {
    /// `-vf` chain: crop/scale -> color -> temperature -> sharpen -> blur -> vignette -> speed.
    pub fn video_filter(&self) -> String {
        let mut stages = Vec::with_capacity(self.video_ops.len() + 4);
        if let Some(c) = self.crop {
            stages.push(format!("crop={}:{}:{}:{}", c.width, c.height, c.x, c.y));
        }
        stages.push(format!("scale={}:{}", self.output.width, self.output.height));
        stages.extend(self.video_ops.iter().map(VideoOp::render));
        if self.speed != 1.0 {
            stages.push(format!("setpts=PTS/{}", num(self.speed)));
        }
        stages.join(",")
    }

    /// `-af` chain: sample-rate normalize -> pitch -> loudness -> speed.
    pub fn audio_filter(&self) -> String {
        let mut stages = vec![format!("aresample={}", AUDIO_SAMPLE_RATE)];
        stages.extend(self.audio_ops.iter().flat_map(AudioOp::render));
        stages.extend(
            atempo_chain(self.speed)
                .into_iter()
                .map(|t| format!("atempo={}", num(t))),
        );
        stages.join(",")
    }

    /// Expected output length for a source of `input_secs`.
    pub fn output_duration(&self, input_secs: f64) -> Option<f64> {
        (input_secs > 0.0).then(|| input_secs / self.speed)
    }
}
