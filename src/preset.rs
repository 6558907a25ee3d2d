//! Fixed catalog of visual/audio variation presets.
//!
//! Order is part of the contract: requesting N versions always yields the
//! first N entries of [`PRESETS`].

use crate::error::AppError;

/// One named set of variation knobs. Offsets are relative to FFmpeg `eq`
/// defaults (brightness 0, contrast 1, saturation 1).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    /// Playback speed multiplier; 1.0 leaves timing untouched.
    pub speed: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    /// Percent trimmed from each dimension before scaling, 0 disables cropping.
    pub crop_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_semitones: Option<f64>,
    /// Target white point in Kelvin for FFmpeg `colortemperature`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_kelvin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpen: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_sigma: Option<f64>,
    pub vignette: bool,
}

pub static PRESETS: [(&str, Preset); 5] = [
    (
        "subtle",
        Preset {
            name: "Subtle",
            description: "Near-original look with a slight crop and lift",
            speed: 1.02,
            brightness: 0.02,
            contrast: 0.03,
            saturation: 0.05,
            crop_percent: 3.0,
            pitch_semitones: None,
            temperature_kelvin: None,
            sharpen: None,
            blur_sigma: None,
            vignette: false,
        },
    ),
    (
        "warm",
        Preset {
            name: "Warm",
            description: "Golden tint with richer colors",
            speed: 1.0,
            brightness: 0.03,
            contrast: 0.05,
            saturation: 0.10,
            crop_percent: 5.0,
            pitch_semitones: Some(0.5),
            temperature_kelvin: Some(5200),
            sharpen: None,
            blur_sigma: None,
            vignette: false,
        },
    ),
    (
        "cool",
        Preset {
            name: "Cool",
            description: "Blue-leaning grade with light sharpening",
            speed: 0.98,
            brightness: -0.02,
            contrast: 0.04,
            saturation: -0.05,
            crop_percent: 4.0,
            pitch_semitones: Some(-0.5),
            temperature_kelvin: Some(8000),
            sharpen: Some(0.6),
            blur_sigma: None,
            vignette: false,
        },
    ),
    (
        "vivid",
        Preset {
            name: "Vivid",
            description: "Punchy saturation, tighter crop, slightly faster",
            speed: 1.05,
            brightness: 0.04,
            contrast: 0.10,
            saturation: 0.25,
            crop_percent: 8.0,
            pitch_semitones: Some(1.0),
            temperature_kelvin: None,
            sharpen: Some(1.0),
            blur_sigma: None,
            vignette: false,
        },
    ),
    (
        "cinematic",
        Preset {
            name: "Cinematic",
            description: "Muted contrast-heavy grade with soft focus and vignette",
            speed: 0.95,
            brightness: -0.03,
            contrast: 0.12,
            saturation: -0.10,
            crop_percent: 10.0,
            pitch_semitones: Some(-1.0),
            temperature_kelvin: None,
            sharpen: None,
            blur_sigma: Some(0.6),
            vignette: true,
        },
    ),
];

pub fn catalog() -> impl Iterator<Item = (&'static str, &'static Preset)> {
    PRESETS.iter().map(|(key, preset)| (*key, preset))
}

pub fn catalog_size() -> usize {
    PRESETS.len()
}

/// First `count` presets in catalog order.
pub fn list_presets(count: usize) -> Result<Vec<(&'static str, &'static Preset)>, AppError> {
    if count < 1 || count > PRESETS.len() {
        return Err(AppError::InvalidCount {
            requested: count,
            min: 1,
            max: PRESETS.len(),
        });
    }
    Ok(catalog().take(count).collect())
}

pub fn get_preset(key: &str) -> Option<(&'static str, &'static Preset)> {
    catalog().find(|(k, _)| *k == key)
}
