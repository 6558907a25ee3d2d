use crate::plan::{AUDIO_SAMPLE_RATE, TranscodePlan};

/// Fixed quality/compatibility profile shared by every version.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub crf: u8,
    pub preset: &'static str,
    pub max_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264",
            crf: 18,
            preset: "medium",
            max_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
        }
    }
}

/// Pads odd dimensions up to even ones; yuv420p rejects odd sizes.
const EVEN_PAD_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

fn push_pair(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

/// Render a plan into FFmpeg arguments. Progress goes to stdout (`-progress pipe:1`).
pub fn build_ffmpeg_command(
    input_path: &str,
    output_path: &str,
    plan: &TranscodePlan,
    has_audio: bool,
    profile: &EncodeProfile,
) -> Vec<String> {
    log::debug!(
        target: "vari_vid::ffmpeg::builder",
        "Building FFmpeg command: codec={}, CRF={}, speed={}, input={} -> output={}",
        profile.video_codec,
        profile.crf,
        plan.speed,
        input_path,
        output_path
    );

    let mut args: Vec<String> = ["-nostdin", "-y", "-hide_banner"]
        .into_iter()
        .map(String::from)
        .collect();
    push_pair(&mut args, "-fflags", "+genpts");
    push_pair(&mut args, "-progress", "pipe:1");
    push_pair(&mut args, "-i", input_path);
    push_pair(&mut args, "-map", "0:v:0");
    if has_audio {
        push_pair(&mut args, "-map", "0:a:0?");
    }

    let video_filter = format!("{},{},format=yuv420p", plan.video_filter(), EVEN_PAD_FILTER);
    push_pair(&mut args, "-vf", video_filter);
    push_pair(&mut args, "-c:v", profile.video_codec);
    push_pair(&mut args, "-preset", profile.preset);
    push_pair(&mut args, "-crf", profile.crf.to_string());
    push_pair(
        &mut args,
        "-maxrate",
        format!("{}k", profile.max_bitrate_kbps),
    );
    push_pair(
        &mut args,
        "-bufsize",
        format!("{}k", profile.max_bitrate_kbps * 2),
    );
    push_pair(&mut args, "-pix_fmt", "yuv420p");

    if has_audio {
        push_pair(&mut args, "-af", plan.audio_filter());
        push_pair(&mut args, "-c:a", "aac");
        push_pair(&mut args, "-b:a", format!("{}k", profile.audio_bitrate_kbps));
        push_pair(&mut args, "-ar", AUDIO_SAMPLE_RATE.to_string());
    } else {
        args.push("-an".to_string());
    }

    push_pair(&mut args, "-movflags", "+faststart");
    push_pair(&mut args, "-avoid_negative_ts", "make_zero");
    args.push(output_path.to_string());
    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    let mut lines = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match iter.peek() {
            Some(value) if arg.starts_with('-') && !value.starts_with('-') => {
                lines.push(format!("  {} {}", arg, value));
                iter.next();
            }
            _ => lines.push(format!("  {}", arg)),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Geometry, build_plan};
    use crate::preset::get_preset;

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let idx = args
            .iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("missing {flag}"));
        &args[idx + 1]
    }

    fn warm_args(has_audio: bool) -> Vec<String> {
        let (_, preset) = get_preset("warm").unwrap();
        let plan = build_plan(preset, Geometry::new(1280, 720));
        build_ffmpeg_command("/in.mov", "/out.mp4", &plan, has_audio, &EncodeProfile::default())
    }

    #[test]
    fn profile_flags_are_present() {
        let args = warm_args(true);
        assert_eq!(value_after(&args, "-i"), "/in.mov");
        assert_eq!(value_after(&args, "-c:v"), "libx264");
        assert_eq!(value_after(&args, "-crf"), "18");
        assert_eq!(value_after(&args, "-maxrate"), "8000k");
        assert_eq!(value_after(&args, "-bufsize"), "16000k");
        assert_eq!(value_after(&args, "-movflags"), "+faststart");
        assert_eq!(value_after(&args, "-fflags"), "+genpts");
        assert_eq!(value_after(&args, "-avoid_negative_ts"), "make_zero");
        assert_eq!(value_after(&args, "-progress"), "pipe:1");
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
    }

    #[test]
    fn video_filter_ends_with_even_padding() {
        let args = warm_args(true);
        let vf = value_after(&args, "-vf");
        assert!(vf.starts_with("crop="), "unexpected vf: {vf}");
        assert!(vf.ends_with("pad=ceil(iw/2)*2:ceil(ih/2)*2,format=yuv420p"));
    }

    #[test]
    fn audio_chain_only_with_audio() {
        let with_audio = warm_args(true);
        assert!(value_after(&with_audio, "-af").contains("loudnorm"));
        assert_eq!(value_after(&with_audio, "-ar"), "48000");

        let silent = warm_args(false);
        assert!(silent.contains(&"-an".to_string()));
        assert!(!silent.iter().any(|a| a == "-af" || a == "-c:a"));
    }

    #[test]
    fn multiline_display_pairs_flags_with_values() {
        let args: Vec<String> = ["-y", "-i", "/in.mp4", "-an", "/out.mp4"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -y\n  -i /in.mp4\n  -an /out.mp4"
        );
    }
}
