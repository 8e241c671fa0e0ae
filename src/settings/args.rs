use std::path::Path;

use super::{AudioCodec, HardwareAcceleration, Settings, VideoCodec};

fn hwaccel_input_flags(hw: HardwareAcceleration) -> Vec<String> {
    match hw {
        HardwareAcceleration::Nvidia => vec![
            "-hwaccel".into(),
            "cuda".into(),
            "-hwaccel_output_format".into(),
            "cuda".into(),
        ],
        HardwareAcceleration::Intel => vec![
            "-hwaccel".into(),
            "qsv".into(),
            "-hwaccel_output_format".into(),
            "qsv".into(),
        ],
        HardwareAcceleration::Amd => vec!["-hwaccel".into(), "amf".into()],
        HardwareAcceleration::Auto => vec!["-hwaccel".into(), "auto".into()],
        HardwareAcceleration::None => Vec::new(),
    }
}

/// Resolve the concrete video encoder name for (codec, hwaccel) per
/// spec.md §6's invocation contract table. `copy` always short-circuits
/// regardless of hwaccel.
fn video_encoder(codec: VideoCodec, hw: HardwareAcceleration) -> &'static str {
    if matches!(codec, VideoCodec::Copy) {
        return "copy";
    }
    match (codec, hw) {
        (VideoCodec::H264, HardwareAcceleration::Nvidia) => "h264_nvenc",
        (VideoCodec::H265, HardwareAcceleration::Nvidia) => "hevc_nvenc",
        (VideoCodec::H264, HardwareAcceleration::Intel) => "h264_qsv",
        (VideoCodec::H265, HardwareAcceleration::Intel) => "hevc_qsv",
        (VideoCodec::Vp9, HardwareAcceleration::Intel) => "vp9_qsv",
        (VideoCodec::H264, HardwareAcceleration::Amd) => "h264_amf",
        (VideoCodec::H265, HardwareAcceleration::Amd) => "hevc_amf",
        (VideoCodec::H264, _) => "libx264",
        (VideoCodec::H265, _) => "libx265",
        (VideoCodec::Vp9, _) => "libvpx-vp9",
        (VideoCodec::Copy, _) => unreachable!("handled above"),
    }
}

fn audio_encoder(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Copy => "copy",
        AudioCodec::Aac => "aac",
        AudioCodec::Mp3 => "libmp3lame",
        AudioCodec::Opus => "libopus",
    }
}

/// Pure function: the capture argument vector for a single attempt
/// (spec.md §4.4 step 1, §6 invocation contract). A pure function of
/// `(url, outPath, duration, settings)` per spec.md §8.
pub fn build_transcoder_args(
    settings: &Settings,
    url: &str,
    out_path: &Path,
    duration_secs: f64,
) -> Vec<String> {
    let mut args = hwaccel_input_flags(settings.hardware_acceleration);

    args.push("-rtsp_transport".into());
    args.push(settings.rtsp_transport.as_arg().into());
    args.push("-rtsp_flags".into());
    args.push("prefer_tcp".into());
    args.push("-i".into());
    args.push(url.to_string());

    args.push("-c:v".into());
    args.push(video_encoder(settings.video_codec, settings.hardware_acceleration).into());
    args.push("-c:a".into());
    args.push(audio_encoder(settings.audio_codec).into());

    args.push("-t".into());
    args.push(format!("{duration_secs:.3}"));

    if matches!(settings.container_format, super::ContainerFormat::Mp4) {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }

    args.push("-y".into());
    args.push(out_path.to_string_lossy().into_owned());
    args
}

/// Concat-demuxer stitch invocation (spec.md §4.4 step 4, §6): `-f concat
/// -safe 0 -i <listfile> -c copy -y <finalPath>`.
pub fn build_stitch_args(list_file: &Path, final_path: &Path) -> Vec<String> {
    vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_file.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-y".into(),
        final_path.to_string_lossy().into_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pure_function_of_inputs() {
        let settings = Settings::default();
        let out = PathBuf::from("/tmp/out.mp4");
        let a = build_transcoder_args(&settings, "rtsp://h/s", &out, 10.0);
        let b = build_transcoder_args(&settings, "rtsp://h/s", &out, 10.0);
        assert_eq!(a, b);
    }

    #[test]
    fn nvidia_h264_resolves_nvenc_and_hwaccel_flags() {
        let mut settings = Settings::default();
        settings.hardware_acceleration = HardwareAcceleration::Nvidia;
        settings.video_codec = VideoCodec::H264;
        let args = build_transcoder_args(&settings, "rtsp://h/s", &PathBuf::from("o.mp4"), 5.0);
        assert!(args.windows(2).any(|w| w == ["-hwaccel", "cuda"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "h264_nvenc"]));
    }

    #[test]
    fn copy_short_circuits_regardless_of_hwaccel() {
        let mut settings = Settings::default();
        settings.hardware_acceleration = HardwareAcceleration::Nvidia;
        settings.video_codec = VideoCodec::Copy;
        let args = build_transcoder_args(&settings, "rtsp://h/s", &PathBuf::from("o.mp4"), 5.0);
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
    }

    #[test]
    fn mp4_gets_faststart_others_do_not() {
        let mut settings = Settings::default();
        settings.container_format = super::super::ContainerFormat::Mkv;
        let args = build_transcoder_args(&settings, "rtsp://h/s", &PathBuf::from("o.mkv"), 5.0);
        assert!(!args.iter().any(|a| a == "-movflags"));
    }
}
