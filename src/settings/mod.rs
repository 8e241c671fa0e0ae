//! Settings (spec.md §4.2): a typed record of tunables with
//! merge-with-defaults semantics, backed by typed enum option groups
//! collapsed into one flat record.

mod args;

pub use args::{build_stitch_args, build_transcoder_args};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAcceleration {
    Auto,
    Nvidia,
    Intel,
    Amd,
    None,
}

impl Default for HardwareAcceleration {
    fn default() -> Self {
        HardwareAcceleration::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Mkv,
    Avi,
    Ts,
}

impl Default for ContainerFormat {
    fn default() -> Self {
        ContainerFormat::Mp4
    }
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Avi => "avi",
            ContainerFormat::Ts => "ts",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Copy,
    H264,
    H265,
    Vp9,
}

impl Default for VideoCodec {
    fn default() -> Self {
        VideoCodec::H264
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Copy,
    Aac,
    Mp3,
    Opus,
}

impl Default for AudioCodec {
    fn default() -> Self {
        AudioCodec::Aac
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
    Http,
}

impl Default for RtspTransport {
    fn default() -> Self {
        RtspTransport::Tcp
    }
}

impl RtspTransport {
    pub fn as_arg(self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
            RtspTransport::Http => "http",
        }
    }
}

fn default_transcoder_path() -> String {
    "ffmpeg".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_logs_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_duration() -> u64 {
    60
}

fn default_reconnect_attempts() -> i64 {
    10
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_preview_interval() -> u64 {
    10
}

fn default_preview_quality() -> u32 {
    70
}

/// The single process-wide settings document (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: String,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
    #[serde(default)]
    pub container_format: ContainerFormat,
    #[serde(default)]
    pub video_codec: VideoCodec,
    #[serde(default)]
    pub audio_codec: AudioCodec,
    #[serde(default)]
    pub rtsp_transport: RtspTransport,
    #[serde(default = "default_duration")]
    pub default_duration_secs: u64,
    /// -1 = infinite, 0 = none.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: i64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default = "default_logs_directory")]
    pub logs_directory: PathBuf,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_storage_gb: f64,
    /// 0 = disabled.
    #[serde(default)]
    pub auto_delete_after_days: u64,
    #[serde(default)]
    pub preview_enabled: bool,
    #[serde(default = "default_preview_quality")]
    pub preview_quality: u32,
    #[serde(default = "default_preview_interval")]
    pub preview_interval_secs: u64,
    #[serde(default)]
    pub prober_heartbeat_enabled: bool,
    #[serde(default = "default_reconnect_delay")]
    pub prober_heartbeat_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transcoder_path: default_transcoder_path(),
            hardware_acceleration: HardwareAcceleration::default(),
            container_format: ContainerFormat::default(),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
            rtsp_transport: RtspTransport::default(),
            default_duration_secs: default_duration(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay(),
            output_directory: default_output_directory(),
            data_directory: default_data_directory(),
            logs_directory: default_logs_directory(),
            max_storage_gb: 0.0,
            auto_delete_after_days: 0,
            preview_enabled: false,
            preview_quality: default_preview_quality(),
            preview_interval_secs: default_preview_interval(),
            prober_heartbeat_enabled: false,
            prober_heartbeat_interval_secs: default_reconnect_delay(),
        }
    }
}

/// A partial update to Settings (spec.md §6 "read/update settings").
///
/// Every field is optional; `None` means "leave unchanged". This is what the
/// Command Surface's `update settings` accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub transcoder_path: Option<String>,
    pub hardware_acceleration: Option<HardwareAcceleration>,
    pub container_format: Option<ContainerFormat>,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    pub rtsp_transport: Option<RtspTransport>,
    pub default_duration_secs: Option<u64>,
    pub reconnect_attempts: Option<i64>,
    pub reconnect_delay_secs: Option<u64>,
    pub output_directory: Option<PathBuf>,
    pub data_directory: Option<PathBuf>,
    pub logs_directory: Option<PathBuf>,
    pub max_storage_gb: Option<f64>,
    pub auto_delete_after_days: Option<u64>,
    pub preview_enabled: Option<bool>,
    pub preview_quality: Option<u32>,
    pub preview_interval_secs: Option<u64>,
    pub prober_heartbeat_enabled: Option<bool>,
    pub prober_heartbeat_interval_secs: Option<u64>,
}

impl Settings {
    /// `merge(defaults, merge(defaults, s)) = merge(defaults, s)` (spec.md
    /// §8): applying a patch is idempotent because unset fields always fall
    /// back to the base they're merged onto, not to a separately-tracked
    /// "has this ever been set" bit.
    pub fn merge(base: &Settings, patch: &SettingsPatch) -> Settings {
        let mut merged = base.clone();
        if let Some(v) = patch.transcoder_path.clone() {
            merged.transcoder_path = v;
        }
        if let Some(v) = patch.hardware_acceleration {
            merged.hardware_acceleration = v;
        }
        if let Some(v) = patch.container_format {
            merged.container_format = v;
        }
        if let Some(v) = patch.video_codec {
            merged.video_codec = v;
        }
        if let Some(v) = patch.audio_codec {
            merged.audio_codec = v;
        }
        if let Some(v) = patch.rtsp_transport {
            merged.rtsp_transport = v;
        }
        if let Some(v) = patch.default_duration_secs {
            merged.default_duration_secs = v;
        }
        if let Some(v) = patch.reconnect_attempts {
            merged.reconnect_attempts = v;
        }
        if let Some(v) = patch.reconnect_delay_secs {
            merged.reconnect_delay_secs = v;
        }
        if let Some(v) = patch.output_directory.clone() {
            merged.output_directory = v;
        }
        if let Some(v) = patch.data_directory.clone() {
            merged.data_directory = v;
        }
        if let Some(v) = patch.logs_directory.clone() {
            merged.logs_directory = v;
        }
        if let Some(v) = patch.max_storage_gb {
            merged.max_storage_gb = v;
        }
        if let Some(v) = patch.auto_delete_after_days {
            merged.auto_delete_after_days = v;
        }
        if let Some(v) = patch.preview_enabled {
            merged.preview_enabled = v;
        }
        if let Some(v) = patch.preview_quality {
            merged.preview_quality = v;
        }
        if let Some(v) = patch.preview_interval_secs {
            merged.preview_interval_secs = v;
        }
        if let Some(v) = patch.prober_heartbeat_enabled {
            merged.prober_heartbeat_enabled = v;
        }
        if let Some(v) = patch.prober_heartbeat_interval_secs {
            merged.prober_heartbeat_interval_secs = v;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_idempotent() {
        let defaults = Settings::default();
        let patch = SettingsPatch {
            max_storage_gb: Some(5.0),
            reconnect_attempts: Some(-1),
            ..Default::default()
        };
        let once = Settings::merge(&defaults, &patch);
        let twice = Settings::merge(&defaults, &Settings::merge(&defaults, &patch).into_patch());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_overrides_only_set_fields() {
        let defaults = Settings::default();
        let patch = SettingsPatch {
            max_storage_gb: Some(42.0),
            ..Default::default()
        };
        let merged = Settings::merge(&defaults, &patch);
        assert_eq!(merged.max_storage_gb, 42.0);
        assert_eq!(merged.reconnect_attempts, defaults.reconnect_attempts);
    }
}

impl Settings {
    /// Helper used only by the idempotence test above: a patch that, when
    /// merged onto defaults, reproduces `self` exactly.
    #[cfg(test)]
    fn into_patch(self) -> SettingsPatch {
        SettingsPatch {
            transcoder_path: Some(self.transcoder_path),
            hardware_acceleration: Some(self.hardware_acceleration),
            container_format: Some(self.container_format),
            video_codec: Some(self.video_codec),
            audio_codec: Some(self.audio_codec),
            rtsp_transport: Some(self.rtsp_transport),
            default_duration_secs: Some(self.default_duration_secs),
            reconnect_attempts: Some(self.reconnect_attempts),
            reconnect_delay_secs: Some(self.reconnect_delay_secs),
            output_directory: Some(self.output_directory),
            data_directory: Some(self.data_directory),
            logs_directory: Some(self.logs_directory),
            max_storage_gb: Some(self.max_storage_gb),
            auto_delete_after_days: Some(self.auto_delete_after_days),
            preview_enabled: Some(self.preview_enabled),
            preview_quality: Some(self.preview_quality),
            preview_interval_secs: Some(self.preview_interval_secs),
            prober_heartbeat_enabled: Some(self.prober_heartbeat_enabled),
            prober_heartbeat_interval_secs: Some(self.prober_heartbeat_interval_secs),
        }
    }
}
