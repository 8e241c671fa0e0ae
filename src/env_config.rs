//! Environment configuration overrides (spec.md §6): process environment
//! variables that override Settings and document-location defaults when
//! present.

use std::path::PathBuf;

use crate::settings::{ContainerFormat, Settings};

/// Paths to the three JSON documents, resolved once at startup.
#[derive(Debug, Clone)]
pub struct DocumentPaths {
    pub recordings: PathBuf,
    pub streams: PathBuf,
    pub settings: PathBuf,
}

impl DocumentPaths {
    pub fn from_env(data_directory: &std::path::Path) -> Self {
        Self {
            recordings: env_path("CAMVAULT_RECORDINGS_DOCUMENT").unwrap_or_else(|| data_directory.join("recordings.json")),
            streams: env_path("CAMVAULT_STREAMS_DOCUMENT").unwrap_or_else(|| data_directory.join("streams.json")),
            settings: env_path("CAMVAULT_SETTINGS_DOCUMENT").unwrap_or_else(|| data_directory.join("settings.json")),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_container_format(key: &str) -> Option<ContainerFormat> {
    env_string(key).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "mp4" => Some(ContainerFormat::Mp4),
        "mkv" => Some(ContainerFormat::Mkv),
        "avi" => Some(ContainerFormat::Avi),
        "ts" => Some(ContainerFormat::Ts),
        _ => None,
    })
}

/// Applies recognized environment overrides onto a loaded `Settings`
/// (spec.md §6 "Environment configuration"). Document paths are handled
/// separately by `DocumentPaths::from_env` since they are not part of the
/// Settings document itself.
pub fn apply_env_overrides(mut settings: Settings) -> Settings {
    if let Some(dir) = env_path("CAMVAULT_OUTPUT_DIRECTORY") {
        settings.output_directory = dir;
    }
    if let Some(dir) = env_path("CAMVAULT_LOGS_DIRECTORY") {
        settings.logs_directory = dir;
    }
    if let Some(path) = env_string("CAMVAULT_TRANSCODER_PATH") {
        settings.transcoder_path = path;
    }
    if let Some(fmt) = env_container_format("CAMVAULT_CONTAINER_FORMAT") {
        settings.container_format = fmt;
    }
    if let Some(secs) = env_u64("CAMVAULT_PROBER_HEARTBEAT_INTERVAL_SECS") {
        settings.prober_heartbeat_interval_secs = secs;
    }
    if let Some(enabled) = env_bool("CAMVAULT_PROBER_HEARTBEAT_ENABLED") {
        settings.prober_heartbeat_enabled = enabled;
    }
    settings
}
