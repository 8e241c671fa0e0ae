//! camvault-core: scheduling, supervision, and retention for RTSP capture
//! jobs. See the module docs on `supervisor`, `prober`, `transcoder`,
//! `custodian`, `persistence`, and `commands` for the per-subsystem
//! contracts; this crate's public surface is deliberately narrow — callers
//! are expected to embed `commands::CommandSurface` behind whatever
//! transport (HTTP, CLI, IPC) they need.

pub mod commands;
pub mod custodian;
pub mod env_config;
pub mod error;
pub mod persistence;
pub mod prober;
pub mod settings;
pub mod supervisor;
pub mod transcoder;

use std::sync::Arc;
use std::time::Duration;

use commands::CommandSurface;
use custodian::Custodian;
use env_config::DocumentPaths;
use persistence::Persistence;
use prober::PooledProber;
use settings::Settings;
use supervisor::SupervisorRegistry;
use transcoder::ProcessTranscoder;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reads `.env` (if present) and installs a `tracing` subscriber honoring
/// `RUST_LOG`, falling back to `info`.
pub fn init_tracing() {
    let _ = dotenvy::dotenv();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wires the real (non-test) implementations of Persistence, Prober, and
/// Transcoder Driver into a `CommandSurface`, applying environment overrides
/// on top of the persisted Settings document, and restores any
/// still-in-flight recordings from a prior run.
pub fn bootstrap() -> CommandSurface {
    let data_directory = std::env::var_os("CAMVAULT_DATA_DIRECTORY")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("data"));
    let paths = DocumentPaths::from_env(&data_directory);

    let persistence = Arc::new(Persistence::new(paths.recordings, paths.streams, paths.settings));
    let base_settings = env_config::apply_env_overrides(persistence.settings.load());
    if let Err(err) = persistence.settings.save(base_settings.clone()) {
        tracing::warn!(error = %err, "failed to persist environment-derived settings overrides");
    }

    let registry = Arc::new(SupervisorRegistry::new());
    let custodian = Custodian::new(persistence.clone());
    let prober: Arc<dyn prober::LivenessProber> = Arc::new(PooledProber::new());
    prober.configure_heartbeat(base_settings.prober_heartbeat_enabled, base_settings.prober_heartbeat_interval_secs);
    let transcoder: Arc<dyn transcoder::TranscoderSpawn> = Arc::new(ProcessTranscoder);

    let surface = CommandSurface::new(persistence, registry, custodian, prober, transcoder, DEFAULT_PROBE_TIMEOUT);
    surface.restore_in_flight_recordings();
    surface
}

/// Settings as they would be with no documents on disk and no environment
/// overrides applied; useful for callers bootstrapping a fresh install.
pub fn default_settings() -> Settings {
    Settings::default()
}
