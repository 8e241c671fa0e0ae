//! Command Surface (spec.md §6): a transport-agnostic struct translating
//! external calls into Supervisor/Custodian/Persistence operations. Thin
//! wrappers: validate input, call into the engine, return a typed result.
//! Nothing here is tied to any particular transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::custodian::{Custodian, StorageStats, SweepResult};
use crate::error::{CoreError, CoreResult};
use crate::persistence::{Persistence, RecordingRecord, SavedStreamRecord};
use crate::prober::{LivenessProber, ProbeOutcome};
use crate::settings::{Settings, SettingsPatch};
use crate::supervisor::{RecordingSnapshot, RecordingSupervisor, SupervisorDeps, SupervisorRegistry};
use crate::transcoder::TranscoderSpawn;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecordingInput {
    pub name: String,
    pub rtsp_url: String,
    pub start_time: DateTime<Utc>,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecordingInput {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub enum ProbeModeToggle {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStreamInput {
    pub name: String,
    pub rtsp_url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStreamInput {
    pub name: Option<String>,
    pub rtsp_url: Option<String>,
    pub description: Option<String>,
    pub favorite: Option<bool>,
}

/// Everything the command surface needs to construct a supervisor for a
/// newly-created or restored recording.
pub struct CommandSurface {
    persistence: Arc<Persistence>,
    registry: Arc<SupervisorRegistry>,
    custodian: Arc<Custodian>,
    prober: Arc<dyn LivenessProber>,
    transcoder: Arc<dyn TranscoderSpawn>,
    probe_timeout: Duration,
}

impl CommandSurface {
    pub fn new(
        persistence: Arc<Persistence>,
        registry: Arc<SupervisorRegistry>,
        custodian: Arc<Custodian>,
        prober: Arc<dyn LivenessProber>,
        transcoder: Arc<dyn TranscoderSpawn>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            persistence,
            registry,
            custodian,
            prober,
            transcoder,
            probe_timeout,
        }
    }

    fn deps(&self) -> Arc<SupervisorDeps> {
        let custodian = self.custodian.clone();
        Arc::new(SupervisorDeps {
            persistence: self.persistence.clone(),
            prober: self.prober.clone(),
            transcoder: self.transcoder.clone(),
            probe_timeout: self.probe_timeout,
            on_completed: Some(Arc::new(move || custodian.trigger_on_completion())),
        })
    }

    /// Re-instantiates supervisors for every recording with `success` still
    /// unset (spec.md §4.5 "Crash recovery"). Call once at startup after
    /// constructing the `CommandSurface`.
    pub fn restore_in_flight_recordings(&self) {
        let document = self.persistence.recordings.load();
        for row in document.recordings.iter().filter(|r| r.success.is_none()) {
            let supervisor = RecordingSupervisor::restore(
                row.id.clone(),
                row.name.clone(),
                row.rtsp_url.clone(),
                row.start_time,
                row.duration,
                row.created_at,
                self.deps(),
            );
            if self.registry.register(supervisor.clone()).is_ok() {
                supervisor.spawn();
            }
        }
        self.custodian.arm();
    }

    pub fn list_recordings(&self) -> Vec<RecordingSnapshot> {
        self.registry.list().iter().map(|s| s.snapshot()).collect()
    }

    pub fn get_recording(&self, id: &str) -> CoreResult<RecordingSnapshot> {
        self.registry
            .lookup(id)
            .map(|s| s.snapshot())
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))
    }

    pub fn create_recording(&self, input: CreateRecordingInput) -> CoreResult<RecordingSnapshot> {
        if input.name.trim().is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if !input.rtsp_url.starts_with("rtsp://") {
            return Err(CoreError::validation("rtspUrl must begin with rtsp://"));
        }
        if input.duration_secs <= 0 {
            return Err(CoreError::validation("duration must be positive"));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = RecordingRecord {
            id: id.clone(),
            name: input.name.clone(),
            rtsp_url: input.rtsp_url.clone(),
            start_time: input.start_time,
            duration: input.duration_secs,
            success: None,
            output_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            extra: Default::default(),
        };
        let mut document = self.persistence.recordings.load();
        document.recordings.push(record);
        self.persistence
            .recordings
            .save(document)
            .map_err(CoreError::Internal)?;

        let supervisor = RecordingSupervisor::new(
            id,
            input.name,
            input.rtsp_url,
            input.start_time,
            input.duration_secs,
            now,
            self.deps(),
        );
        self.registry.register(supervisor.clone())?;
        supervisor.spawn();
        self.custodian.arm();
        Ok(supervisor.snapshot())
    }

    pub fn update_recording(&self, id: &str, input: UpdateRecordingInput) -> CoreResult<RecordingSnapshot> {
        let supervisor = self
            .registry
            .lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))?;
        supervisor.update_schedule(
            input.name.clone(),
            input.rtsp_url.clone(),
            input.start_time,
            input.duration_secs,
        )?;

        let mut document = self.persistence.recordings.load();
        if let Some(row) = document.recordings.iter_mut().find(|r| r.id == id) {
            if let Some(name) = input.name {
                row.name = name;
            }
            if let Some(url) = input.rtsp_url {
                row.rtsp_url = url;
            }
            if let Some(start_time) = input.start_time {
                row.start_time = start_time;
            }
            if let Some(duration) = input.duration_secs {
                row.duration = duration;
            }
            row.updated_at = Utc::now();
        }
        self.persistence
            .recordings
            .save(document)
            .map_err(CoreError::Internal)?;

        Ok(supervisor.snapshot())
    }

    pub fn delete_recording(&self, id: &str) -> CoreResult<()> {
        let supervisor = self
            .registry
            .lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))?;
        // Mark deleted before stopping: a worker still mid-attempt must see
        // this before it finalizes, or it will resurrect the row we're
        // about to remove.
        supervisor.mark_deleted();
        supervisor.stop()?;

        let mut document = self.persistence.recordings.load();
        if let Some(pos) = document.recordings.iter().position(|r| r.id == id) {
            let row = document.recordings.remove(pos);
            if let Some(path) = row.output_path {
                let _ = std::fs::remove_file(path);
            }
        }
        self.persistence
            .recordings
            .save(document)
            .map_err(CoreError::Internal)?;
        self.registry.remove(id);
        Ok(())
    }

    pub fn start_recording(&self, id: &str) -> CoreResult<()> {
        let supervisor = self
            .registry
            .lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))?;
        supervisor.start()
    }

    pub fn stop_recording(&self, id: &str) -> CoreResult<()> {
        let supervisor = self
            .registry
            .lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))?;
        supervisor.stop()
    }

    pub fn set_probe_mode(&self, id: &str, toggle: ProbeModeToggle) -> CoreResult<()> {
        let supervisor = self
            .registry
            .lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("recording {id} not found")))?;
        supervisor.set_ignore_probe(matches!(toggle, ProbeModeToggle::Disable));
        Ok(())
    }

    pub fn recording_stats(&self) -> RecordingStats {
        let snapshots = self.list_recordings();
        let mut by_status = HashMap::new();
        for snapshot in &snapshots {
            *by_status.entry(format!("{:?}", snapshot.status).to_lowercase()).or_insert(0) += 1;
        }
        RecordingStats {
            total: snapshots.len(),
            by_status,
        }
    }

    pub fn list_saved_streams(&self) -> Vec<SavedStreamRecord> {
        self.persistence.streams.load().streams
    }

    pub fn get_saved_stream(&self, id: &str) -> CoreResult<SavedStreamRecord> {
        self.persistence
            .streams
            .load()
            .streams
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found(format!("saved stream {id} not found")))
    }

    pub fn create_saved_stream(&self, input: CreateStreamInput) -> CoreResult<SavedStreamRecord> {
        if input.name.trim().is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        if !input.rtsp_url.starts_with("rtsp://") {
            return Err(CoreError::validation("rtspUrl must begin with rtsp://"));
        }
        let now = Utc::now();
        let record = SavedStreamRecord {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            rtsp_url: input.rtsp_url,
            description: input.description,
            favorite: Some(false),
            created_at: now,
            updated_at: now,
            extra: Default::default(),
        };
        let mut document = self.persistence.streams.load();
        document.streams.push(record.clone());
        self.persistence.streams.save(document).map_err(CoreError::Internal)?;
        Ok(record)
    }

    pub fn update_saved_stream(&self, id: &str, input: UpdateStreamInput) -> CoreResult<SavedStreamRecord> {
        let mut document = self.persistence.streams.load();
        let row = document
            .streams
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found(format!("saved stream {id} not found")))?;
        if let Some(name) = input.name {
            row.name = name;
        }
        if let Some(url) = input.rtsp_url {
            row.rtsp_url = url;
        }
        if let Some(description) = input.description {
            row.description = Some(description);
        }
        if let Some(favorite) = input.favorite {
            row.favorite = Some(favorite);
        }
        row.updated_at = Utc::now();
        let updated = row.clone();
        self.persistence.streams.save(document).map_err(CoreError::Internal)?;
        Ok(updated)
    }

    pub fn delete_saved_stream(&self, id: &str) -> CoreResult<()> {
        let mut document = self.persistence.streams.load();
        let before = document.streams.len();
        document.streams.retain(|s| s.id != id);
        if document.streams.len() == before {
            return Err(CoreError::not_found(format!("saved stream {id} not found")));
        }
        self.persistence.streams.save(document).map_err(CoreError::Internal)
    }

    pub fn probe_stream(&self, url: &str) -> ProbeOutcome {
        self.prober.probe(url, self.probe_timeout)
    }

    pub fn storage_stats(&self) -> StorageStats {
        self.custodian.storage_stats()
    }

    pub fn run_storage_cleanup(&self) -> SweepResult {
        self.custodian.sweep()
    }

    pub fn read_settings(&self) -> Settings {
        self.persistence.settings.load()
    }

    pub fn update_settings(&self, patch: SettingsPatch) -> CoreResult<Settings> {
        let merged = Settings::merge(&self.persistence.settings.load(), &patch);
        self.persistence
            .settings
            .save(merged.clone())
            .map_err(CoreError::Internal)?;
        self.prober
            .configure_heartbeat(merged.prober_heartbeat_enabled, merged.prober_heartbeat_interval_secs);
        Ok(merged)
    }

    /// Supplemented read-only diagnostic (spec.md §9: "surface via an
    /// 'orphan' listing, out of scope for this core" — exposed here as an
    /// opt-in command rather than left unimplemented): attempt-named files
    /// currently sitting in the output directory, regardless of whether any
    /// in-memory recording still references them.
    pub fn list_orphan_attempts(&self) -> Vec<String> {
        let settings = self.persistence.settings.load();
        let mut entries = Vec::new();
        let Ok(read_dir) = std::fs::read_dir(&settings.output_directory) else {
            return entries;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains("_attempt") {
                entries.push(entry.path().to_string_lossy().into_owned());
            }
        }
        entries.sort();
        entries
    }
}
