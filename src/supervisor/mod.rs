//! Recording Supervisor (spec.md §4.5): one instance per Recording, owning
//! its schedule, attempt bookkeeping, cancellation, and the subprocess
//! lifecycle. `Mutex`-guarded shared state plus cooperative atomic
//! cancel/force-start flags observed by a dedicated worker thread.

mod registry;
mod status;
mod worker;

pub use registry::SupervisorRegistry;
pub use status::RecordingStatus;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::persistence::Persistence;
use crate::prober::LivenessProber;
use crate::transcoder::{ProgressSnapshot, TranscoderHandle, TranscoderSpawn};

/// Dependencies a supervisor needs but does not own (spec.md §9: "the
/// Supervisor does not own the Persistence layer; it only calls through its
/// contract").
pub struct SupervisorDeps {
    pub persistence: Arc<Persistence>,
    pub prober: Arc<dyn LivenessProber>,
    pub transcoder: Arc<dyn TranscoderSpawn>,
    pub probe_timeout: Duration,
    /// Invoked ~1s after a successful completion (spec.md §4.6): an extra
    /// Custodian sweep trigger. `None` is a valid no-op hook for tests that
    /// don't care about retention.
    pub on_completed: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct SupervisorState {
    name: String,
    rtsp_url: String,
    start_time: DateTime<Utc>,
    duration_secs: i64,
    status: RecordingStatus,
    ignore_probe: bool,
    attempt_paths: Vec<PathBuf>,
    progress: Option<ProgressSnapshot>,
    error_message: Option<String>,
    output_path: Option<PathBuf>,
    success: Option<bool>,
    completed_at: Option<DateTime<Utc>>,
    attempts_used: u32,
}

/// A read-only view of a recording plus its live status, returned by the
/// Command Surface (spec.md §6 "derived status snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSnapshot {
    pub id: String,
    pub name: String,
    pub rtsp_url: String,
    pub start_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub status: RecordingStatus,
    pub ignore_probe: bool,
    pub attempt_count: usize,
    pub progress: Option<ProgressSnapshot>,
    pub error_message: Option<String>,
    pub output_path: Option<PathBuf>,
    pub success: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct RecordingSupervisor {
    pub id: String,
    pub created_at: DateTime<Utc>,
    updated_at: Mutex<DateTime<Utc>>,
    state: Mutex<SupervisorState>,
    cancel: Arc<AtomicBool>,
    force_start: Arc<AtomicBool>,
    worker_started: AtomicBool,
    /// Set by `delete_recording` before it removes this recording's
    /// persisted row. Checked by the worker's finalizer so a still-running
    /// attempt doesn't resurrect a row the command surface already deleted.
    deleted: AtomicBool,
    active_handle: Arc<Mutex<Option<Box<dyn TranscoderHandle>>>>,
    deps: Arc<SupervisorDeps>,
}

impl RecordingSupervisor {
    pub fn new(
        id: String,
        name: String,
        rtsp_url: String,
        start_time: DateTime<Utc>,
        duration_secs: i64,
        created_at: DateTime<Utc>,
        deps: Arc<SupervisorDeps>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            created_at,
            updated_at: Mutex::new(created_at),
            state: Mutex::new(SupervisorState {
                name,
                rtsp_url,
                start_time,
                duration_secs,
                status: RecordingStatus::Scheduled,
                ignore_probe: false,
                attempt_paths: Vec::new(),
                progress: None,
                error_message: None,
                output_path: None,
                success: None,
                completed_at: None,
                attempts_used: 0,
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            force_start: Arc::new(AtomicBool::new(false)),
            worker_started: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            active_handle: Arc::new(Mutex::new(None)),
            deps,
        })
    }

    /// Instantiates a supervisor whose scheduled-start wait loop begins
    /// immediately (spec.md §2 data flow: "Supervisor arms a one-shot timer
    /// to start-time" happens at instantiation, not only on an explicit
    /// `start()` call). `start()` (below) is the same transition invoked
    /// early/manually.
    pub fn spawn(self: &Arc<Self>) {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let supervisor = self.clone();
        std::thread::spawn(move || worker::run(supervisor));
    }

    /// Restores a supervisor for a recording whose `success` is still unset
    /// after a restart (spec.md §4.5 "Crash recovery"). Returns the
    /// constructed (not yet spawned) supervisor; caller must call `spawn`.
    pub fn restore(
        id: String,
        name: String,
        rtsp_url: String,
        start_time: DateTime<Utc>,
        duration_secs: i64,
        created_at: DateTime<Utc>,
        deps: Arc<SupervisorDeps>,
    ) -> Arc<Self> {
        let now = Utc::now();
        let remaining = duration_secs as f64 - (now - start_time).num_milliseconds() as f64 / 1000.0;
        let supervisor = Self::new(id, name, rtsp_url, start_time, duration_secs, created_at, deps);
        if start_time <= now && remaining <= 0.0 {
            // "no segments will exist for a first-time start; a prior run's
            // segments on disk are ignored by the restart code path" (spec.md
            // §4.5). We finalize immediately without ever starting a worker
            // thread; marking `worker_started` keeps a later `spawn()` call
            // (from registration bookkeeping) a no-op.
            let mut state = supervisor.state.lock().expect("state lock poisoned");
            state.status = RecordingStatus::Failed;
            state.success = Some(false);
            state.error_message = Some("missed scheduled start".to_string());
            state.completed_at = Some(now);
            drop(state);
            supervisor.worker_started.store(true, Ordering::SeqCst);

            let mut document = supervisor.deps.persistence.recordings.load();
            if let Some(row) = document.recordings.iter_mut().find(|r| r.id == supervisor.id) {
                row.success = Some(false);
                row.error_message = Some("missed scheduled start".to_string());
                row.completed_at = Some(now);
                row.updated_at = now;
            }
            if let Err(err) = supervisor.deps.persistence.recordings.save(document) {
                tracing::error!(recording_id = %supervisor.id, error = %err, "failed to persist missed-start finalization");
            }
        }
        supervisor
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        let state = self.state.lock().expect("state lock poisoned");
        RecordingSnapshot {
            id: self.id.clone(),
            name: state.name.clone(),
            rtsp_url: state.rtsp_url.clone(),
            start_time: state.start_time,
            duration_secs: state.duration_secs,
            status: state.status,
            ignore_probe: state.ignore_probe,
            attempt_count: state.attempt_paths.len(),
            progress: state.progress.clone(),
            error_message: state.error_message.clone(),
            output_path: state.output_path.clone(),
            success: state.success,
            created_at: self.created_at,
            updated_at: *self.updated_at.lock().expect("updated_at lock poisoned"),
            completed_at: state.completed_at,
        }
    }

    /// `start()` is a no-op (surfaced as a Conflict) unless currently
    /// `scheduled` (spec.md §4.5 "Idempotence"). If the recording is still
    /// in its finalized-failed "missed scheduled start" state (restored past
    /// its window), this also rejects with Conflict since that recording is
    /// already terminal.
    pub fn start(self: &Arc<Self>) -> CoreResult<()> {
        {
            let state = self.state.lock().expect("state lock poisoned");
            if state.status != RecordingStatus::Scheduled {
                return Err(CoreError::conflict(format!(
                    "recording {} is not scheduled (status={:?})",
                    self.id, state.status
                )));
            }
        }
        self.spawn();
        self.force_start.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `stop()` from a terminal state is a no-op (spec.md §4.5). From any
    /// non-terminal state it sets the cancellation token observed at every
    /// suspension point (spec.md §5) and soft-stops an active subprocess.
    pub fn stop(self: &Arc<Self>) -> CoreResult<()> {
        let is_terminal = {
            let state = self.state.lock().expect("state lock poisoned");
            state.status.is_terminal()
        };
        if is_terminal {
            return Ok(());
        }
        self.cancel.store(true, Ordering::SeqCst);
        if !self.worker_started.load(Ordering::SeqCst) {
            // Never started: finalize cancellation inline since there is no
            // worker thread to observe the cancel flag.
            self.spawn();
        }
        if let Some(handle) = self.active_handle.lock().expect("active_handle lock poisoned").as_mut() {
            handle.soft_stop();
        }
        Ok(())
    }

    /// Mutation of name/URL/startTime/duration is only accepted while
    /// `scheduled` (spec.md §4.5 "Update semantics"). Changing `startTime`
    /// re-arms the scheduled wait (realized here as the worker's polling
    /// loop simply reading the updated value on its next tick).
    pub fn update_schedule(
        &self,
        name: Option<String>,
        rtsp_url: Option<String>,
        start_time: Option<DateTime<Utc>>,
        duration_secs: Option<i64>,
    ) -> CoreResult<()> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.status != RecordingStatus::Scheduled {
            return Err(CoreError::conflict(format!(
                "recording {} cannot be updated in status {:?}",
                self.id, state.status
            )));
        }
        if let Some(name) = name {
            state.name = name;
        }
        if let Some(url) = rtsp_url {
            state.rtsp_url = url;
        }
        if let Some(start_time) = start_time {
            state.start_time = start_time;
        }
        if let Some(duration) = duration_secs {
            state.duration_secs = duration;
        }
        drop(state);
        *self.updated_at.lock().expect("updated_at lock poisoned") = Utc::now();
        Ok(())
    }

    /// `enableLiveCheck`/`disableLiveCheck` only toggle the flag; they never
    /// transition status (spec.md §4.5 "Idempotence").
    pub fn set_ignore_probe(&self, ignore: bool) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.ignore_probe = ignore;
    }

    /// Called by `delete_recording` before it removes this recording's
    /// persisted row and registry entry.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }
}
