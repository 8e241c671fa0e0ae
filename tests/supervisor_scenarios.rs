//! End-to-end Recording Supervisor scenarios (seeded directly from the
//! scenario list this crate's state machine is built against), driven by a
//! scripted fake prober and the in-tree `FakeTranscoder`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camvault_core::persistence::Persistence;
use camvault_core::prober::{LivenessProber, ProbeOutcome};
use camvault_core::settings::SettingsPatch;
use camvault_core::supervisor::{RecordingStatus, RecordingSupervisor, SupervisorDeps};
use camvault_core::transcoder::{FakeTranscoder, TranscoderEvent, TranscoderHandle, TranscoderSpawn};
use chrono::Utc;

/// A transcoder whose first attempt exits nonzero (a mid-capture drop) and
/// whose every later attempt exits cleanly, so a retry-then-succeed sequence
/// is deterministic instead of timing-dependent.
struct FlakyTranscoder {
    run_duration: Duration,
    spawned: AtomicUsize,
}

impl FlakyTranscoder {
    fn new(run_duration: Duration) -> Self {
        Self {
            run_duration,
            spawned: AtomicUsize::new(0),
        }
    }
}

impl TranscoderSpawn for FlakyTranscoder {
    fn spawn(&self, _program: &str, args: &[String], log_path: &Path) -> anyhow::Result<Box<dyn TranscoderHandle>> {
        let attempt = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(log_path, b"")?;
        if let Some(out_path) = args.last() {
            let out_path = Path::new(out_path);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out_path, vec![0u8; 1024])?;
        }
        let exit_code = if attempt == 1 { 1 } else { 0 };
        Ok(Box::new(FlakyHandle {
            deadline: std::time::Instant::now() + self.run_duration,
            exit_code,
            exited: false,
        }))
    }

    fn stitch(&self, _program: &str, segments: &[PathBuf], final_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut combined = Vec::new();
        for segment in segments {
            if let Ok(bytes) = std::fs::read(segment) {
                combined.extend(bytes);
            }
        }
        std::fs::write(final_path, combined)?;
        for segment in segments {
            let _ = std::fs::remove_file(segment);
        }
        Ok(())
    }
}

struct FlakyHandle {
    deadline: std::time::Instant,
    exit_code: i32,
    exited: bool,
}

impl TranscoderHandle for FlakyHandle {
    fn next_event(&mut self, timeout: Duration) -> Option<TranscoderEvent> {
        if self.exited {
            return None;
        }
        let now = std::time::Instant::now();
        if now >= self.deadline {
            self.exited = true;
            return Some(TranscoderEvent::Exit {
                code: Some(self.exit_code),
                signal: None,
            });
        }
        std::thread::sleep((self.deadline - now).min(timeout));
        None
    }

    fn soft_stop(&mut self) {
        self.exited = true;
        self.deadline = std::time::Instant::now();
    }

    fn kill(&mut self) {
        self.exited = true;
    }
}

struct ScriptedProber {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    tail: ProbeOutcome,
}

impl ScriptedProber {
    fn new(outcomes: Vec<ProbeOutcome>, tail: ProbeOutcome) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            tail,
        }
    }

    fn always(outcome: ProbeOutcome) -> Self {
        Self::new(Vec::new(), outcome)
    }
}

impl LivenessProber for ScriptedProber {
    fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        let mut outcomes = self.outcomes.lock().unwrap();
        outcomes.pop_front().unwrap_or(self.tail)
    }
}

fn setup(dir: &std::path::Path, patch: SettingsPatch) -> Arc<Persistence> {
    let persistence = Arc::new(Persistence::new(
        dir.join("recordings.json"),
        dir.join("streams.json"),
        dir.join("settings.json"),
    ));
    let merged = camvault_core::settings::Settings::merge(&persistence.settings.load(), &patch);
    persistence.settings.save(merged).unwrap();
    persistence
}

fn deps<T: TranscoderSpawn + 'static>(
    persistence: Arc<Persistence>,
    prober: Arc<dyn LivenessProber>,
    transcoder: Arc<T>,
) -> Arc<SupervisorDeps> {
    Arc::new(SupervisorDeps {
        persistence,
        prober,
        transcoder,
        probe_timeout: Duration::from_millis(200),
        on_completed: None,
    })
}

fn wait_for_terminal(supervisor: &Arc<RecordingSupervisor>, timeout: Duration) -> RecordingStatus {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let status = supervisor.snapshot().status;
        if status.is_terminal() {
            return status;
        }
        if std::time::Instant::now() >= deadline {
            return status;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn happy_path_completes_with_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            ..Default::default()
        },
    );
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::always(ProbeOutcome::Live));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(300), 0));

    let supervisor = RecordingSupervisor::new(
        "rec-1".to_string(),
        "A".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        1,
        Utc::now(),
        deps(persistence, prober, transcoder),
    );
    supervisor.spawn();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(5));
    assert_eq!(status, RecordingStatus::Completed);
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.attempt_count, 1);
    assert_eq!(snapshot.success, Some(true));
    let output_path = snapshot.output_path.expect("completed recording has an output path");
    assert!(output_path.exists());
    assert!(output_path.to_string_lossy().contains("A_rec-1"));
}

#[test]
fn waits_for_liveness_before_recording() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            reconnect_delay_secs: Some(1),
            reconnect_attempts: Some(10),
            ..Default::default()
        },
    );
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::new(
        vec![ProbeOutcome::NotFound, ProbeOutcome::NotFound, ProbeOutcome::NotFound],
        ProbeOutcome::Live,
    ));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(300), 0));

    let supervisor = RecordingSupervisor::new(
        "rec-2".to_string(),
        "B".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        1,
        Utc::now(),
        deps(persistence, prober, transcoder),
    );
    supervisor.spawn();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(10));
    assert_eq!(status, RecordingStatus::Completed);
    assert_eq!(supervisor.snapshot().attempt_count, 1);
}

#[test]
fn mid_capture_drop_retries_and_stitches() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            reconnect_delay_secs: Some(1),
            reconnect_attempts: Some(10),
            ..Default::default()
        },
    );
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::always(ProbeOutcome::Live));
    // First attempt drops mid-capture (nonzero exit); the retry after it
    // completes cleanly. A generous 10s duration budget leaves plenty of
    // room for both the 200ms attempt plus the 1s reconnect delay plus the
    // second 200ms attempt to land well inside the window.
    let transcoder = Arc::new(FlakyTranscoder::new(Duration::from_millis(200)));

    let supervisor = RecordingSupervisor::new(
        "rec-3".to_string(),
        "C".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        10,
        Utc::now(),
        deps(persistence, prober, transcoder.clone()),
    );
    supervisor.spawn();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(10));
    assert_eq!(status, RecordingStatus::Completed);
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.attempt_count, 2, "expected the dropped attempt plus the successful retry");
    assert_eq!(transcoder.spawned.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot.success, Some(true));
    let output_path = snapshot.output_path.expect("completed recording has an output path");
    // Two 1024-byte attempt segments concatenated into one stitched output.
    assert_eq!(std::fs::metadata(&output_path).unwrap().len(), 2048);
}

#[test]
fn exhausted_retries_with_partial_data_completes_with_stitched_segment() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            reconnect_delay_secs: Some(1),
            reconnect_attempts: Some(2),
            ..Default::default()
        },
    );
    // Live just long enough for one attempt, then the stream never comes
    // back: the reconnect-attempt budget is shared between "attempt exited
    // nonzero" and "stream never became live" retries, so it exhausts on the
    // post-attempt liveness wait rather than spawning a second attempt.
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::new(vec![ProbeOutcome::Live], ProbeOutcome::NotFound));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(100), 1));

    let supervisor = RecordingSupervisor::new(
        "rec-7".to_string(),
        "G".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        30,
        Utc::now(),
        deps(persistence, prober, transcoder.clone()),
    );
    supervisor.spawn();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(10));
    assert_eq!(status, RecordingStatus::Completed);
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.success, Some(true));
    assert!(snapshot.attempt_count >= 1);
    assert_eq!(transcoder.spawned.load(Ordering::SeqCst), 1);
    let output_path = snapshot.output_path.expect("partial completion still stitches what it has");
    assert!(output_path.exists());
    let error_message = snapshot.error_message.expect("partial completion explains why it stopped early");
    assert!(
        error_message.contains("live"),
        "expected the error message to explain the exhausted reconnect attempts, got: {error_message}"
    );
}

#[test]
fn exhausted_retries_with_no_data_fails() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            reconnect_delay_secs: Some(1),
            reconnect_attempts: Some(3),
            ..Default::default()
        },
    );
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::always(ProbeOutcome::NotFound));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(100), 0));

    let supervisor = RecordingSupervisor::new(
        "rec-4".to_string(),
        "D".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        30,
        Utc::now(),
        deps(persistence, prober, transcoder.clone()),
    );
    supervisor.spawn();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(10));
    assert_eq!(status, RecordingStatus::Failed);
    let snapshot = supervisor.snapshot();
    assert!(snapshot.output_path.is_none());
    assert!(snapshot.error_message.unwrap().contains("live"));
    assert_eq!(transcoder.spawned.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn cancellation_during_probe_wait_never_spawns_a_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(
        dir.path(),
        SettingsPatch {
            output_directory: Some(dir.path().join("out")),
            logs_directory: Some(dir.path().join("logs")),
            reconnect_delay_secs: Some(2),
            reconnect_attempts: Some(10),
            ..Default::default()
        },
    );
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::always(ProbeOutcome::NotFound));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(100), 0));

    let supervisor = RecordingSupervisor::new(
        "rec-5".to_string(),
        "E".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now(),
        30,
        Utc::now(),
        deps(persistence, prober, transcoder.clone()),
    );
    supervisor.spawn();
    std::thread::sleep(Duration::from_millis(300));
    supervisor.stop().unwrap();

    let status = wait_for_terminal(&supervisor, Duration::from_secs(5));
    assert_eq!(status, RecordingStatus::Cancelled);
    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.success, Some(false));
    assert_eq!(snapshot.error_message.as_deref(), Some("cancelled"));
    assert_eq!(transcoder.spawned.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn updating_schedule_while_scheduled_is_accepted_but_not_once_started() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = setup(dir.path(), SettingsPatch::default());
    let prober: Arc<dyn LivenessProber> = Arc::new(ScriptedProber::always(ProbeOutcome::Live));
    let transcoder = Arc::new(FakeTranscoder::new(Duration::from_millis(50), 0));

    let supervisor = RecordingSupervisor::new(
        "rec-6".to_string(),
        "F".to_string(),
        "rtsp://h/s".to_string(),
        Utc::now() + chrono::Duration::hours(1),
        5,
        Utc::now(),
        deps(persistence, prober, transcoder),
    );

    supervisor.update_schedule(Some("F2".to_string()), None, None, Some(10)).unwrap();
    assert_eq!(supervisor.snapshot().name, "F2");
    assert_eq!(supervisor.snapshot().duration_secs, 10);

    supervisor.start().unwrap();
    let _ = wait_for_terminal(&supervisor, Duration::from_secs(5));
    let err = supervisor.update_schedule(Some("F3".to_string()), None, None, None).unwrap_err();
    assert!(err.to_string().contains("conflict"));
}
