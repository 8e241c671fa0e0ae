//! The per-recording worker thread: scheduled wait, liveness probe loop,
//! subprocess capture loop, and finalize/stitch. One function, driven by a
//! dedicated thread per recording: wait → spawn → poll-for-progress-or-exit
//! → finalize.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::persistence::RecordingRecord;
use crate::prober::ProbeOutcome;
use crate::settings::build_transcoder_args;
use crate::transcoder::{stitch, TranscoderEvent};

use super::status::RecordingStatus;
use super::RecordingSupervisor;

const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub(super) fn run(supervisor: Arc<RecordingSupervisor>) {
    if !wait_for_scheduled_start(&supervisor) {
        finalize(&supervisor, RecordingStatus::Cancelled, None);
        return;
    }

    let initial_start_time = {
        let state = supervisor.state.lock().expect("state lock poisoned");
        state.start_time
    };
    {
        let mut state = supervisor.state.lock().expect("state lock poisoned");
        state.status = RecordingStatus::Starting;
    }

    run_starting_and_recording(&supervisor, initial_start_time);
}

/// Returns `false` if cancelled while still scheduled.
fn wait_for_scheduled_start(supervisor: &Arc<RecordingSupervisor>) -> bool {
    loop {
        if supervisor.cancel.load(Ordering::SeqCst) {
            return false;
        }
        let forced = supervisor.force_start.swap(false, Ordering::SeqCst);
        let start_time = {
            let state = supervisor.state.lock().expect("state lock poisoned");
            state.start_time
        };
        if forced || Utc::now() >= start_time {
            return true;
        }
        std::thread::sleep(SCHEDULE_POLL_INTERVAL);
    }
}

fn remaining_secs(initial_start_time: chrono::DateTime<Utc>, duration_secs: i64) -> f64 {
    let elapsed = (Utc::now() - initial_start_time).num_milliseconds() as f64 / 1000.0;
    duration_secs as f64 - elapsed
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<sanitized_name>_<iso_timestamp>_attempt<k>.<ext>` (spec.md §3 "On-disk
/// layout"). The timestamp is this attempt's spawn instant, not the
/// recording's scheduled start, so concurrent attempts across recordings
/// sharing a name never collide.
fn attempt_path(settings: &crate::settings::Settings, name: &str, attempt: u32) -> PathBuf {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    settings.output_directory.join(format!(
        "{}_{}_attempt{}.{}",
        sanitize(name),
        timestamp,
        attempt,
        settings.container_format.extension()
    ))
}

fn final_path(settings: &crate::settings::Settings, id: &str, name: &str) -> PathBuf {
    settings
        .output_directory
        .join(format!("{}_{}.{}", sanitize(name), id, settings.container_format.extension()))
}

fn log_path(settings: &crate::settings::Settings, id: &str) -> PathBuf {
    settings.logs_directory.join(format!("{id}.log"))
}

fn run_starting_and_recording(supervisor: &Arc<RecordingSupervisor>, initial_start_time: chrono::DateTime<Utc>) {
    loop {
        if supervisor.cancel.load(Ordering::SeqCst) {
            finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
            return;
        }

        if !ensure_live(supervisor, initial_start_time) {
            // `ensure_live` already finalized if it returns false.
            return;
        }

        if supervisor.cancel.load(Ordering::SeqCst) {
            finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
            return;
        }

        let remaining = remaining_secs(initial_start_time, {
            let state = supervisor.state.lock().expect("state lock poisoned");
            state.duration_secs
        });
        if remaining <= 0.0 {
            finalize_with_attempts(supervisor, RecordingStatus::Completed, None);
            return;
        }

        {
            let mut state = supervisor.state.lock().expect("state lock poisoned");
            state.status = RecordingStatus::Recording;
        }

        match run_one_attempt(supervisor, remaining) {
            AttemptOutcome::Cancelled => {
                finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
                return;
            }
            AttemptOutcome::CleanExit => {
                finalize_with_attempts(supervisor, RecordingStatus::Completed, None);
                return;
            }
            AttemptOutcome::RetryableExit => {
                let remaining_after = remaining_secs(initial_start_time, {
                    let state = supervisor.state.lock().expect("state lock poisoned");
                    state.duration_secs
                });
                if remaining_after <= 0.0 {
                    finalize_with_attempts(
                        supervisor,
                        if has_attempts(supervisor) {
                            RecordingStatus::Completed
                        } else {
                            RecordingStatus::Failed
                        },
                        None,
                    );
                    return;
                }
                let exhausted = {
                    let mut state = supervisor.state.lock().expect("state lock poisoned");
                    state.attempts_used += 1;
                    let deps = &supervisor.deps;
                    deps.persistence.recordings.flush(false).ok();
                    state.attempts_used
                };
                let limit = supervisor.deps.persistence.settings.load().reconnect_attempts;
                if limit >= 0 && exhausted as i64 >= limit {
                    finalize_with_attempts(
                        supervisor,
                        if has_attempts(supervisor) {
                            RecordingStatus::Completed
                        } else {
                            RecordingStatus::Failed
                        },
                        Some("reconnect attempts exhausted".to_string()),
                    );
                    return;
                }
                {
                    let mut state = supervisor.state.lock().expect("state lock poisoned");
                    state.status = RecordingStatus::Retrying;
                }
                let delay = Duration::from_secs(supervisor.deps.persistence.settings.load().reconnect_delay_secs);
                if !interruptible_sleep(supervisor, delay) {
                    finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
                    return;
                }
                {
                    let mut state = supervisor.state.lock().expect("state lock poisoned");
                    state.status = RecordingStatus::Starting;
                }
                // loop back: re-probe before the next attempt
            }
        }
    }
}

fn has_attempts(supervisor: &Arc<RecordingSupervisor>) -> bool {
    !supervisor.state.lock().expect("state lock poisoned").attempt_paths.is_empty()
}

/// Sleeps in small increments so cancellation is observed promptly. Returns
/// `false` if cancelled during the sleep.
fn interruptible_sleep(supervisor: &Arc<RecordingSupervisor>, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if supervisor.cancel.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(CANCEL_POLL_INTERVAL);
        std::thread::sleep(step);
        remaining -= step;
    }
    !supervisor.cancel.load(Ordering::SeqCst)
}

/// Probes the stream, waiting and retrying on failure, until it is live, the
/// recording is cancelled, the remaining duration is exhausted, or the
/// reconnect budget is spent. Finalizes and returns `false` on any of the
/// latter three; returns `true` once live (or probing is disabled).
fn ensure_live(supervisor: &Arc<RecordingSupervisor>, initial_start_time: chrono::DateTime<Utc>) -> bool {
    loop {
        let ignore_probe = supervisor.state.lock().expect("state lock poisoned").ignore_probe;
        if ignore_probe {
            return true;
        }

        let url = supervisor.state.lock().expect("state lock poisoned").rtsp_url.clone();
        let outcome = supervisor.deps.prober.probe(&url, supervisor.deps.probe_timeout);
        if matches!(outcome, ProbeOutcome::Live) {
            return true;
        }

        if supervisor.cancel.load(Ordering::SeqCst) {
            finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
            return false;
        }

        let duration_secs = supervisor.state.lock().expect("state lock poisoned").duration_secs;
        let remaining = remaining_secs(initial_start_time, duration_secs);
        if remaining <= 0.0 {
            finalize_with_attempts(
                supervisor,
                if has_attempts(supervisor) {
                    RecordingStatus::Completed
                } else {
                    RecordingStatus::Failed
                },
                Some("stream never became live".to_string()),
            );
            return false;
        }

        let exhausted = {
            let mut state = supervisor.state.lock().expect("state lock poisoned");
            state.attempts_used += 1;
            state.attempts_used
        };
        let limit = supervisor.deps.persistence.settings.load().reconnect_attempts;
        if limit >= 0 && exhausted as i64 >= limit {
            finalize_with_attempts(
                supervisor,
                if has_attempts(supervisor) {
                    RecordingStatus::Completed
                } else {
                    RecordingStatus::Failed
                },
                Some("stream never became live".to_string()),
            );
            return false;
        }

        let delay = Duration::from_secs(supervisor.deps.persistence.settings.load().reconnect_delay_secs);
        if !interruptible_sleep(supervisor, delay) {
            finalize_with_attempts(supervisor, RecordingStatus::Cancelled, None);
            return false;
        }
    }
}

enum AttemptOutcome {
    CleanExit,
    RetryableExit,
    Cancelled,
}

fn run_one_attempt(supervisor: &Arc<RecordingSupervisor>, remaining: f64) -> AttemptOutcome {
    let settings = supervisor.deps.persistence.settings.load();
    let (id, name, url, attempt_index) = {
        let state = supervisor.state.lock().expect("state lock poisoned");
        (
            supervisor.id.clone(),
            state.name.clone(),
            state.rtsp_url.clone(),
            state.attempt_paths.len() as u32 + 1,
        )
    };
    let out_path = attempt_path(&settings, &name, attempt_index);
    {
        let mut state = supervisor.state.lock().expect("state lock poisoned");
        state.attempt_paths.push(out_path.clone());
    }

    let args = build_transcoder_args(&settings, &url, &out_path, remaining);
    let spawned = supervisor.deps.transcoder.spawn(&settings.transcoder_path, &args, &log_path(&settings, &id));
    let mut handle = match spawned {
        Ok(h) => h,
        Err(err) => {
            tracing::warn!(recording_id = %id, error = %err, "failed to spawn transcoder");
            return AttemptOutcome::RetryableExit;
        }
    };

    loop {
        if supervisor.cancel.load(Ordering::SeqCst) {
            handle.soft_stop();
            // Give it a moment to exit cleanly, then force it.
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            loop {
                match handle.next_event(Duration::from_millis(200)) {
                    Some(TranscoderEvent::Exit { .. }) => break,
                    Some(_) => continue,
                    None if std::time::Instant::now() >= deadline => {
                        handle.kill();
                        break;
                    }
                    None => continue,
                }
            }
            *supervisor.active_handle.lock().expect("active_handle lock poisoned") = None;
            return AttemptOutcome::Cancelled;
        }

        match handle.next_event(EVENT_POLL_INTERVAL) {
            Some(TranscoderEvent::Progress(snapshot)) => {
                let mut state = supervisor.state.lock().expect("state lock poisoned");
                state.progress = Some(snapshot);
            }
            Some(TranscoderEvent::Error(message)) => {
                tracing::warn!(recording_id = %id, %message, "transcoder reported an error");
            }
            Some(TranscoderEvent::Exit { code, .. }) => {
                let mut state = supervisor.state.lock().expect("state lock poisoned");
                state.progress = None;
                drop(state);
                return if code == Some(0) {
                    AttemptOutcome::CleanExit
                } else {
                    AttemptOutcome::RetryableExit
                };
            }
            None => continue,
        }
    }
}

fn finalize_with_attempts(supervisor: &Arc<RecordingSupervisor>, status: RecordingStatus, message: Option<String>) {
    finalize(supervisor, status, message)
}

fn finalize(supervisor: &Arc<RecordingSupervisor>, status: RecordingStatus, message: Option<String>) {
    let settings = supervisor.deps.persistence.settings.load();
    let (id, name, attempts) = {
        let state = supervisor.state.lock().expect("state lock poisoned");
        (supervisor.id.clone(), state.name.clone(), state.attempt_paths.clone())
    };

    let mut output_path = None;
    let mut stitch_error = None;
    if !attempts.is_empty() {
        let dest = final_path(&settings, &id, &name);
        match stitch(supervisor.deps.transcoder.as_ref(), &settings, &attempts, &dest) {
            Ok(()) => output_path = Some(dest),
            Err(err) => {
                tracing::error!(recording_id = %id, error = %err, "stitch failed");
                output_path = Some(dest);
                stitch_error = Some(err.to_string());
            }
        }
    }

    let success = matches!(status, RecordingStatus::Completed);
    let error_message = match (message, stitch_error) {
        (Some(m), Some(s)) => Some(format!("{m}; stitch error: {s}")),
        (Some(m), None) => Some(m),
        (None, Some(s)) => Some(format!("stitch error: {s}")),
        (None, None) if matches!(status, RecordingStatus::Cancelled) => Some("cancelled".to_string()),
        (None, None) => None,
    };
    let completed_at = Utc::now();

    {
        let mut state = supervisor.state.lock().expect("state lock poisoned");
        state.status = status;
        state.success = Some(success);
        state.error_message = error_message.clone();
        state.output_path = output_path.clone();
        state.completed_at = Some(completed_at);
    }
    *supervisor.updated_at.lock().expect("updated_at lock poisoned") = completed_at;

    if supervisor.is_deleted() {
        // The recording was deleted out from under this worker while it was
        // still running. Its row is already gone from the document; don't
        // resurrect it, and clean up whatever this attempt produced.
        if let Some(path) = &output_path {
            let _ = std::fs::remove_file(path);
        }
        return;
    }

    persist_terminal_state(supervisor, success, output_path, error_message, completed_at);

    if success {
        if let Some(hook) = supervisor.deps.on_completed.as_ref() {
            hook();
        }
    }
}

fn persist_terminal_state(
    supervisor: &Arc<RecordingSupervisor>,
    success: bool,
    output_path: Option<PathBuf>,
    error_message: Option<String>,
    completed_at: chrono::DateTime<Utc>,
) {
    let store = &supervisor.deps.persistence.recordings;
    let mut document = store.load();
    if let Some(row) = document.recordings.iter_mut().find(|r| r.id == supervisor.id) {
        apply_terminal_fields(row, success, output_path, error_message, completed_at);
    } else {
        let state = supervisor.state.lock().expect("state lock poisoned");
        let mut row = RecordingRecord {
            id: supervisor.id.clone(),
            name: state.name.clone(),
            rtsp_url: state.rtsp_url.clone(),
            start_time: state.start_time,
            duration: state.duration_secs,
            success: None,
            output_path: None,
            created_at: supervisor.created_at,
            updated_at: completed_at,
            completed_at: None,
            error_message: None,
            extra: Default::default(),
        };
        drop(state);
        apply_terminal_fields(&mut row, success, output_path, error_message, completed_at);
        document.recordings.push(row);
    }
    if let Err(err) = store.save(document) {
        tracing::error!(recording_id = %supervisor.id, error = %err, "failed to persist terminal recording state");
    }
}

fn apply_terminal_fields(
    row: &mut RecordingRecord,
    success: bool,
    output_path: Option<PathBuf>,
    error_message: Option<String>,
    completed_at: chrono::DateTime<Utc>,
) {
    row.success = Some(success);
    row.output_path = output_path.map(|p| p.to_string_lossy().into_owned());
    row.error_message = error_message;
    row.completed_at = Some(completed_at);
    row.updated_at = completed_at;
}
