//! Transcoder Driver (spec.md §4.4): spawns the media-transcoder binary,
//! scans its error stream for progress lines, appends raw output to the
//! per-recording log file, and exposes a stitch (concat) operation.
//!
//! A dedicated stderr-reader thread feeds a channel; the main loop polls
//! for cancellation, drains progress lines, and waits for child exit
//! without blocking indefinitely on any single step.

pub mod progress;

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

pub use progress::ProgressSnapshot;

use crate::settings::{build_stitch_args, Settings};

#[derive(Debug, Clone)]
pub enum TranscoderEvent {
    Progress(ProgressSnapshot),
    Exit { code: Option<i32>, signal: Option<i32> },
    Error(String),
}

/// Abstracts subprocess spawning so the supervisor can be driven by a fake
/// transcoder in tests (spec.md §8's scenario harness: "a fake transcoder
/// driver that finishes after a configurable wall-clock interval and
/// synthesized exit code").
pub trait TranscoderSpawn: Send + Sync {
    fn spawn(&self, program: &str, args: &[String], log_path: &Path) -> anyhow::Result<Box<dyn TranscoderHandle>>;
    fn stitch(&self, program: &str, segments: &[PathBuf], final_path: &Path) -> anyhow::Result<()> {
        default_stitch(program, segments, final_path)
    }
}

pub trait TranscoderHandle: Send {
    /// Blocks up to `timeout` waiting for the next lifecycle/progress event.
    fn next_event(&mut self, timeout: Duration) -> Option<TranscoderEvent>;
    /// Soft-stop: graceful interrupt appropriate to the host, not a force
    /// kill (spec.md §4.5 "On cancellation...").
    fn soft_stop(&mut self);
    fn kill(&mut self);
}

/// Real subprocess-backed transcoder.
pub struct ProcessTranscoder;

impl TranscoderSpawn for ProcessTranscoder {
    fn spawn(&self, program: &str, args: &[String], log_path: &Path) -> anyhow::Result<Box<dyn TranscoderHandle>> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {program}: {e}"))?;

        let stderr = child.stderr.take().expect("stderr was piped");
        let (tx, rx) = mpsc::channel();
        let log_path = log_path.to_path_buf();
        std::thread::spawn(move || stderr_pump(stderr, tx, log_path));

        Ok(Box::new(ProcessHandle { child, events: rx }))
    }
}

fn stderr_pump(stderr: impl std::io::Read, tx: Sender<TranscoderEvent>, log_path: PathBuf) {
    let mut log_file = OpenOptions::new().create(true).append(true).open(&log_path).ok();
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(f) = log_file.as_mut() {
            let _ = writeln!(f, "{line}");
        }
        if let Some(snapshot) = progress::parse_progress_line(&line) {
            let _ = tx.send(TranscoderEvent::Progress(snapshot));
        }
    }
}

struct ProcessHandle {
    child: Child,
    events: Receiver<TranscoderEvent>,
}

impl TranscoderHandle for ProcessHandle {
    fn next_event(&mut self, timeout: Duration) -> Option<TranscoderEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => {
                if let Ok(Some(status)) = self.child.try_wait() {
                    Some(TranscoderEvent::Exit {
                        code: status.code(),
                        signal: unix_signal(&status),
                    })
                } else {
                    None
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let status = self.child.wait().ok();
                status.map(|s| TranscoderEvent::Exit {
                    code: s.code(),
                    signal: unix_signal(&s),
                })
            }
        }
    }

    fn soft_stop(&mut self) {
        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"q\n");
        }
        soft_interrupt(&self.child);
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn soft_interrupt(child: &Child) {
    // SIGINT: ask the transcoder to wind down and flush its output cleanly
    // rather than SIGKILL, which would corrupt the segment in progress.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
}

#[cfg(not(unix))]
fn soft_interrupt(_child: &Child) {}

/// Stitch N segments into one final file (spec.md §4.4 step 4). N=1 is a
/// rename; N>1 invokes the transcoder's concat demuxer with `-c copy`.
/// Post-stitch, the destination must be at least 90% of the sum of segment
/// sizes or the stitch is reported suspicious.
pub fn stitch(
    spawner: &dyn TranscoderSpawn,
    settings: &Settings,
    segments: &[PathBuf],
    final_path: &Path,
) -> anyhow::Result<()> {
    if segments.is_empty() {
        anyhow::bail!("stitch requires at least one segment");
    }
    if segments.len() == 1 {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&segments[0], final_path)?;
        return Ok(());
    }

    spawner.stitch(&settings.transcoder_path, segments, final_path)?;

    let total_segment_bytes: u64 = segments
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
    let final_bytes = std::fs::metadata(final_path).map(|m| m.len()).unwrap_or(0);
    if total_segment_bytes > 0 && (final_bytes as f64) < 0.9 * (total_segment_bytes as f64) {
        anyhow::bail!(
            "stitched output {final_bytes} bytes is suspiciously small vs. {total_segment_bytes} bytes of segments"
        );
    }

    for segment in segments {
        let _ = std::fs::remove_file(segment);
    }
    Ok(())
}

fn default_stitch(program: &str, segments: &[PathBuf], final_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let list_dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    let list_path = list_dir.join(format!(
        ".{}.concat.txt",
        final_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    ));
    {
        let mut list_file = std::fs::File::create(&list_path)?;
        for segment in segments {
            let basename = segment.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let escaped = basename.replace('\'', "'\\''");
            writeln!(list_file, "file '{escaped}'")?;
        }
    }

    let args = build_stitch_args(&list_path, final_path);
    let status = Command::new(program)
        .args(&args)
        .current_dir(list_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status();
    let _ = std::fs::remove_file(&list_path);

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => anyhow::bail!("concat stitch exited with {s}"),
        Err(err) => anyhow::bail!("failed to spawn concat stitch: {err}"),
    }
}

/// A fake transcoder for supervisor tests: each `spawn` returns a handle
/// that reports a single Exit event after a configured wall-clock interval
/// with a configured exit code, optionally emitting progress lines first.
pub struct FakeTranscoder {
    pub run_duration: Duration,
    pub exit_code: i32,
    pub spawned: Arc<std::sync::atomic::AtomicUsize>,
}

impl FakeTranscoder {
    pub fn new(run_duration: Duration, exit_code: i32) -> Self {
        Self {
            run_duration,
            exit_code,
            spawned: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }
}

impl TranscoderSpawn for FakeTranscoder {
    fn spawn(&self, _program: &str, args: &[String], log_path: &Path) -> anyhow::Result<Box<dyn TranscoderHandle>> {
        self.spawned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(log_path, b"")?;
        // The real transcoder would write media bytes to its output path
        // (the last build_transcoder_args entry); the fake stands in with a
        // small fixed payload so stitch has real files to rename/concat.
        if let Some(out_path) = args.last() {
            let out_path = Path::new(out_path);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(out_path, vec![0u8; 1024])?;
        }
        Ok(Box::new(FakeHandle {
            deadline: std::time::Instant::now() + self.run_duration,
            exit_code: self.exit_code,
            exited: false,
            cancelled: false,
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

struct FakeHandle {
    deadline: std::time::Instant,
    exit_code: i32,
    exited: bool,
    cancelled: bool,
}

impl TranscoderHandle for FakeHandle {
    fn next_event(&mut self, timeout: Duration) -> Option<TranscoderEvent> {
        if self.exited {
            return None;
        }
        let now = std::time::Instant::now();
        if now >= self.deadline {
            self.exited = true;
            let code = if self.cancelled { None } else { Some(self.exit_code) };
            return Some(TranscoderEvent::Exit { code, signal: None });
        }
        let remaining = self.deadline - now;
        std::thread::sleep(remaining.min(timeout));
        None
    }

    fn soft_stop(&mut self) {
        self.cancelled = true;
        self.deadline = std::time::Instant::now();
    }

    fn kill(&mut self) {
        self.cancelled = true;
        self.exited = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_stitch_is_a_rename() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("a_attempt1.mp4");
        std::fs::write(&seg, b"data").unwrap();
        let final_path = dir.path().join("a_final.mp4");
        let spawner = FakeTranscoder::new(Duration::from_millis(1), 0);
        stitch(&spawner, &Settings::default(), &[seg.clone()], &final_path).unwrap();
        assert!(final_path.exists());
        assert!(!seg.exists());
    }

    #[test]
    fn multi_segment_stitch_concatenates_and_deletes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let seg1 = dir.path().join("a_attempt1.mp4");
        let seg2 = dir.path().join("a_attempt2.mp4");
        std::fs::write(&seg1, vec![1u8; 100]).unwrap();
        std::fs::write(&seg2, vec![2u8; 100]).unwrap();
        let final_path = dir.path().join("a_final.mp4");
        let spawner = FakeTranscoder::new(Duration::from_millis(1), 0);
        stitch(&spawner, &Settings::default(), &[seg1.clone(), seg2.clone()], &final_path).unwrap();
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 200);
        assert!(!seg1.exists() && !seg2.exists());
    }

    #[test]
    fn suspiciously_small_stitch_output_fails() {
        struct TinyStitchTranscoder;
        impl TranscoderSpawn for TinyStitchTranscoder {
            fn spawn(&self, _: &str, _: &[String], _: &Path) -> anyhow::Result<Box<dyn TranscoderHandle>> {
                unreachable!()
            }
            fn stitch(&self, _: &str, _: &[PathBuf], final_path: &Path) -> anyhow::Result<()> {
                std::fs::write(final_path, vec![0u8; 10])?;
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let seg1 = dir.path().join("a_attempt1.mp4");
        let seg2 = dir.path().join("a_attempt2.mp4");
        std::fs::write(&seg1, vec![1u8; 100]).unwrap();
        std::fs::write(&seg2, vec![2u8; 100]).unwrap();
        let final_path = dir.path().join("a_final.mp4");
        let result = stitch(&TinyStitchTranscoder, &Settings::default(), &[seg1, seg2], &final_path);
        assert!(result.is_err());
    }
}
