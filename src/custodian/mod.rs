//! Storage Custodian (spec.md §4.6): a periodic sweep enforcing age-based
//! retention and a soft disk-usage cap over completed recordings, driven by
//! a background thread alternating sleep and sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::persistence::Persistence;

const INITIAL_SWEEP_DELAY: Duration = Duration::from_secs(5);
const PERIODIC_SWEEP_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);
const POST_COMPLETION_SWEEP_DELAY: Duration = Duration::from_secs(1);
const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Result of one sweep (spec.md §4.6 step 3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub deleted_old: usize,
    pub deleted_for_space: usize,
    pub current_storage_gb: f64,
}

pub struct Custodian {
    persistence: Arc<Persistence>,
    armed: AtomicBool,
}

impl Custodian {
    pub fn new(persistence: Arc<Persistence>) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            armed: AtomicBool::new(false),
        })
    }

    /// Starts the periodic background sweep loop. Safe to call more than
    /// once; only the first call spawns the thread (spec.md §4.6 "armed on
    /// first use").
    pub fn arm(self: &Arc<Self>) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let custodian = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(INITIAL_SWEEP_DELAY);
            loop {
                let result = custodian.sweep();
                tracing::info!(
                    deleted_old = result.deleted_old,
                    deleted_for_space = result.deleted_for_space,
                    current_storage_gb = result.current_storage_gb,
                    "storage custodian sweep complete"
                );
                std::thread::sleep(PERIODIC_SWEEP_INTERVAL);
            }
        });
    }

    /// Schedules one extra sweep after `delay` without touching the
    /// recurring schedule (spec.md §4.6 "an extra sweep 1 s after any
    /// successful recording completion").
    pub fn trigger_after(self: &Arc<Self>, delay: Duration) {
        let custodian = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            custodian.sweep();
        });
    }

    pub fn trigger_on_completion(self: &Arc<Self>) {
        self.trigger_after(POST_COMPLETION_SWEEP_DELAY);
    }

    /// Runs one sweep synchronously; used by the "run storage cleanup"
    /// command (spec.md §6) and by the background loop above. Idempotent
    /// when no files have changed (spec.md §8).
    pub fn sweep(&self) -> SweepResult {
        let settings = self.persistence.settings.load();
        let mut document = self.persistence.recordings.load();
        let now = Utc::now();

        let mut deleted_old = 0usize;
        if settings.auto_delete_after_days > 0 {
            let cutoff = now - chrono::Duration::days(settings.auto_delete_after_days as i64);
            let mut retained = Vec::with_capacity(document.recordings.len());
            for row in document.recordings.drain(..) {
                let eligible = row.success == Some(true) && row.completed_at.map(|c| c < cutoff).unwrap_or(false);
                if !eligible {
                    retained.push(row);
                    continue;
                }
                match row.output_path.as_deref().map(std::fs::remove_file) {
                    Some(Ok(())) | None => deleted_old += 1,
                    Some(Err(err)) => {
                        tracing::warn!(recording_id = %row.id, error = %err, "retention purge failed to delete output file");
                        retained.push(row);
                    }
                }
            }
            document.recordings = retained;
        }

        let mut deleted_for_space = 0usize;
        if settings.max_storage_gb > 0.0 {
            let cap_bytes = settings.max_storage_gb * BYTES_PER_GB;
            let mut sized: Vec<(usize, u64, chrono::DateTime<Utc>)> = document
                .recordings
                .iter()
                .enumerate()
                .filter(|(_, r)| r.success == Some(true))
                .filter_map(|(idx, r)| {
                    let path = r.output_path.as_deref()?;
                    let bytes = std::fs::metadata(path).ok()?.len();
                    Some((idx, bytes, r.completed_at.unwrap_or(r.created_at)))
                })
                .collect();
            let mut total_bytes: u64 = sized.iter().map(|(_, b, _)| b).sum();

            if (total_bytes as f64) > cap_bytes {
                sized.sort_by_key(|(_, _, completed_at)| *completed_at);
                let mut to_remove = std::collections::HashSet::new();
                for (idx, bytes, _) in sized {
                    if (total_bytes as f64) <= cap_bytes {
                        break;
                    }
                    let path = document.recordings[idx].output_path.clone();
                    let removed = match path.as_deref().map(std::fs::remove_file) {
                        Some(Ok(())) | None => true,
                        Some(Err(err)) => {
                            tracing::warn!(
                                recording_id = %document.recordings[idx].id,
                                error = %err,
                                "quota purge failed to delete output file"
                            );
                            false
                        }
                    };
                    if removed {
                        to_remove.insert(idx);
                        total_bytes = total_bytes.saturating_sub(bytes);
                        deleted_for_space += 1;
                    }
                }
                if !to_remove.is_empty() {
                    let mut kept = Vec::with_capacity(document.recordings.len() - to_remove.len());
                    for (idx, row) in document.recordings.into_iter().enumerate() {
                        if !to_remove.contains(&idx) {
                            kept.push(row);
                        }
                    }
                    document.recordings = kept;
                }
            }
        }

        let current_storage_bytes: u64 = document
            .recordings
            .iter()
            .filter(|r| r.success == Some(true))
            .filter_map(|r| r.output_path.as_deref())
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        if deleted_old > 0 || deleted_for_space > 0 {
            if let Err(err) = self.persistence.recordings.save(document) {
                tracing::error!(error = %err, "failed to persist custodian sweep result");
            }
        }

        SweepResult {
            deleted_old,
            deleted_for_space,
            current_storage_gb: current_storage_bytes as f64 / BYTES_PER_GB,
        }
    }

    /// `{usedGB, maxGB, percentage, autoDeleteDays}` for the "get storage
    /// stats" command (spec.md §6).
    pub fn storage_stats(&self) -> StorageStats {
        let settings = self.persistence.settings.load();
        let document = self.persistence.recordings.load();
        let used_bytes: u64 = document
            .recordings
            .iter()
            .filter(|r| r.success == Some(true))
            .filter_map(|r| r.output_path.as_deref())
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        let used_gb = used_bytes as f64 / BYTES_PER_GB;
        let percentage = if settings.max_storage_gb > 0.0 {
            (used_gb / settings.max_storage_gb) * 100.0
        } else {
            0.0
        };
        StorageStats {
            used_gb,
            max_gb: settings.max_storage_gb,
            percentage,
            auto_delete_days: settings.auto_delete_after_days,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub used_gb: f64,
    pub max_gb: f64,
    pub percentage: f64,
    pub auto_delete_days: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::RecordingRecord;
    use crate::settings::{Settings, SettingsPatch};

    fn make_persistence(dir: &std::path::Path) -> Arc<Persistence> {
        Arc::new(Persistence::new(
            dir.join("recordings.json"),
            dir.join("streams.json"),
            dir.join("settings.json"),
        ))
    }

    fn row(id: &str, completed_at: chrono::DateTime<Utc>, output_path: std::path::PathBuf) -> RecordingRecord {
        RecordingRecord {
            id: id.to_string(),
            name: id.to_string(),
            rtsp_url: "rtsp://h/s".to_string(),
            start_time: completed_at,
            duration: 60,
            success: Some(true),
            output_path: Some(output_path.to_string_lossy().into_owned()),
            created_at: completed_at,
            updated_at: completed_at,
            completed_at: Some(completed_at),
            error_message: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn retention_purge_deletes_recordings_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = make_persistence(dir.path());
        let settings = Settings::merge(
            &Settings::default(),
            &SettingsPatch {
                auto_delete_after_days: Some(7),
                ..Default::default()
            },
        );
        persistence.settings.save(settings).unwrap();

        let now = Utc::now();
        let ages_days = [1, 3, 8, 10, 30];
        let mut document = persistence.recordings.load();
        for (i, age) in ages_days.iter().enumerate() {
            let path = dir.path().join(format!("r{i}.mp4"));
            std::fs::write(&path, b"x").unwrap();
            document.recordings.push(row(&format!("r{i}"), now - chrono::Duration::days(*age), path));
        }
        persistence.recordings.save(document).unwrap();

        let custodian = Custodian::new(persistence.clone());
        let result = custodian.sweep();
        assert_eq!(result.deleted_old, 3);
        assert_eq!(persistence.recordings.load().recordings.len(), 2);
    }

    #[test]
    fn quota_purge_deletes_oldest_until_under_cap() {
        // Same 0.6/0.5/0.5-vs-1.0 cap ratios as the scenario this covers, but
        // scaled down by 1e6 so the test doesn't write real gigabytes to disk:
        // a "GB" here is 1000 bytes, a 1.0 cap is 1000 bytes.
        const TEST_BYTES_PER_GB: f64 = 1000.0;

        let dir = tempfile::tempdir().unwrap();
        let persistence = make_persistence(dir.path());
        let settings = Settings::merge(
            &Settings::default(),
            &SettingsPatch {
                max_storage_gb: Some(1.0),
                ..Default::default()
            },
        );
        persistence.settings.save(settings).unwrap();

        let now = Utc::now();
        let sizes_gb = [0.6, 0.5, 0.5];
        let mut document = persistence.recordings.load();
        for (i, size_gb) in sizes_gb.iter().enumerate() {
            let path = dir.path().join(format!("r{i}.mp4"));
            let bytes = (size_gb * TEST_BYTES_PER_GB) as usize;
            std::fs::write(&path, vec![0u8; bytes]).unwrap();
            document
                .recordings
                .push(row(&format!("r{i}"), now + chrono::Duration::seconds(i as i64), path));
        }
        persistence.recordings.save(document).unwrap();

        let custodian = Custodian::new(persistence.clone());
        let result = custodian.sweep();
        assert_eq!(result.deleted_for_space, 1);
        // current_storage_gb is computed against the real BYTES_PER_GB, so at
        // this scale it reports a tiny fraction rather than ~1.0; assert the
        // post-purge byte total directly instead.
        let remaining_bytes: u64 = persistence
            .recordings
            .load()
            .recordings
            .iter()
            .filter_map(|r| r.output_path.as_deref())
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        assert!((remaining_bytes as f64 - 1000.0).abs() < 1.0);
    }
}
