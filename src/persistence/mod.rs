//! Persistence (spec.md §4.1): three JSON documents (recordings,
//! saved-streams, settings) behind a read-through cache with a single-writer
//! discipline, implemented by `store::JsonDocumentStore<T>`.

mod documents;
mod store;

pub use documents::{RecordingRecord, RecordingsDocument, SavedStreamRecord, StreamsDocument};
pub use store::JsonDocumentStore;

use std::path::PathBuf;

use crate::settings::Settings;

/// Owns the three document stores and is the only component allowed to
/// touch the documents directory directly.
pub struct Persistence {
    pub recordings: JsonDocumentStore<RecordingsDocument>,
    pub streams: JsonDocumentStore<StreamsDocument>,
    pub settings: JsonDocumentStore<Settings>,
}

impl Persistence {
    pub fn new(
        recordings_path: PathBuf,
        streams_path: PathBuf,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            recordings: JsonDocumentStore::new(recordings_path, RecordingsDocument::default()),
            streams: JsonDocumentStore::new(streams_path, StreamsDocument::default()),
            settings: JsonDocumentStore::new(settings_path, Settings::default()),
        }
    }

    /// Flushes any cache-only writes across all three documents. Intended to
    /// be called on graceful shutdown so a crash right after does not lose
    /// more than the debounce window of progress.
    pub fn flush_all(&self) {
        if let Err(err) = self.recordings.flush(true) {
            tracing::error!(error = %err, "failed to flush recordings document");
        }
        if let Err(err) = self.streams.flush(true) {
            tracing::error!(error = %err, "failed to flush streams document");
        }
        if let Err(err) = self.settings.flush(true) {
            tracing::error!(error = %err, "failed to flush settings document");
        }
    }
}
