use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A read-through, single-writer cache over one JSON document on disk.
///
/// The first write lands immediately, subsequent "cache-only" writes are
/// coalesced, and any durable write flushes the cache so the document on
/// disk is never partially updated (spec.md §4.1).
pub struct JsonDocumentStore<T> {
    path: PathBuf,
    default: T,
    debounce: Duration,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    cache: Option<T>,
    loaded: bool,
    last_durable_write: Option<Instant>,
    dirty_since_durable_write: bool,
}

impl<T> JsonDocumentStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(path: impl Into<PathBuf>, default: T) -> Self {
        Self {
            path: path.into(),
            default,
            debounce: Duration::from_millis(250),
            inner: Mutex::new(Inner {
                cache: None,
                loaded: false,
                last_durable_write: None,
                dirty_since_durable_write: false,
            }),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn ensure_loaded(&self, inner: &mut Inner<T>) {
        if inner.loaded {
            return;
        }
        inner.cache = Some(self.read_from_disk());
        inner.loaded = true;
    }

    /// Corrupt or missing files are treated as the caller-supplied default
    /// (spec.md §4.1): read errors never propagate out of this layer.
    fn read_from_disk(&self) -> T {
        if !self.path.exists() {
            return self.default.clone();
        }
        match fs::File::open(&self.path) {
            Ok(file) => {
                let reader = BufReader::new(file);
                match serde_json::from_reader::<_, T>(reader) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(path = %self.path.display(), error = %err, "corrupt persisted document, using default");
                        self.default.clone()
                    }
                }
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to open persisted document, using default");
                self.default.clone()
            }
        }
    }

    /// Returns the last committed snapshot, populating the cache on first
    /// read.
    pub fn load(&self) -> T {
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        self.ensure_loaded(&mut inner);
        inner.cache.clone().unwrap_or_else(|| self.default.clone())
    }

    /// Cache-only update: does not touch disk. Intended for hot paths such
    /// as per-job progress counters (spec.md §9 "progress updates as hot
    /// path"). The next call to `save` or `flush` makes it durable.
    pub fn update_cache_only(&self, value: T) {
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        inner.loaded = true;
        inner.cache = Some(value);
        inner.dirty_since_durable_write = true;
    }

    /// Durable write: replaces the on-disk document atomically from the
    /// given value, then updates the cache. A successful return implies the
    /// entire document is on disk (temp file + rename), never a partial
    /// write.
    pub fn save(&self, value: T) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        inner.loaded = true;
        inner.cache = Some(value.clone());
        drop(inner);
        self.write_durable(&value)?;
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        inner.last_durable_write = Some(Instant::now());
        inner.dirty_since_durable_write = false;
        Ok(())
    }

    /// Flushes a pending cache-only update to disk if one exists, honoring
    /// the debounce window unless `force` is set (terminal writes always
    /// force per spec.md §9).
    pub fn flush(&self, force: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        if !inner.dirty_since_durable_write {
            return Ok(());
        }
        let due = match inner.last_durable_write {
            None => true,
            Some(last) => force || last.elapsed() >= self.debounce,
        };
        if !due {
            return Ok(());
        }
        let snapshot = inner.cache.clone().unwrap_or_else(|| self.default.clone());
        drop(inner);
        self.write_durable(&snapshot)?;
        let mut inner = self.inner.lock().expect("document store lock poisoned");
        inner.last_durable_write = Some(Instant::now());
        inner.dirty_since_durable_write = false;
        Ok(())
    }

    fn write_durable(&self, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_sibling(&self.path);
        let file = fs::File::create(&tmp_path)?;
        if let Err(err) = serde_json::to_writer_pretty(&file, value) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
    struct Doc {
        values: Vec<i32>,
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("doc.json"), Doc::default());
        assert_eq!(store.load(), Doc::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("doc.json"), Doc::default());
        let doc = Doc { values: vec![1, 2, 3] };
        store.save(doc.clone()).unwrap();

        let store2 = JsonDocumentStore::new(dir.path().join("doc.json"), Doc::default());
        assert_eq!(store2.load(), doc);
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"not json").unwrap();
        let store = JsonDocumentStore::new(path, Doc::default());
        assert_eq!(store.load(), Doc::default());
    }

    #[test]
    fn cache_only_update_is_not_durable_until_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let store = JsonDocumentStore::new(path.clone(), Doc::default()).with_debounce(Duration::from_secs(3600));
        store.update_cache_only(Doc { values: vec![9] });
        assert!(!path.exists());
        store.flush(true).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unknown_fields_survive_a_save_load_round_trip() {
        use crate::persistence::documents::{RecordingRecord, RecordingsDocument};
        use chrono::Utc;
        use serde_json::json;

        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("recordings.json"), RecordingsDocument::default());

        let now = Utc::now();
        let mut extra = serde_json::Map::new();
        extra.insert("cameraModel".to_string(), json!("hikvision-dc200"));
        extra.insert("tags".to_string(), json!(["driveway", "night"]));
        let record = RecordingRecord {
            id: "rec-1".to_string(),
            name: "Driveway".to_string(),
            rtsp_url: "rtsp://h/s".to_string(),
            start_time: now,
            duration: 60,
            success: None,
            output_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            extra,
        };
        let document = RecordingsDocument { recordings: vec![record.clone()] };
        store.save(document.clone()).unwrap();

        let store2 = JsonDocumentStore::new(dir.path().join("recordings.json"), RecordingsDocument::default());
        let reloaded = store2.load();
        assert_eq!(reloaded, document);
        assert_eq!(reloaded.recordings[0].extra.get("cameraModel"), Some(&json!("hikvision-dc200")));
    }
}
