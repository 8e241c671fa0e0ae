use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult};

use super::RecordingSupervisor;

/// The recording-id -> supervisor index (spec.md §9 "global mutable state").
/// Owned by whoever assembles the core (the Command Surface in this crate),
/// never exposed as a raw map: only `register`/`lookup`/`remove`/`list`.
/// Writes are exclusive; reads may be concurrent (spec.md §5).
#[derive(Default)]
pub struct SupervisorRegistry {
    inner: Mutex<HashMap<String, Arc<RecordingSupervisor>>>,
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construction enforces uniqueness (spec.md §4.5): registering a second
    /// supervisor under an id already present is a conflict.
    pub fn register(&self, supervisor: Arc<RecordingSupervisor>) -> CoreResult<()> {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        if map.contains_key(&supervisor.id) {
            return Err(CoreError::conflict(format!(
                "a supervisor for recording {} is already registered",
                supervisor.id
            )));
        }
        map.insert(supervisor.id.clone(), supervisor);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<RecordingSupervisor>> {
        self.inner.lock().expect("registry lock poisoned").get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<RecordingSupervisor>> {
        self.inner.lock().expect("registry lock poisoned").remove(id)
    }

    pub fn list(&self) -> Vec<Arc<RecordingSupervisor>> {
        self.inner.lock().expect("registry lock poisoned").values().cloned().collect()
    }
}
