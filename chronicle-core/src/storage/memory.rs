/*!
In-memory storage driver.
*/

use super::{capture_time, resolve, validate_save, StorageDriver};
use crate::payload::Payload;
use crate::record::{CaptureMeta, SnapshotFilter, SnapshotId, SnapshotRecord};
use crate::{ChronicleError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<SnapshotId, SnapshotRecord>,
    last_id: SnapshotId,
}

/// Memory-based storage driver
///
/// Records live only as long as the process. Clones share the same backing
/// store, so every facade built from a clone sees the same records; create a
/// fresh instance (or call [`MemoryStorage::reset`]) to isolate scenarios.
///
/// # Example
/// ```rust
/// use chronicle_core::storage::{MemoryStorage, StorageDriver};
/// use chronicle_core::record::{CaptureMeta, SnapshotFilter};
/// use chronicle_core::Payload;
///
/// let storage = MemoryStorage::new();
/// let shared = storage.clone();
/// storage.save("v1", &Payload::default(), &CaptureMeta::new("User", "42"))?;
/// assert_eq!(shared.list(&SnapshotFilter::new())?.len(), 1);
///
/// storage.reset()?;
/// assert!(shared.list(&SnapshotFilter::new())?.is_empty());
/// # Ok::<(), chronicle_core::ChronicleError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record and restart id assignment
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state()?;
        state.records.clear();
        state.last_id = 0;
        debug!("memory storage reset");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| ChronicleError::storage(format!("Memory storage lock poisoned: {e}")))
    }
}

impl StorageDriver for MemoryStorage {
    fn save(&self, label: &str, payload: &Payload, meta: &CaptureMeta) -> Result<SnapshotRecord> {
        validate_save(label, meta)?;
        let mut state = self.state()?;

        let newest = state
            .records
            .values()
            .filter(|r| r.belongs_to(&meta.subject_type, &meta.subject_id))
            .map(|r| r.created_at)
            .max();
        let created_at = capture_time(meta, newest);

        state.last_id += 1;
        let record = SnapshotRecord::assemble(state.last_id, label, payload, meta, created_at)?;
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn load(&self, id_or_label: &str) -> Result<Option<SnapshotRecord>> {
        let state = self.state()?;
        Ok(resolve(state.records.values().cloned().collect(), id_or_label))
    }

    fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>> {
        let state = self.state()?;
        Ok(filter.apply(state.records.values().cloned()))
    }

    fn delete(&self, id_or_label: &str) -> Result<bool> {
        let mut state = self.state()?;
        let Some(record) = resolve(state.records.values().cloned().collect(), id_or_label) else {
            return Ok(false);
        };
        Ok(state.records.remove(&record.id).is_some())
    }

    fn clear(&self, subject_type: Option<&str>) -> Result<usize> {
        let mut state = self.state()?;
        let before = state.records.len();
        match subject_type {
            Some(subject_type) => state.records.retain(|_, r| r.subject_type != subject_type),
            None => state.records.clear(),
        }
        Ok(before - state.records.len())
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }
}
