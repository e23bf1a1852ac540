/*!
Local filesystem storage driver implementation.
*/

use super::{capture_time, resolve, validate_save, StorageDriver};
use crate::payload::Payload;
use crate::record::{CaptureMeta, SnapshotFilter, SnapshotId, SnapshotRecord};
use crate::{ChronicleError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_PREFIX: &str = "snapshot-";
const FILE_SUFFIX: &str = ".json";
const SEQUENCE_FILE: &str = ".sequence";

/// Local filesystem storage driver
///
/// Each snapshot is one JSON file under the configured directory, named after
/// its id. Writes go through a temporary file that is synced and renamed into
/// place, so a record is durable once `save` returns. Listing always
/// enumerates the directory; files removed concurrently are skipped.
///
/// # Example
/// ```rust
/// use chronicle_core::storage::{FileStorage, StorageDriver};
/// use chronicle_core::record::CaptureMeta;
/// use chronicle_core::Payload;
///
/// let dir = tempfile::tempdir()?;
/// let storage = FileStorage::new(dir.path());
/// let record = storage.save("v1", &Payload::default(), &CaptureMeta::new("User", "42"))?;
/// assert!(storage.record_path(record.id).exists());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage driver rooted at `base_dir`.
    ///
    /// The directory is created on first write.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the file holding snapshot `id`
    pub fn record_path(&self, id: SnapshotId) -> PathBuf {
        self.base_dir.join(format!("{FILE_PREFIX}{id:020}{FILE_SUFFIX}"))
    }

    fn parse_id(file_name: &str) -> Option<SnapshotId> {
        file_name
            .strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Ensure the base directory exists, creating it if necessary
    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                ChronicleError::storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Ids of every snapshot file currently in the directory
    fn scan_ids(&self) -> Result<Vec<SnapshotId>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ChronicleError::storage(format!(
                    "Failed to list {}: {}",
                    self.base_dir.display(),
                    e
                )))
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(Self::parse_id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Read one record. `Ok(None)` if the file does not exist (any more).
    fn read_record(&self, id: SnapshotId) -> Result<Option<SnapshotRecord>> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChronicleError::storage(format!(
                    "Failed to read snapshot from {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: SnapshotRecord = serde_json::from_slice(&bytes).map_err(|e| {
            ChronicleError::invalid_snapshot(format!("Corrupt snapshot {}: {e}", path.display()))
        })?;
        record.verify_integrity()?;
        Ok(Some(record))
    }

    /// Every record currently readable from the directory.
    ///
    /// Corrupt or tampered files are skipped with a warning; `load` by id still
    /// reports them.
    fn read_all(&self) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        for id in self.scan_ids()? {
            match self.read_record(id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(id, "snapshot file vanished during listing"),
                Err(e) => warn!(id, error = %e, "skipping unreadable snapshot file"),
            }
        }
        Ok(records)
    }

    /// Reserve the next id. The sequence file keeps ids unique even after the
    /// highest-numbered snapshot is deleted.
    fn next_id(&self) -> Result<SnapshotId> {
        let sequence_path = self.base_dir.join(SEQUENCE_FILE);
        let recorded = match fs::read_to_string(&sequence_path) {
            Ok(content) => content.trim().parse::<SnapshotId>().unwrap_or(0),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let highest = self.scan_ids()?.last().copied().unwrap_or(0);
        let id = recorded.max(highest) + 1;
        self.write_atomic(&sequence_path, id.to_string().as_bytes())?;
        Ok(id)
    }

    /// Write through a synced temporary file renamed into place
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| {
            ChronicleError::storage(format!(
                "Failed to write snapshot to {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Remove one snapshot file. False if it was already gone.
    fn remove_record(&self, id: SnapshotId) -> Result<bool> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChronicleError::storage(format!(
                "Failed to delete snapshot {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl StorageDriver for FileStorage {
    fn save(&self, label: &str, payload: &Payload, meta: &CaptureMeta) -> Result<SnapshotRecord> {
        validate_save(label, meta)?;
        self.ensure_base_dir()?;

        let newest = if meta.captured_at.is_none() {
            self.read_all()?
                .iter()
                .filter(|r| r.belongs_to(&meta.subject_type, &meta.subject_id))
                .map(|r| r.created_at)
                .max()
        } else {
            None
        };

        let id = self.next_id()?;
        let record = SnapshotRecord::assemble(id, label, payload, meta, capture_time(meta, newest))?;
        let json = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&self.record_path(id), &json)?;

        debug!(id, path = %self.record_path(id).display(), "snapshot written");
        Ok(record)
    }

    fn load(&self, id_or_label: &str) -> Result<Option<SnapshotRecord>> {
        if let Ok(id) = id_or_label.parse::<SnapshotId>() {
            if let Some(record) = self.read_record(id)? {
                return Ok(Some(record));
            }
        }
        Ok(resolve(self.read_all()?, id_or_label))
    }

    fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>> {
        Ok(filter.apply(self.read_all()?))
    }

    fn delete(&self, id_or_label: &str) -> Result<bool> {
        match self.load(id_or_label)? {
            Some(record) => self.remove_record(record.id),
            None => Ok(false),
        }
    }

    fn clear(&self, subject_type: Option<&str>) -> Result<usize> {
        let ids: Vec<SnapshotId> = match subject_type {
            // Unscoped clears go by file name so unreadable files are removed too.
            None => self.scan_ids()?,
            Some(subject_type) => self
                .read_all()?
                .into_iter()
                .filter(|r| r.subject_type == subject_type)
                .map(|r| r.id)
                .collect(),
        };

        let mut removed = 0;
        for id in ids {
            if self.remove_record(id)? {
                removed += 1;
            } else {
                warn!(id, "snapshot file vanished before removal");
            }
        }
        Ok(removed)
    }

    fn driver_name(&self) -> &'static str {
        "file"
    }
}
