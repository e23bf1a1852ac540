/*!
Snapshot manager that orchestrates capture, comparison and restore.

This module contains the facade the rest of an application talks to. It wires
the serialization engine, a storage driver, the diff and restore engines and
the retention policy together under one configuration.
*/

use crate::config::{ChronicleConfig, StorageBackend};
use crate::diff::{diff_records, DiffResult};
use crate::payload::Attributes;
use crate::record::{CaptureMeta, EventType, LifecycleEvent, SnapshotFilter, SnapshotRecord};
use crate::report::ReportFormat;
use crate::serialize::{serialize, SerializeOptions};
use crate::storage::{FileStorage, MemoryStorage, StorageDriver};
use crate::subject::{Restorable, Snapshotable};
use crate::{retention, ChronicleError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Entry point for host lifecycle notifications.
///
/// The host object model calls this when a subject is created, updated or
/// deleted. Implementations decide whether the event warrants a snapshot.
pub trait LifecycleObserver {
    fn on_lifecycle_event(
        &self,
        subject: &dyn Snapshotable,
        event: LifecycleEvent,
    ) -> Result<Option<SnapshotRecord>>;
}

/// Outcome of a scheduled batch capture
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Records stored by the batch, in input order
    pub records: Vec<SnapshotRecord>,
    /// One message per failed subject
    pub errors: Vec<String>,
}

impl BatchSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Main facade for snapshot operations
///
/// Generic over the storage driver so callers can pick a concrete backend at
/// compile time, or use [`create_manager_from_config`] for a boxed one.
///
/// # Example
/// ```rust
/// use chronicle_core::{DocumentSubject, MemoryStorage, SnapshotManager};
/// use serde_json::json;
///
/// let manager = SnapshotManager::new(MemoryStorage::new());
///
/// let mut user = DocumentSubject::new(
///     "app::User",
///     json!({"id": 42, "name": "Alice", "age": 30}).as_object().cloned().unwrap(),
/// );
/// manager.capture_manual(&user, Some("v1"))?;
///
/// user.set("age", json!(31));
/// manager.capture_manual(&user, Some("v2"))?;
///
/// let changes = manager.compare("v1", "v2")?;
/// assert_eq!(changes.modified["age"].to, json!(31));
/// # Ok::<(), chronicle_core::ChronicleError>(())
/// ```
pub struct SnapshotManager<S>
where
    S: StorageDriver,
{
    storage: S,
    config: ChronicleConfig,
}

impl<S> SnapshotManager<S>
where
    S: StorageDriver,
{
    /// Create a manager with the default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, ChronicleConfig::default())
    }

    /// Create a manager with an explicit configuration.
    ///
    /// The `storage` section of `config` is informational here; the driver
    /// passed in is the one used.
    pub fn with_config(storage: S, config: ChronicleConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    pub fn serialize_options(&self) -> &SerializeOptions {
        &self.config.serialization
    }

    /// Serialize `subject` and store the payload under `label`.
    ///
    /// Nothing is stored when serialization fails.
    pub fn capture(
        &self,
        subject: &dyn Snapshotable,
        label: &str,
        event_type: EventType,
        metadata: Option<Attributes>,
    ) -> Result<SnapshotRecord> {
        #[cfg(feature = "metrics")]
        let timer = crate::observability::MetricsTimer::start();

        let result = self.store(subject, label, event_type, metadata);

        #[cfg(feature = "metrics")]
        match &result {
            Ok(record) => timer.finish(record.payload.size_bytes()),
            Err(_) => timer.finish_with_error(),
        }
        result
    }

    fn store(
        &self,
        subject: &dyn Snapshotable,
        label: &str,
        event_type: EventType,
        metadata: Option<Attributes>,
    ) -> Result<SnapshotRecord> {
        let payload = serialize(subject, &self.config.serialization)?;

        let mut meta = CaptureMeta::new(subject.subject_type(), subject.subject_id())
            .with_event(event_type);
        meta.metadata = metadata;

        let record = self.storage.save(label, &payload, &meta)?;
        info!(
            snapshot_id = record.id,
            subject_type = %record.subject_type,
            subject_id = %record.subject_id,
            label = %record.label,
            event = %record.event_type,
            driver = self.storage.driver_name(),
            "snapshot captured"
        );
        Ok(record)
    }

    /// Capture on explicit request. Without a label, `manual-<timestamp>` is used.
    pub fn capture_manual(
        &self,
        subject: &dyn Snapshotable,
        label: Option<&str>,
    ) -> Result<SnapshotRecord> {
        let label = match label {
            Some(label) => label.to_string(),
            None => timestamped_label("manual", Utc::now()),
        };
        self.capture(subject, &label, EventType::Manual, None)
    }

    /// Capture in response to a lifecycle event.
    ///
    /// Returns `Ok(None)` without touching storage when automatic capture is
    /// disabled or the event is not configured for the subject's type.
    pub fn capture_automatic(
        &self,
        subject: &dyn Snapshotable,
        event: LifecycleEvent,
    ) -> Result<Option<SnapshotRecord>> {
        let subject_type = subject.subject_type();
        if !self
            .config
            .automatic_capture
            .should_capture(&subject_type, event)
        {
            debug!(subject_type = %subject_type, event = %event, "automatic capture skipped");
            return Ok(None);
        }
        let label = timestamped_label(&event.to_string(), Utc::now());
        self.capture(subject, &label, event.into(), None).map(Some)
    }

    /// Capture on behalf of an external scheduler
    pub fn capture_scheduled(
        &self,
        subject: &dyn Snapshotable,
        label: &str,
    ) -> Result<SnapshotRecord> {
        self.capture(subject, label, EventType::Scheduled, None)
    }

    /// Capture a batch of subjects under one label.
    ///
    /// At most `limit` subjects are processed. A failing subject is logged and
    /// counted; the rest of the batch still runs.
    pub fn capture_scheduled_batch<I>(
        &self,
        subjects: I,
        label: &str,
        limit: Option<usize>,
    ) -> BatchSummary
    where
        I: IntoIterator,
        I::Item: Snapshotable,
    {
        let mut summary = BatchSummary::default();
        for subject in subjects.into_iter().take(limit.unwrap_or(usize::MAX)) {
            match self.capture_scheduled(&subject, label) {
                Ok(record) => {
                    summary.succeeded += 1;
                    summary.records.push(record);
                }
                Err(e) => {
                    warn!(
                        subject_type = %subject.subject_type(),
                        subject_id = %subject.subject_id(),
                        error = %e,
                        "scheduled capture failed"
                    );
                    summary.failed += 1;
                    summary.errors.push(format!(
                        "{}#{}: {e}",
                        subject.subject_type(),
                        subject.subject_id()
                    ));
                }
            }
        }

        info!(
            label,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "scheduled batch finished"
        );
        summary
    }

    /// Load a record by id or label
    ///
    /// # Errors
    /// * `ChronicleError::NotFound` - If nothing is addressed by `id_or_label`
    pub fn find(&self, id_or_label: &str) -> Result<SnapshotRecord> {
        self.storage
            .load(id_or_label)?
            .ok_or_else(|| ChronicleError::not_found(format!("Snapshot '{id_or_label}'")))
    }

    /// Load a record of `subject`'s own lineage by id or label
    ///
    /// # Errors
    /// * `ChronicleError::NotFound` - If the subject has no such snapshot
    pub fn find_for_subject(
        &self,
        subject: &dyn Snapshotable,
        id_or_label: &str,
    ) -> Result<SnapshotRecord> {
        self.find_in_lineage(&subject.subject_type(), &subject.subject_id(), id_or_label)
    }

    fn find_in_lineage(
        &self,
        subject_type: &str,
        subject_id: &str,
        id_or_label: &str,
    ) -> Result<SnapshotRecord> {
        self.storage
            .load_for_subject(subject_type, subject_id, id_or_label)?
            .ok_or_else(|| {
                ChronicleError::not_found(format!(
                    "Snapshot '{id_or_label}' for {subject_type}#{subject_id}"
                ))
            })
    }

    /// Attribute-level differences from `a` to `b`, each given by id or label
    pub fn compare(&self, a: &str, b: &str) -> Result<DiffResult> {
        let before = self.find(a)?;
        let after = self.find(b)?;
        Ok(diff_records(&before, &after))
    }

    /// Restore `subject` from one of its own snapshots.
    ///
    /// Returns what the subject's persistence step reported. No snapshot is
    /// taken afterwards.
    ///
    /// # Errors
    /// * `ChronicleError::NotFound` - If the subject has no such snapshot
    /// * `ChronicleError::InvalidSnapshot` - If the record has no attributes
    pub fn restore(&self, subject: &mut dyn Restorable, id_or_label: &str) -> Result<bool> {
        let subject_type = subject.subject_type();
        let subject_id = subject.subject_id();
        let record = self.find_in_lineage(&subject_type, &subject_id, id_or_label)?;

        let outcome = crate::restore::restore(subject, &record)?;

        #[cfg(feature = "metrics")]
        if let Ok(metrics) = crate::observability::ChronicleMetrics::global() {
            metrics.record_restore();
        }
        info!(
            snapshot_id = record.id,
            subject_type = %subject_type,
            subject_id = %subject_id,
            persisted = outcome.persisted,
            "snapshot restored"
        );
        Ok(outcome.persisted)
    }

    /// Every record of the subject's lineage, newest first
    pub fn history(&self, subject: &dyn Snapshotable) -> Result<Vec<SnapshotRecord>> {
        self.storage.list(&SnapshotFilter::for_subject(
            subject.subject_type(),
            subject.subject_id(),
        ))
    }

    /// Most recent record of the subject's lineage
    pub fn latest(&self, subject: &dyn Snapshotable) -> Result<Option<SnapshotRecord>> {
        let filter =
            SnapshotFilter::for_subject(subject.subject_type(), subject.subject_id()).limit(1);
        Ok(self.storage.list(&filter)?.into_iter().next())
    }

    pub fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>> {
        self.storage.list(filter)
    }

    pub fn delete(&self, id_or_label: &str) -> Result<bool> {
        let removed = self.storage.delete(id_or_label)?;
        debug!(id_or_label, removed, "snapshot delete");
        Ok(removed)
    }

    /// Remove all records, or all records of one subject type
    pub fn clear(&self, subject_type: Option<&str>) -> Result<usize> {
        let removed = self.storage.clear(subject_type)?;
        info!(
            subject_type = subject_type.unwrap_or("*"),
            removed, "snapshots cleared"
        );
        Ok(removed)
    }

    /// Remove records created before `older_than`
    pub fn purge(&self, older_than: DateTime<Utc>, subject_type: Option<&str>) -> Result<usize> {
        let removed = retention::purge(&self.storage, older_than, subject_type)?;

        #[cfg(feature = "metrics")]
        if let Ok(metrics) = crate::observability::ChronicleMetrics::global() {
            metrics.record_purged(removed);
        }
        Ok(removed)
    }

    /// Apply the configured retention window. Does nothing when retention is
    /// disabled.
    pub fn purge_expired(&self) -> Result<usize> {
        match self.config.retention.cutoff(Utc::now()) {
            Some(cutoff) => self.purge(cutoff, None),
            None => Ok(0),
        }
    }

    /// Render the records matching `filter` as a report
    pub fn report(&self, filter: &SnapshotFilter, format: ReportFormat) -> Result<String> {
        let records = self.list(filter)?;
        format.render(&records)
    }
}

impl<S> LifecycleObserver for SnapshotManager<S>
where
    S: StorageDriver,
{
    fn on_lifecycle_event(
        &self,
        subject: &dyn Snapshotable,
        event: LifecycleEvent,
    ) -> Result<Option<SnapshotRecord>> {
        self.capture_automatic(subject, event)
    }
}

fn timestamped_label(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format("%Y%m%dT%H%M%S%.6fZ"))
}

/// Create a snapshot manager based on configuration
///
/// Picks the storage driver named by `config.storage` and returns a manager
/// over it as a boxed driver.
///
/// # Example
/// ```rust
/// use chronicle_core::{create_manager_from_config, ChronicleConfig, StorageConfig, StorageDriver};
///
/// let config = ChronicleConfig::default().with_storage(StorageConfig::from_uri("memory://")?);
/// let manager = create_manager_from_config(config)?;
/// assert_eq!(manager.storage().driver_name(), "memory");
/// # Ok::<(), chronicle_core::ChronicleError>(())
/// ```
pub fn create_manager_from_config(
    config: ChronicleConfig,
) -> Result<SnapshotManager<Box<dyn StorageDriver>>> {
    config.validate()?;

    let path = config.storage.path.clone();
    let require_path = || {
        path.clone().ok_or_else(|| {
            ChronicleError::validation(format!(
                "{:?} backend requires a path",
                config.storage.backend
            ))
        })
    };

    let storage: Box<dyn StorageDriver> = match config.storage.backend {
        StorageBackend::Memory => Box::new(MemoryStorage::new()),
        StorageBackend::File => Box::new(FileStorage::new(require_path()?)),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => {
            Box::new(crate::storage::SqliteStorage::open(require_path()?)?)
        }
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => {
            return Err(ChronicleError::validation(
                "sqlite backend requires the `sqlite` feature",
            ))
        }
    };

    info!(driver = storage.driver_name(), "snapshot manager created");
    Ok(SnapshotManager::with_config(storage, config))
}
