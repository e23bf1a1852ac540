/*!
Storage drivers for snapshot persistence.

This module defines the storage abstraction (port) and the bundled drivers
(adapters). The facade only talks to [`StorageDriver`], so a host application
can plug in its own backend by implementing the same five operations.
*/

pub mod file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::payload::Payload;
use crate::record::{CaptureMeta, SnapshotFilter, SnapshotId, SnapshotRecord};
use crate::{ChronicleError, Result};
use chrono::{DateTime, SubsecRound, Utc};

/// Storage abstraction for snapshot records
///
/// Every driver assigns identity and capture time on `save` and answers the
/// same lookups. Missing keys are reported as `Ok(None)` / `Ok(false)`, never
/// as errors.
pub trait StorageDriver {
    /// Persist a payload and return the stored record
    ///
    /// # Arguments
    /// * `label` - Caller-supplied human identifier, need not be unique
    /// * `payload` - The serialized subject state
    /// * `meta` - Subject identity, event type and free-form metadata
    fn save(&self, label: &str, payload: &Payload, meta: &CaptureMeta) -> Result<SnapshotRecord>;

    /// Load a record by id, or else by label (most recent record wins)
    fn load(&self, id_or_label: &str) -> Result<Option<SnapshotRecord>>;

    /// List records matching the filter, newest first
    fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>>;

    /// Delete the record `load` would resolve. True iff a record was removed.
    fn delete(&self, id_or_label: &str) -> Result<bool>;

    /// Remove all records, or all records of one subject type. Returns the count.
    fn clear(&self, subject_type: Option<&str>) -> Result<usize>;

    /// Resolve an id or label within one subject's lineage
    ///
    /// An id match wins over a label match; among label matches the most
    /// recent record wins.
    fn load_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        id_or_label: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let lineage = self.list(&SnapshotFilter::for_subject(subject_type, subject_id))?;
        Ok(resolve(lineage, id_or_label))
    }

    /// Short name of the backend, used in logs
    fn driver_name(&self) -> &'static str;
}

impl<D: StorageDriver + ?Sized> StorageDriver for Box<D> {
    fn save(&self, label: &str, payload: &Payload, meta: &CaptureMeta) -> Result<SnapshotRecord> {
        (**self).save(label, payload, meta)
    }

    fn load(&self, id_or_label: &str) -> Result<Option<SnapshotRecord>> {
        (**self).load(id_or_label)
    }

    fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>> {
        (**self).list(filter)
    }

    fn delete(&self, id_or_label: &str) -> Result<bool> {
        (**self).delete(id_or_label)
    }

    fn clear(&self, subject_type: Option<&str>) -> Result<usize> {
        (**self).clear(subject_type)
    }

    fn load_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        id_or_label: &str,
    ) -> Result<Option<SnapshotRecord>> {
        (**self).load_for_subject(subject_type, subject_id, id_or_label)
    }

    fn driver_name(&self) -> &'static str {
        (**self).driver_name()
    }
}

/// Pick the record addressed by `id_or_label` out of a candidate set.
pub(crate) fn resolve(records: Vec<SnapshotRecord>, id_or_label: &str) -> Option<SnapshotRecord> {
    if let Ok(id) = id_or_label.parse::<SnapshotId>() {
        if let Some(record) = records.iter().find(|r| r.id == id) {
            return Some(record.clone());
        }
    }
    records
        .into_iter()
        .filter(|r| r.label == id_or_label)
        .max_by(|a, b| a.lineage_cmp(b))
}

/// Check the arguments every driver's `save` must reject
pub(crate) fn validate_save(label: &str, meta: &CaptureMeta) -> Result<()> {
    if label.trim().is_empty() {
        return Err(ChronicleError::validation("label cannot be empty"));
    }
    meta.validate()
}

/// Capture time for a new record.
///
/// An explicit `captured_at` is taken as-is. Otherwise the current time is
/// used, clamped so it never precedes the newest record of the same subject.
/// Stored at microsecond precision so every backend round-trips it exactly.
pub(crate) fn capture_time(
    meta: &CaptureMeta,
    newest_for_subject: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    if let Some(at) = meta.captured_at {
        return at.trunc_subsecs(6);
    }
    let now = Utc::now().trunc_subsecs(6);
    match newest_for_subject {
        Some(newest) if newest > now => newest,
        _ => now,
    }
}

// Re-export types for convenience
pub use file::FileStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Shared contract tests run against every bundled driver.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::record::EventType;
    use chrono::Duration;
    use serde_json::json;

    pub fn payload(value: serde_json::Value) -> Payload {
        Payload::from_attributes(value.as_object().cloned().unwrap())
    }

    pub fn user(id: &str) -> CaptureMeta {
        CaptureMeta::new("app::User", id)
    }

    pub fn save_load_roundtrip<D: StorageDriver>(driver: &D) {
        let p = payload(json!({"name": "Alice", "age": 30, "tags": ["a", "b"]}));
        let saved = driver.save("v1", &p, &user("42")).unwrap();

        let by_id = driver.load(&saved.id.to_string()).unwrap().unwrap();
        assert_eq!(by_id, saved);
        assert_eq!(by_id.payload, p);
        assert_eq!(by_id.event_type, EventType::Manual);

        let by_label = driver.load("v1").unwrap().unwrap();
        assert_eq!(by_label.id, saved.id);
        assert!(driver.load("missing").unwrap().is_none());
    }

    pub fn ids_increase<D: StorageDriver>(driver: &D) {
        let a = driver.save("a", &payload(json!({"n": 1})), &user("1")).unwrap();
        let b = driver.save("b", &payload(json!({"n": 2})), &user("1")).unwrap();
        assert!(b.id > a.id);
        assert!(b.created_at >= a.created_at);
    }

    pub fn label_resolves_to_newest<D: StorageDriver>(driver: &D) {
        let now = Utc::now();
        let older = user("1").with_captured_at(now - Duration::hours(1));
        driver.save("nightly", &payload(json!({"n": 1})), &older).unwrap();
        let newer = driver
            .save("nightly", &payload(json!({"n": 2})), &user("1").with_captured_at(now))
            .unwrap();

        assert_eq!(driver.load("nightly").unwrap().unwrap().id, newer.id);
    }

    pub fn list_filters_and_orders<D: StorageDriver>(driver: &D) {
        let now = Utc::now();
        let at = |h: i64| now - Duration::hours(h);
        driver
            .save("u1", &payload(json!({"n": 1})), &user("1").with_captured_at(at(3)))
            .unwrap();
        driver
            .save(
                "u2",
                &payload(json!({"n": 2})),
                &user("2").with_event(EventType::Updated).with_captured_at(at(2)),
            )
            .unwrap();
        driver
            .save(
                "o1",
                &payload(json!({"n": 3})),
                &CaptureMeta::new("app::Order", "9").with_captured_at(at(1)),
            )
            .unwrap();

        let all = driver.list(&SnapshotFilter::new()).unwrap();
        let labels: Vec<_> = all.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["o1", "u2", "u1"]);

        let users = driver.list(&SnapshotFilter::new().subject_type("app::User")).unwrap();
        assert_eq!(users.len(), 2);

        let updated = driver
            .list(&SnapshotFilter::new().event_type(EventType::Updated))
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].subject_id, "2");

        let lineage = driver.list(&SnapshotFilter::for_subject("app::User", "1")).unwrap();
        assert_eq!(lineage.len(), 1);

        let old = driver.list(&SnapshotFilter::new().created_before(at(2))).unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].label, "u1");

        let recent = driver
            .list(&SnapshotFilter::new().created_after(at(2)).limit(1))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].label, "o1");
    }

    pub fn delete_reports_existence<D: StorageDriver>(driver: &D) {
        let saved = driver.save("gone", &payload(json!({"n": 1})), &user("1")).unwrap();
        assert!(driver.delete(&saved.id.to_string()).unwrap());
        assert!(!driver.delete(&saved.id.to_string()).unwrap());
        assert!(driver.load("gone").unwrap().is_none());
    }

    pub fn clear_scoped_to_type<D: StorageDriver>(driver: &D) {
        for i in 0..3 {
            driver
                .save(&format!("u{i}"), &payload(json!({"n": i})), &user("42"))
                .unwrap();
        }
        for i in 0..2 {
            driver
                .save(
                    &format!("o{i}"),
                    &payload(json!({"n": i})),
                    &CaptureMeta::new("Order", i.to_string()),
                )
                .unwrap();
        }

        assert_eq!(driver.clear(Some("app::User")).unwrap(), 3);
        let remaining = driver.list(&SnapshotFilter::new()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.subject_type == "Order"));

        assert_eq!(driver.clear(None).unwrap(), 2);
        assert!(driver.list(&SnapshotFilter::new()).unwrap().is_empty());
    }

    pub fn subject_scoped_lookup<D: StorageDriver>(driver: &D) {
        let mine = driver.save("v1", &payload(json!({"n": 1})), &user("1")).unwrap();
        driver.save("v1", &payload(json!({"n": 2})), &user("2")).unwrap();

        let found = driver.load_for_subject("app::User", "1", "v1").unwrap().unwrap();
        assert_eq!(found.id, mine.id);

        let by_id = driver
            .load_for_subject("app::User", "1", &mine.id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, mine.id);

        assert!(driver.load_for_subject("app::User", "3", "v1").unwrap().is_none());
    }

    pub fn rejects_empty_label<D: StorageDriver>(driver: &D) {
        let err = driver.save("  ", &payload(json!({})), &user("1")).unwrap_err();
        assert!(matches!(err, ChronicleError::Validation(_)));
    }

    /// Run every contract check, each against a fresh driver from `make`.
    pub fn run_all<D: StorageDriver>(make: impl Fn() -> D) {
        save_load_roundtrip(&make());
        ids_increase(&make());
        label_resolves_to_newest(&make());
        list_filters_and_orders(&make());
        delete_reports_existence(&make());
        clear_scoped_to_type(&make());
        subject_scoped_lookup(&make());
        rejects_empty_label(&make());
    }
}
