/*!
Time-based retention on top of the generic storage contract.
*/

use crate::record::SnapshotFilter;
use crate::storage::StorageDriver;
use crate::Result;
use chrono::{DateTime, Utc};
use tracing::info;

/// Delete every record created strictly before `older_than`, optionally only
/// for one subject type. Returns how many records were removed.
///
/// Labels and event types play no part in the decision. Running it again with
/// the same cutoff removes nothing.
pub fn purge<D>(driver: &D, older_than: DateTime<Utc>, subject_type: Option<&str>) -> Result<usize>
where
    D: StorageDriver + ?Sized,
{
    let mut filter = SnapshotFilter::new().created_before(older_than);
    if let Some(subject_type) = subject_type {
        filter = filter.subject_type(subject_type);
    }

    let expired = driver.list(&filter)?;
    let mut removed = 0;
    for record in &expired {
        if driver.delete(&record.id.to_string())? {
            removed += 1;
        }
    }

    info!(
        driver = driver.driver_name(),
        cutoff = %older_than,
        subject_type = subject_type.unwrap_or("*"),
        removed,
        "retention purge complete"
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CaptureMeta;
    use crate::storage::{contract, FileStorage, MemoryStorage};
    use chrono::{Duration, SubsecRound};
    use serde_json::json;
    use tempfile::TempDir;

    fn seed<D: StorageDriver>(driver: &D, now: DateTime<Utc>) {
        let ages = [("app::User", 40), ("app::User", 10), ("app::Order", 45), ("app::Order", 1)];
        for (n, (subject_type, days)) in ages.iter().enumerate() {
            let meta = CaptureMeta::new(*subject_type, n.to_string())
                .with_captured_at(now - Duration::days(*days));
            driver
                .save(&format!("s{n}"), &contract::payload(json!({"n": n})), &meta)
                .unwrap();
        }
    }

    fn check_purge<D: StorageDriver>(driver: &D) {
        let now = Utc::now();
        seed(driver, now);
        let cutoff = now - Duration::days(30);

        assert_eq!(purge(driver, cutoff, None).unwrap(), 2);
        let remaining = driver.list(&SnapshotFilter::new()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.created_at >= cutoff));

        assert_eq!(purge(driver, cutoff, None).unwrap(), 0);
    }

    #[test]
    fn test_purge_memory() {
        check_purge(&MemoryStorage::new());
    }

    #[test]
    fn test_purge_file() {
        let temp_dir = TempDir::new().unwrap();
        check_purge(&FileStorage::new(temp_dir.path()));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_purge_sqlite() {
        check_purge(&crate::storage::SqliteStorage::in_memory().unwrap());
    }

    #[test]
    fn test_purge_scoped_to_subject_type() {
        let driver = MemoryStorage::new();
        let now = Utc::now();
        seed(&driver, now);

        let removed = purge(&driver, now - Duration::days(30), Some("app::Order")).unwrap();
        assert_eq!(removed, 1);

        let users = driver
            .list(&SnapshotFilter::new().subject_type("app::User"))
            .unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn test_records_at_cutoff_survive() {
        let driver = MemoryStorage::new();
        let cutoff = (Utc::now() - Duration::days(3)).trunc_subsecs(6);
        let meta = CaptureMeta::new("app::User", "1").with_captured_at(cutoff);
        driver
            .save("edge", &contract::payload(json!({"n": 1})), &meta)
            .unwrap();

        assert_eq!(purge(&driver, cutoff, None).unwrap(), 0);
        assert_eq!(driver.len(), 1);
    }

    fn purge_sub_microsecond_cutoff<D: StorageDriver>(driver: &D) {
        let at = (Utc::now() - Duration::days(3)).trunc_subsecs(6);
        let meta = CaptureMeta::new("app::User", "1").with_captured_at(at);
        driver
            .save("edge", &contract::payload(json!({"n": 1})), &meta)
            .unwrap();

        assert_eq!(purge(driver, at + Duration::nanoseconds(500), None).unwrap(), 1);
        assert!(driver.list(&SnapshotFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_cutoff_between_microseconds_removes_older_record() {
        purge_sub_microsecond_cutoff(&MemoryStorage::new());

        let temp_dir = TempDir::new().unwrap();
        purge_sub_microsecond_cutoff(&FileStorage::new(temp_dir.path()));

        #[cfg(feature = "sqlite")]
        purge_sub_microsecond_cutoff(&crate::storage::SqliteStorage::in_memory().unwrap());
    }
}
