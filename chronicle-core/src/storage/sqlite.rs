/*!
Relational storage driver backed by SQLite.
*/

use super::{capture_time, validate_save, StorageDriver};
use crate::payload::{Attributes, Payload};
use crate::record::{CaptureMeta, EventType, SnapshotFilter, SnapshotId, SnapshotRecord};
use crate::{ChronicleError, Result};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const COLUMNS: &str =
    "id, subject_type, subject_id, label, event_type, payload, metadata, content_hash, created_at";

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Round `at` up to the next whole microsecond.
///
/// Stored timestamps carry microseconds only, so comparing against the rounded
/// bound selects the same records as comparing against `at` itself.
fn ceil_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at.trunc_subsecs(6);
    if truncated < at {
        truncated + Duration::microseconds(1)
    } else {
        truncated
    }
}

/// Raw column values of one `snapshots` row.
struct SnapshotRow {
    id: i64,
    subject_type: String,
    subject_id: String,
    label: String,
    event_type: String,
    payload: String,
    metadata: Option<String>,
    content_hash: String,
    created_at: String,
}

impl SnapshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_type: row.get(1)?,
            subject_id: row.get(2)?,
            label: row.get(3)?,
            event_type: row.get(4)?,
            payload: row.get(5)?,
            metadata: row.get(6)?,
            content_hash: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SnapshotRecord> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            ChronicleError::invalid_snapshot(format!("Snapshot {} has invalid {what}: {e}", self.id))
        };

        let payload: Payload =
            serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", &e))?;
        let metadata = match &self.metadata {
            Some(json) => Some(
                serde_json::from_str::<Attributes>(json).map_err(|e| corrupt("metadata", &e))?,
            ),
            None => None,
        };
        let event_type = self
            .event_type
            .parse::<EventType>()
            .map_err(|e| corrupt("event type", &e))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt("created_at", &e))?
            .with_timezone(&Utc);

        let record = SnapshotRecord {
            id: self.id as SnapshotId,
            subject_type: self.subject_type,
            subject_id: self.subject_id,
            label: self.label,
            event_type,
            payload,
            metadata,
            content_hash: self.content_hash,
            created_at,
        };
        record.verify_integrity()?;
        Ok(record)
    }
}

/// SQLite-backed snapshot store
///
/// Persists records in a `snapshots` table whose columns mirror
/// [`SnapshotRecord`], with secondary indexes on `(subject_type, subject_id)`
/// and on `label`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a database at the given path and run migrations
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=FULL;")?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_type TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                label TEXT NOT NULL,
                event_type TEXT NOT NULL DEFAULT 'manual',
                payload TEXT NOT NULL,
                metadata TEXT,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_subject
                ON snapshots(subject_type, subject_id);
            CREATE INDEX IF NOT EXISTS idx_snapshots_label ON snapshots(label);
            CREATE INDEX IF NOT EXISTS idx_snapshots_created_at ON snapshots(created_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ChronicleError::storage(format!("Connection lock poisoned: {e}")))
    }

    /// Run a query and convert every row into a record
    fn query_records(
        conn: &Connection,
        sql: &str,
        values: &[String],
    ) -> Result<Vec<SnapshotRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), SnapshotRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Most recent record of a lineage, by its secondary index
    pub fn latest_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM snapshots WHERE subject_type = ?1 AND subject_id = ?2
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let mut records = Self::query_records(
            &conn,
            &sql,
            &[subject_type.to_string(), subject_id.to_string()],
        )?;
        Ok(records.pop())
    }

    /// All records carrying a label, newest first
    pub fn find_by_label(&self, label: &str) -> Result<Vec<SnapshotRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM snapshots WHERE label = ?1 ORDER BY created_at DESC, id DESC"
        );
        Self::query_records(&conn, &sql, &[label.to_string()])
    }

    /// Count stored records
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl StorageDriver for SqliteStorage {
    fn save(&self, label: &str, payload: &Payload, meta: &CaptureMeta) -> Result<SnapshotRecord> {
        validate_save(label, meta)?;
        let conn = self.conn()?;

        let newest: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM snapshots WHERE subject_type = ?1 AND subject_id = ?2",
            params![meta.subject_type, meta.subject_id],
            |row| row.get(0),
        )?;
        let newest = newest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|at| at.with_timezone(&Utc));
        let created_at = capture_time(meta, newest);

        let metadata = meta.metadata.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO snapshots
                (subject_type, subject_id, label, event_type, payload, metadata, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                meta.subject_type,
                meta.subject_id,
                label,
                meta.event_type.as_str(),
                payload.canonical_json()?,
                metadata,
                payload.content_hash()?,
                format_time(&created_at),
            ],
        )?;

        let id = conn.last_insert_rowid() as SnapshotId;
        debug!(id, "snapshot row inserted");
        SnapshotRecord::assemble(id, label, payload, meta, created_at)
    }

    fn load(&self, id_or_label: &str) -> Result<Option<SnapshotRecord>> {
        let conn = self.conn()?;

        if let Ok(id) = id_or_label.parse::<i64>() {
            let by_id = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM snapshots WHERE id = ?1"),
                    params![id],
                    SnapshotRow::from_row,
                )
                .optional()?;
            if let Some(row) = by_id {
                return row.into_record().map(Some);
            }
        }

        let sql = format!(
            "SELECT {COLUMNS} FROM snapshots WHERE label = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let mut records = Self::query_records(&conn, &sql, &[id_or_label.to_string()])?;
        Ok(records.pop())
    }

    fn list(&self, filter: &SnapshotFilter) -> Result<Vec<SnapshotRecord>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        let mut push = |clause: &str, value: String| {
            values.push(value);
            clauses.push(format!("{clause} ?{}", values.len()));
        };
        if let Some(subject_type) = &filter.subject_type {
            push("subject_type =", subject_type.clone());
        }
        if let Some(subject_id) = &filter.subject_id {
            push("subject_id =", subject_id.clone());
        }
        if let Some(event_type) = filter.event_type {
            push("event_type =", event_type.as_str().to_string());
        }
        if let Some(label) = &filter.label {
            push("label =", label.clone());
        }
        if let Some(after) = &filter.created_after {
            push("created_at >=", format_time(&ceil_micros(*after)));
        }
        if let Some(before) = &filter.created_before {
            push("created_at <", format_time(&ceil_micros(*before)));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM snapshots");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn()?;
        Self::query_records(&conn, &sql, &values)
    }

    fn delete(&self, id_or_label: &str) -> Result<bool> {
        let Some(record) = self.load(id_or_label)? else {
            return Ok(false);
        };
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM snapshots WHERE id = ?1",
            params![record.id as i64],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self, subject_type: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = match subject_type {
            Some(subject_type) => conn.execute(
                "DELETE FROM snapshots WHERE subject_type = ?1",
                params![subject_type],
            )?,
            None => conn.execute("DELETE FROM snapshots", [])?,
        };
        Ok(removed)
    }

    fn load_for_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        id_or_label: &str,
    ) -> Result<Option<SnapshotRecord>> {
        let conn = self.conn()?;
        let id = id_or_label.parse::<i64>().unwrap_or(-1);
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM snapshots
                     WHERE subject_type = ?1 AND subject_id = ?2 AND (id = ?3 OR label = ?4)
                     ORDER BY (id = ?3) DESC, created_at DESC, id DESC LIMIT 1"
                ),
                params![subject_type, subject_id, id, id_or_label],
                SnapshotRow::from_row,
            )
            .optional()?;
        row.map(SnapshotRow::into_record).transpose()
    }

    fn driver_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_storage_contract() {
        contract::run_all(|| SqliteStorage::in_memory().unwrap());
    }

    #[test]
    fn test_time_bounds_round_up_to_microseconds() {
        let at = Utc::now().trunc_subsecs(6);
        assert_eq!(ceil_micros(at), at);
        assert_eq!(
            ceil_micros(at + Duration::nanoseconds(500)),
            at + Duration::microseconds(1)
        );

        let storage = SqliteStorage::in_memory().unwrap();
        let meta = contract::user("1").with_captured_at(at);
        storage
            .save("edge", &contract::payload(json!({"n": 1})), &meta)
            .unwrap();
        let just_after = at + Duration::nanoseconds(500);
        let filter = SnapshotFilter::new().created_before(just_after);
        assert_eq!(storage.list(&filter).unwrap().len(), 1);
        let filter = SnapshotFilter::new().created_after(just_after);
        assert!(storage.list(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshots.db");

        let saved = {
            let storage = SqliteStorage::open(&path).unwrap();
            storage
                .save(
                    "v1",
                    &contract::payload(json!({"name": "Alice"})),
                    &contract::user("42").with_metadata(
                        json!({"reason": "audit"}).as_object().cloned().unwrap(),
                    ),
                )
                .unwrap()
        };

        let storage = SqliteStorage::open(&path).unwrap();
        let loaded = storage.load("v1").unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn test_secondary_lookups() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .save("v1", &contract::payload(json!({"n": 1})), &contract::user("42"))
            .unwrap();
        let latest = storage
            .save("v2", &contract::payload(json!({"n": 2})), &contract::user("42"))
            .unwrap();
        storage
            .save("v1", &contract::payload(json!({"n": 3})), &contract::user("7"))
            .unwrap();

        let found = storage.latest_for_subject("app::User", "42").unwrap().unwrap();
        assert_eq!(found.id, latest.id);
        assert_eq!(storage.find_by_label("v1").unwrap().len(), 2);
        assert!(storage.latest_for_subject("app::User", "0").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_row_is_invalid_snapshot() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO snapshots
                    (subject_type, subject_id, label, payload, content_hash, created_at)
                 VALUES ('User', '1', 'broken', '{\"timestamps\": {}}', 'x', '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();

        let err = storage.load("broken").unwrap_err();
        assert!(matches!(err, ChronicleError::InvalidSnapshot(_)));
    }
}
