/*!
Restore engine: write a stored snapshot's attributes back onto a live subject.
*/

use crate::record::SnapshotRecord;
use crate::subject::Restorable;
use crate::{ChronicleError, Result};
use tracing::{debug, warn};

/// Result of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// What the subject's own persistence step reported
    pub persisted: bool,
    /// Attribute names that were assigned, in key order
    pub applied: Vec<String>,
}

/// Apply `record`'s attributes onto `live` and persist it.
///
/// Relationship sub-payloads are ignored. No snapshot is taken afterwards;
/// callers that want an audit trail capture one themselves.
///
/// # Errors
/// * `ChronicleError::InvalidSnapshot` - If the record holds no attributes or
///   was captured from a different subject type
/// * Whatever the subject's `apply_attributes` or `persist` report
pub fn restore(live: &mut dyn Restorable, record: &SnapshotRecord) -> Result<RestoreOutcome> {
    let attributes = &record.payload.attributes;
    if attributes.is_empty() {
        return Err(ChronicleError::invalid_snapshot(format!(
            "Snapshot {} has no attributes to restore",
            record.id
        )));
    }

    let live_type = live.subject_type();
    if live_type != record.subject_type {
        return Err(ChronicleError::invalid_snapshot(format!(
            "Snapshot {} belongs to {}, cannot restore onto {live_type}",
            record.id, record.subject_type
        )));
    }

    live.apply_attributes(attributes)?;
    let persisted = live.persist()?;
    if persisted {
        debug!(snapshot_id = record.id, subject_type = %live_type, "snapshot restored");
    } else {
        warn!(snapshot_id = record.id, subject_type = %live_type, "restored state was not persisted");
    }

    Ok(RestoreOutcome {
        persisted,
        applied: attributes.keys().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::payload::{Attributes, Payload};
    use crate::record::CaptureMeta;
    use crate::serialize::{serialize, SerializeOptions};
    use crate::subject::Snapshotable;
    use chrono::Utc;
    use serde_json::json;

    struct Account {
        fields: Attributes,
        saves: usize,
        accept_saves: bool,
    }

    impl Snapshotable for Account {
        fn subject_type(&self) -> String {
            "bank::Account".to_string()
        }

        fn subject_id(&self) -> String {
            "7".to_string()
        }

        fn attributes(&self) -> Result<Attributes> {
            Ok(self.fields.clone())
        }
    }

    impl Restorable for Account {
        fn apply_attributes(&mut self, attributes: &Attributes) -> Result<()> {
            for (key, value) in attributes {
                self.fields.insert(key.clone(), value.clone());
            }
            Ok(())
        }

        fn persist(&mut self) -> Result<bool> {
            self.saves += 1;
            Ok(self.accept_saves)
        }
    }

    fn account(balance: i64) -> Account {
        Account {
            fields: json!({"id": 7, "balance": balance}).as_object().cloned().unwrap(),
            saves: 0,
            accept_saves: true,
        }
    }

    fn record_of(subject_type: &str, attributes: serde_json::Value) -> SnapshotRecord {
        let payload = Payload::from_attributes(attributes.as_object().cloned().unwrap());
        let meta = CaptureMeta::new(subject_type, "7");
        SnapshotRecord::assemble(1, "v1", &payload, &meta, Utc::now()).unwrap()
    }

    #[test]
    fn test_restore_applies_attributes_and_persists() {
        let mut live = account(500);
        let record = record_of("bank::Account", json!({"id": 7, "balance": 100}));

        let outcome = restore(&mut live, &record).unwrap();
        assert!(outcome.persisted);
        assert_eq!(outcome.applied, vec!["balance", "id"]);
        assert_eq!(live.fields["balance"], json!(100));
        assert_eq!(live.saves, 1);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut live = account(500);
        let record = record_of("bank::Account", json!({"id": 7, "balance": 100}));
        let options = SerializeOptions::default();

        restore(&mut live, &record).unwrap();
        let first = serialize(&live, &options).unwrap();
        restore(&mut live, &record).unwrap();
        let second = serialize(&live, &options).unwrap();

        assert!(diff(&first, &second).is_empty());
    }

    #[test]
    fn test_persistence_failure_is_reported() {
        let mut live = Account {
            accept_saves: false,
            ..account(500)
        };
        let record = record_of("bank::Account", json!({"balance": 100}));

        let outcome = restore(&mut live, &record).unwrap();
        assert!(!outcome.persisted);
        assert_eq!(live.fields["balance"], json!(100));
    }

    #[test]
    fn test_empty_attributes_are_rejected() {
        let mut live = account(500);
        let record = record_of("bank::Account", json!({}));

        let err = restore(&mut live, &record).unwrap_err();
        assert!(matches!(err, ChronicleError::InvalidSnapshot(_)));
        assert_eq!(live.saves, 0);
    }

    #[test]
    fn test_foreign_subject_type_is_rejected() {
        let mut live = account(500);
        let record = record_of("app::User", json!({"balance": 0}));

        let err = restore(&mut live, &record).unwrap_err();
        assert!(matches!(err, ChronicleError::InvalidSnapshot(_)));
        assert_eq!(live.fields["balance"], json!(500));
    }
}
