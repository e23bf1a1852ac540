/*!
Snapshot records, capture metadata and listing filters.
*/

use crate::payload::{Attributes, Payload};
use crate::{ChronicleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Backend-assigned snapshot identifier. Increases with insertion order.
pub type SnapshotId = u64;

/// Why a snapshot was taken
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Manual,
    Created,
    Updated,
    Deleted,
    Scheduled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Manual => "manual",
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
            EventType::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(EventType::Manual),
            "created" => Ok(EventType::Created),
            "updated" => Ok(EventType::Updated),
            "deleted" => Ok(EventType::Deleted),
            "scheduled" => Ok(EventType::Scheduled),
            other => Err(ChronicleError::validation(format!(
                "Unknown event type: {other}"
            ))),
        }
    }
}

/// Host lifecycle events that may trigger automatic capture
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Created,
    Updated,
    Deleted,
}

impl From<LifecycleEvent> for EventType {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Created => EventType::Created,
            LifecycleEvent::Updated => EventType::Updated,
            LifecycleEvent::Deleted => EventType::Deleted,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EventType::from(*self).fmt(f)
    }
}

/// Identity and event information handed to a storage driver alongside a payload
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMeta {
    pub subject_type: String,
    pub subject_id: String,
    pub event_type: EventType,
    pub metadata: Option<Attributes>,
    /// Explicit capture time. When unset the driver stamps the record itself.
    pub captured_at: Option<DateTime<Utc>>,
}

impl CaptureMeta {
    pub fn new<S1, S2>(subject_type: S1, subject_id: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            event_type: EventType::Manual,
            metadata: None,
            captured_at: None,
        }
    }

    pub fn with_event(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    /// Validate that all required fields are properly set
    pub fn validate(&self) -> Result<()> {
        if self.subject_type.is_empty() {
            return Err(ChronicleError::validation("subject_type cannot be empty"));
        }
        if self.subject_id.is_empty() {
            return Err(ChronicleError::validation("subject_id cannot be empty"));
        }
        Ok(())
    }
}

/// A persisted snapshot. Never mutated after the driver returns it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    pub subject_type: String,
    pub subject_id: String,
    pub label: String,
    #[serde(default)]
    pub event_type: EventType,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Attributes>,
    /// SHA-256 of the payload's canonical JSON
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl SnapshotRecord {
    /// Assemble a record from driver-assigned identity and capture metadata
    pub fn assemble(
        id: SnapshotId,
        label: &str,
        payload: &Payload,
        meta: &CaptureMeta,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            subject_type: meta.subject_type.clone(),
            subject_id: meta.subject_id.clone(),
            label: label.to_string(),
            event_type: meta.event_type,
            payload: payload.clone(),
            metadata: meta.metadata.clone(),
            content_hash: payload.content_hash()?,
            created_at,
        })
    }

    /// True if this record is part of the lineage of `(subject_type, subject_id)`
    pub fn belongs_to(&self, subject_type: &str, subject_id: &str) -> bool {
        self.subject_type == subject_type && self.subject_id == subject_id
    }

    /// True if `id_or_label` addresses this record by either coordinate
    pub fn is_addressed_by(&self, id_or_label: &str) -> bool {
        self.id.to_string() == id_or_label || self.label == id_or_label
    }

    /// Check the payload against the hash recorded at capture time
    pub fn verify_integrity(&self) -> Result<()> {
        self.payload.verify_integrity(&self.content_hash)
    }

    /// Lineage order: `created_at`, ties broken by ascending id.
    pub fn lineage_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.id.cmp(&other.id))
    }
}

/// Sort records newest first (reverse lineage order)
pub fn sort_newest_first(records: &mut [SnapshotRecord]) {
    records.sort_by(|a, b| b.lineage_cmp(a));
}

/// Predicates for `StorageDriver::list`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotFilter {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub event_type: Option<EventType>,
    pub label: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SnapshotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on one subject's lineage
    pub fn for_subject<S1, S2>(subject_type: S1, subject_id: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            subject_type: Some(subject_type.into()),
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    pub fn subject_type<S: Into<String>>(mut self, subject_type: S) -> Self {
        self.subject_type = Some(subject_type.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate every predicate except `limit`.
    pub fn matches(&self, record: &SnapshotRecord) -> bool {
        if let Some(subject_type) = &self.subject_type {
            if &record.subject_type != subject_type {
                return false;
            }
        }
        if let Some(subject_id) = &self.subject_id {
            if &record.subject_id != subject_id {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if record.event_type != event_type {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if &record.label != label {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if record.created_at >= before {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first and truncate an unordered set of records
    pub fn apply(&self, records: impl IntoIterator<Item = SnapshotRecord>) -> Vec<SnapshotRecord> {
        let mut selected: Vec<SnapshotRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        sort_newest_first(&mut selected);
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use serde_json::json;

    fn record(id: SnapshotId, subject_type: &str, label: &str, at: DateTime<Utc>) -> SnapshotRecord {
        let payload = Payload::from_attributes(json!({"n": id}).as_object().cloned().unwrap());
        let meta = CaptureMeta::new(subject_type, "1");
        SnapshotRecord::assemble(id, label, &payload, &meta, at).unwrap()
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("Updated".parse::<EventType>().unwrap(), EventType::Updated);
        assert_eq!(" scheduled ".parse::<EventType>().unwrap(), EventType::Scheduled);
        assert!("archived".parse::<EventType>().is_err());
        assert_eq!(EventType::default(), EventType::Manual);
        assert_eq!(EventType::from(LifecycleEvent::Deleted), EventType::Deleted);
    }

    #[test]
    fn test_capture_meta_validation() {
        assert!(CaptureMeta::new("User", "42").validate().is_ok());
        assert!(CaptureMeta::new("", "42").validate().is_err());
        assert!(CaptureMeta::new("User", "").validate().is_err());
    }

    #[test]
    fn test_newest_first_breaks_ties_by_id() {
        let now = Utc::now();
        let mut records = vec![
            record(1, "User", "a", now),
            record(3, "User", "c", now - Duration::seconds(5)),
            record(2, "User", "b", now),
        ];
        sort_newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_filter_time_bounds() {
        let now = Utc::now();
        let records = vec![
            record(1, "User", "old", now - Duration::days(10)),
            record(2, "User", "edge", now - Duration::days(5)),
            record(3, "Order", "new", now),
        ];

        let before = SnapshotFilter::new().created_before(now - Duration::days(5));
        let ids: Vec<_> = before.apply(records.clone()).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);

        let after = SnapshotFilter::new().created_after(now - Duration::days(5));
        let ids: Vec<_> = after.apply(records.clone()).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let typed = SnapshotFilter::new().subject_type("User").limit(1);
        let ids: Vec<_> = typed.apply(records).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_sub_microsecond_bounds_are_exact() {
        let at = Utc::now().trunc_subsecs(6);
        let stored = vec![record(1, "User", "edge", at)];
        let just_after = at + Duration::nanoseconds(500);

        let before = SnapshotFilter::new().created_before(just_after);
        assert_eq!(before.apply(stored.clone()).len(), 1);

        let after = SnapshotFilter::new().created_after(just_after);
        assert!(after.apply(stored).is_empty());
    }

    #[test]
    fn test_record_addressing() {
        let r = record(17, "User", "v1", Utc::now());
        assert!(r.is_addressed_by("17"));
        assert!(r.is_addressed_by("v1"));
        assert!(!r.is_addressed_by("v2"));
        assert!(r.belongs_to("User", "1"));
        assert!(r.verify_integrity().is_ok());
    }
}
