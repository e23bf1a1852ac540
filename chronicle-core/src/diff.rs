/*!
Attribute-level comparison of two payloads.

Only the top-level `attributes` of each payload take part; relationship
sub-payloads are ignored. Every group is keyed lexicographically, so the
same two payloads always produce the same result.
*/

use crate::payload::Payload;
use crate::record::SnapshotRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A field whose value differs between the two sides
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Change {
    pub from: Value,
    pub to: Value,
}

/// Outcome of [`diff`]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    /// Present in B, absent in A
    pub added: BTreeMap<String, Value>,
    /// Present in both with unequal values
    pub modified: BTreeMap<String, Change>,
    /// Present in A, absent in B
    pub removed: BTreeMap<String, Value>,
}

/// Counts per group
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.added + self.modified + self.removed
    }
}

impl DiffResult {
    /// No differences in any group
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// The same comparison seen from the other side, i.e. `diff(b, a)`.
    pub fn invert(self) -> Self {
        Self {
            added: self.removed,
            modified: self
                .modified
                .into_iter()
                .map(|(key, change)| {
                    (
                        key,
                        Change {
                            from: change.to,
                            to: change.from,
                        },
                    )
                })
                .collect(),
            removed: self.added,
        }
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            modified: self.modified.len(),
            removed: self.removed.len(),
        }
    }
}

/// Compare the attributes of `a` (before) with those of `b` (after).
///
/// Values are compared structurally, so nested arrays and objects are equal
/// whenever their contents are.
///
/// # Example
/// ```rust
/// use chronicle_core::{diff, Payload};
/// use serde_json::json;
///
/// let v1 = Payload::from_attributes(json!({"name": "Alice", "age": 30}).as_object().cloned().unwrap());
/// let v2 = Payload::from_attributes(json!({"name": "Alice", "age": 31}).as_object().cloned().unwrap());
///
/// let result = diff(&v1, &v2);
/// assert!(result.added.is_empty() && result.removed.is_empty());
/// assert_eq!(result.modified["age"].from, json!(30));
/// assert_eq!(result.modified["age"].to, json!(31));
/// ```
pub fn diff(a: &Payload, b: &Payload) -> DiffResult {
    let mut result = DiffResult::default();

    for (key, before) in &a.attributes {
        match b.attributes.get(key) {
            Some(after) if after != before => {
                result.modified.insert(
                    key.clone(),
                    Change {
                        from: before.clone(),
                        to: after.clone(),
                    },
                );
            }
            Some(_) => {}
            None => {
                result.removed.insert(key.clone(), before.clone());
            }
        }
    }

    for (key, after) in &b.attributes {
        if !a.attributes.contains_key(key) {
            result.added.insert(key.clone(), after.clone());
        }
    }

    result
}

/// Compare the payloads of two stored records
pub fn diff_records(a: &SnapshotRecord, b: &SnapshotRecord) -> DiffResult {
    diff(&a.payload, &b.payload)
}
