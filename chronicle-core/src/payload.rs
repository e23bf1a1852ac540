/*!
Snapshot payload: the storage-agnostic representation of a subject's state.
*/

use crate::{ChronicleError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Field name to value mapping used for attributes and timestamps.
pub type Attributes = serde_json::Map<String, Value>;

/// Serialized state of one subject at one point in time.
///
/// `attributes` is always present. A stored document without it is a
/// corrupt record and fails to deserialize.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Attributes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<BTreeMap<String, RelatedPayload>>,
}

/// Nested payload(s) for one declared relationship.
///
/// `Many` must stay ahead of `One`: the derived `Payload` deserializer also
/// accepts sequences, so a short array would otherwise decode as `One`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RelatedPayload {
    Many(Vec<Payload>),
    One(Box<Payload>),
    /// A to-one relationship with nothing on the other end.
    Missing,
}

impl Payload {
    /// Create a payload holding only attributes
    pub fn from_attributes(attributes: Attributes) -> Self {
        Self {
            attributes,
            timestamps: None,
            relationships: None,
        }
    }

    /// Look up a single attribute value
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Canonical JSON encoding. Keys are emitted in lexicographic order so the
    /// same state always produces the same bytes.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ChronicleError::serialization(format!("Failed to encode payload: {e}")))
    }

    /// SHA-256 of the canonical JSON encoding
    pub fn content_hash(&self) -> Result<String> {
        Ok(compute_hash(self.canonical_json()?.as_bytes()))
    }

    /// Verify this payload against a previously recorded hash
    pub fn verify_integrity(&self, expected: &str) -> Result<()> {
        let actual = self.content_hash()?;
        if actual == expected {
            Ok(())
        } else {
            Err(ChronicleError::IntegrityCheckFailed {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    /// Size of the canonical encoding in bytes
    pub fn size_bytes(&self) -> usize {
        self.canonical_json().map(|json| json.len()).unwrap_or(0)
    }

    /// How many levels of relationships are nested below this payload.
    pub fn relationship_depth(&self) -> usize {
        let Some(relationships) = &self.relationships else {
            return 0;
        };
        relationships
            .values()
            .map(|related| match related {
                RelatedPayload::One(payload) => 1 + payload.relationship_depth(),
                RelatedPayload::Many(payloads) => {
                    1 + payloads
                        .iter()
                        .map(Payload::relationship_depth)
                        .max()
                        .unwrap_or(0)
                }
                RelatedPayload::Missing => 1,
            })
            .max()
            .unwrap_or(0)
    }
}

/// Compute SHA-256 hash of the provided data as lowercase hex
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
