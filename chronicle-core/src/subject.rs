/*!
Host object contract.

The engine never reaches into a host object model. Instead the host implements
[`Snapshotable`] to expose its state for capture and [`Restorable`] to accept
state back during restore.
*/

use crate::payload::Attributes;
use crate::{ChronicleError, Result};
use serde::Serialize;
use serde_json::Value;

/// A declared relationship of a subject.
///
/// Related subjects are handed out as trait objects that may borrow from the
/// owner, so cyclic object graphs can be described without reference counting.
pub enum Related<'a> {
    /// To-one relationship, `None` if nothing is attached
    One(Option<Box<dyn Snapshotable + 'a>>),
    /// To-many relationship
    Many(Vec<Box<dyn Snapshotable + 'a>>),
}

/// Read side of the host object contract
pub trait Snapshotable {
    /// Fully-qualified name of the subject's type
    fn subject_type(&self) -> String;

    /// Primary identity value, rendered as a string
    fn subject_id(&self) -> String;

    /// Every field of the subject, hidden and timestamp fields included.
    ///
    /// Return [`ChronicleError::Serialization`] for values that have no
    /// structural representation.
    fn attributes(&self) -> Result<Attributes>;

    /// Fields excluded from payloads unless `include_hidden` is set
    fn hidden_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fields that are split out into the payload's `timestamps` section
    fn timestamp_fields(&self) -> Vec<String> {
        vec!["created_at".to_string(), "updated_at".to_string()]
    }

    /// Declared relationships, by name
    fn relationships(&self) -> Vec<(String, Related<'_>)> {
        Vec::new()
    }
}

impl<T: Snapshotable + ?Sized> Snapshotable for &T {
    fn subject_type(&self) -> String {
        (**self).subject_type()
    }

    fn subject_id(&self) -> String {
        (**self).subject_id()
    }

    fn attributes(&self) -> Result<Attributes> {
        (**self).attributes()
    }

    fn hidden_fields(&self) -> Vec<String> {
        (**self).hidden_fields()
    }

    fn timestamp_fields(&self) -> Vec<String> {
        (**self).timestamp_fields()
    }

    fn relationships(&self) -> Vec<(String, Related<'_>)> {
        (**self).relationships()
    }
}

/// Write side of the host object contract, used by restore
pub trait Restorable: Snapshotable {
    /// Assign the given field values onto the live object
    fn apply_attributes(&mut self, attributes: &Attributes) -> Result<()>;

    /// Persist the current state through the host's own mechanism.
    /// Returns whether the host reported success.
    fn persist(&mut self) -> Result<bool>;
}

/// Convert any serializable value into a payload value
pub fn to_value<T: Serialize + ?Sized>(field: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        ChronicleError::serialization(format!("Field '{field}' is not serializable: {e}"))
    })
}

/// Convert a serializable struct into an attribute map
pub fn to_attributes<T: Serialize + ?Sized>(value: &T) -> Result<Attributes> {
    match to_value("<root>", value)? {
        Value::Object(map) => Ok(map),
        other => Err(ChronicleError::serialization(format!(
            "Expected an object of fields, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Account {
        id: u32,
        email: String,
    }

    #[test]
    fn test_to_attributes_from_struct() {
        let attrs = to_attributes(&Account {
            id: 3,
            email: "a@example.com".to_string(),
        })
        .unwrap();
        assert_eq!(attrs.get("id"), Some(&json!(3)));
        assert_eq!(attrs.get("email"), Some(&json!("a@example.com")));
    }

    #[test]
    fn test_to_attributes_rejects_scalars() {
        let err = to_attributes(&5).unwrap_err();
        assert!(matches!(err, ChronicleError::Serialization(_)));
    }

    #[test]
    fn test_to_value_rejects_non_string_keys() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], "x");
        let err = to_value("lookup", &map).unwrap_err();
        assert!(err.to_string().contains("lookup"));
    }
}
