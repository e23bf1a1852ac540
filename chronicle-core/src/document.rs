/*!
A subject backed by a JSON document, optionally stored in a file.
*/

use crate::payload::Attributes;
use crate::subject::{Restorable, Snapshotable};
use crate::{ChronicleError, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generic subject over a flat JSON object.
///
/// Useful for tooling that works on exported records rather than on a live
/// object model: the CLI captures from and restores into such documents.
///
/// # Example
/// ```rust
/// use chronicle_core::DocumentSubject;
/// use chronicle_core::subject::Snapshotable;
///
/// let fields = serde_json::json!({"id": 42, "name": "Alice"});
/// let user = DocumentSubject::new("app::User", fields.as_object().cloned().unwrap());
/// assert_eq!(user.subject_id(), "42");
/// ```
#[derive(Debug, Clone)]
pub struct DocumentSubject {
    subject_type: String,
    id_field: String,
    fields: Attributes,
    hidden: Vec<String>,
    timestamps: Vec<String>,
    path: Option<PathBuf>,
}

impl DocumentSubject {
    /// Create an in-memory document subject identified by its `id` field
    pub fn new<S: Into<String>>(subject_type: S, fields: Attributes) -> Self {
        Self {
            subject_type: subject_type.into(),
            id_field: "id".to_string(),
            fields,
            hidden: Vec::new(),
            timestamps: vec!["created_at".to_string(), "updated_at".to_string()],
            path: None,
        }
    }

    /// Load a document subject from a JSON file. `persist` writes back to it.
    pub fn open<S: Into<String>, P: AsRef<Path>>(subject_type: S, path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ChronicleError::storage(format!("Failed to read document {}: {e}", path.display()))
        })?;
        let fields = match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => map,
            _ => {
                return Err(ChronicleError::validation(format!(
                    "Document {} is not a JSON object",
                    path.display()
                )))
            }
        };
        let mut subject = Self::new(subject_type, fields);
        subject.path = Some(path.to_path_buf());
        Ok(subject)
    }

    pub fn with_id_field<S: Into<String>>(mut self, id_field: S) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_hidden_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamp_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.timestamps = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn fields(&self) -> &Attributes {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field on the live document (not persisted until `persist`)
    pub fn set<S: Into<String>>(&mut self, field: S, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Snapshotable for DocumentSubject {
    fn subject_type(&self) -> String {
        self.subject_type.clone()
    }

    fn subject_id(&self) -> String {
        match self.fields.get(&self.id_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn attributes(&self) -> Result<Attributes> {
        Ok(self.fields.clone())
    }

    fn hidden_fields(&self) -> Vec<String> {
        self.hidden.clone()
    }

    fn timestamp_fields(&self) -> Vec<String> {
        self.timestamps.clone()
    }
}

impl Restorable for DocumentSubject {
    fn apply_attributes(&mut self, attributes: &Attributes) -> Result<()> {
        for (field, value) in attributes {
            self.fields.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(true);
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut file = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        serde_json::to_writer_pretty(&mut file, &self.fields)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| {
            ChronicleError::storage(format!("Failed to write document {}: {e}", path.display()))
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_subject_id_rendering() {
        let numeric = DocumentSubject::new("User", json!({"id": 42}).as_object().cloned().unwrap());
        assert_eq!(numeric.subject_id(), "42");

        let keyed = DocumentSubject::new(
            "Order",
            json!({"sku": "A-1"}).as_object().cloned().unwrap(),
        )
        .with_id_field("sku");
        assert_eq!(keyed.subject_id(), "A-1");
    }

    #[test]
    fn test_open_apply_and_persist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("user.json");
        fs::write(&path, r#"{"id": 1, "name": "Alice"}"#).unwrap();

        let mut subject = DocumentSubject::open("User", &path).unwrap();
        let update = json!({"name": "Alicia"}).as_object().cloned().unwrap();
        subject.apply_attributes(&update).unwrap();
        assert!(subject.persist().unwrap());

        let reopened = DocumentSubject::open("User", &path).unwrap();
        assert_eq!(reopened.get("name"), Some(&json!("Alicia")));
    }

    #[test]
    fn test_open_rejects_non_objects() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("list.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let err = DocumentSubject::open("User", &path).unwrap_err();
        assert!(matches!(err, ChronicleError::Validation(_)));
    }
}
