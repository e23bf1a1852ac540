/*!
Serialization engine: converts a live subject into a canonical [`Payload`].
*/

use crate::payload::{Attributes, Payload, RelatedPayload};
use crate::subject::{Related, Snapshotable};
use crate::{ChronicleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options recognized by [`serialize`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SerializeOptions {
    /// Keep fields the subject declares hidden
    pub include_hidden: bool,
    /// Emit the `timestamps` section
    pub include_timestamps: bool,
    /// Recurse into declared relationships
    pub include_relationships: bool,
    /// Hard cutoff for relationship recursion. 0 means no relationships.
    pub max_relationship_depth: usize,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            include_hidden: false,
            include_timestamps: true,
            include_relationships: true,
            max_relationship_depth: 3,
        }
    }
}

impl SerializeOptions {
    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    pub fn with_timestamps(mut self, include_timestamps: bool) -> Self {
        self.include_timestamps = include_timestamps;
        self
    }

    pub fn with_relationships(mut self, include_relationships: bool) -> Self {
        self.include_relationships = include_relationships;
        self
    }

    pub fn with_max_depth(mut self, max_relationship_depth: usize) -> Self {
        self.max_relationship_depth = max_relationship_depth;
        self
    }
}

/// Serialize a subject's current state.
///
/// Pure function of the subject state and the options. Relationships are
/// followed while the current depth is below `max_relationship_depth`; at the
/// cutoff the `relationships` section is omitted entirely, which also bounds
/// recursion over cyclic graphs.
///
/// # Errors
/// * `ChronicleError::Serialization` - a field or relationship could not be
///   represented structurally
pub fn serialize(subject: &dyn Snapshotable, options: &SerializeOptions) -> Result<Payload> {
    serialize_at(subject, options, 0)
}

fn serialize_at(
    subject: &dyn Snapshotable,
    options: &SerializeOptions,
    depth: usize,
) -> Result<Payload> {
    let mut attributes = subject.attributes()?;
    let hidden = if options.include_hidden {
        Vec::new()
    } else {
        subject.hidden_fields()
    };

    for field in &hidden {
        attributes.remove(field);
    }

    let mut timestamps = Attributes::new();
    for field in subject.timestamp_fields() {
        if let Some(value) = attributes.remove(&field) {
            timestamps.insert(field, value);
        }
    }

    let relationships = if options.include_relationships && depth < options.max_relationship_depth
    {
        serialize_relationships(subject, options, depth, &hidden)?
    } else {
        None
    };

    Ok(Payload {
        attributes,
        timestamps: options.include_timestamps.then_some(timestamps),
        relationships,
    })
}

fn serialize_relationships(
    subject: &dyn Snapshotable,
    options: &SerializeOptions,
    depth: usize,
    hidden: &[String],
) -> Result<Option<BTreeMap<String, RelatedPayload>>> {
    let mut relationships = BTreeMap::new();

    for (name, related) in subject.relationships() {
        if hidden.contains(&name) {
            continue;
        }
        let nested = match related {
            Related::One(Some(child)) => {
                RelatedPayload::One(Box::new(serialize_at(child.as_ref(), options, depth + 1)?))
            }
            Related::One(None) => RelatedPayload::Missing,
            Related::Many(children) => RelatedPayload::Many(
                children
                    .iter()
                    .map(|child| serialize_at(child.as_ref(), options, depth + 1))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        if relationships.insert(name.clone(), nested).is_some() {
            return Err(ChronicleError::serialization(format!(
                "Relationship '{name}' declared twice on {}",
                subject.subject_type()
            )));
        }
    }

    if relationships.is_empty() {
        Ok(None)
    } else {
        Ok(Some(relationships))
    }
}
