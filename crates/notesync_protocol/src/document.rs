//! The note document.

use crate::error::{ProtocolError, ProtocolResult};
use crate::time::{now, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A note document.
///
/// Identity is `id`. `updated_at` is the only ordering signal used for
/// conflict detection; every other field is payload.
///
/// The JSON form uses camelCase field names (`updatedAt`, `pendingSync`,
/// `userId`) to match the REST contract. Tags and collaborators are ordered
/// sets so that two equal documents always serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identifier.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// Tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Collaborator identifiers.
    #[serde(default)]
    pub collaborators: BTreeSet<String>,
    /// Last modification instant.
    pub updated_at: Timestamp,
    /// Whether a local edit has not yet been confirmed by the server.
    #[serde(default)]
    pub pending_sync: bool,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Owning user, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Server-assigned version, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Document {
    /// Creates a document stamped with the current time.
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            collaborators: BTreeSet::new(),
            updated_at: now(),
            pending_sync: false,
            metadata: Map::new(),
            user_id: None,
            version: None,
        }
    }

    /// Sets the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the collaborators.
    pub fn with_collaborators<I, S>(mut self, collaborators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaborators = collaborators.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the modification instant.
    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Sets the owning user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns true if the metadata marks this document as a merge result.
    pub fn has_conflicts(&self) -> bool {
        self.metadata
            .get("hasConflicts")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Checks the invariants a document must satisfy before it is stored.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.id.trim().is_empty() {
            return Err(ProtocolError::InvalidDocument("empty id".into()));
        }
        Ok(())
    }

    /// Encodes to JSON bytes.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        let doc: Self = serde_json::from_slice(bytes)?;
        doc.validate()?;
        Ok(doc)
    }

    fn to_value_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Returns the fields of `to` whose serialized value differs from `from`.
///
/// Keys are compared by their JSON value, so two timestamps that render the
/// same instant compare equal. The result maps each changed key to its value
/// in `to`.
pub fn changed_fields(from: &Document, to: &Document) -> Map<String, Value> {
    let before = from.to_value_map();
    to.to_value_map()
        .into_iter()
        .filter(|(key, value)| before.get(key) != Some(value))
        .collect()
}
