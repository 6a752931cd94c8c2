//! The item collaborator: a record owning image fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::FieldValue;

/// Read/write access to the field values of one record.
///
/// Both operations are treated as atomic: a field is read or replaced as a
/// whole sequence, never partially.
pub trait Item {
    /// Current value of the field at `path` (empty when unset).
    fn get(&self, path: &str) -> FieldValue;

    /// Replace the field at `path`.
    fn set(&mut self, path: &str, value: FieldValue);
}

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for item identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Generate a new time-sortable item identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ItemRecord
// ---------------------------------------------------------------------------

/// A schemaless record: named fields holding JSON values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    /// Owning list (collection) key, e.g. `Post`.
    pub list: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRecord {
    /// A fresh, empty record in `list`.
    pub fn new(list: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            list: list.into(),
            fields: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Item for ItemRecord {
    fn get(&self, path: &str) -> FieldValue {
        self.fields
            .get(path)
            .map(FieldValue::from_json)
            .unwrap_or_default()
    }

    fn set(&mut self, path: &str, value: FieldValue) {
        self.fields.insert(path.to_string(), value.to_json());
        self.updated_at = Utc::now();
    }
}
