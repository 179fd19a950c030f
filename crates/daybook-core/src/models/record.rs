//! Dynamic record model
//!
//! A record is one row of a domain table, carried as a JSON object so the
//! generic table manager and merge engine can handle every table through the
//! same code path. Field names follow the table descriptor exactly; the
//! device-local `id` column never crosses a device boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::schema::{COL_CREATED_AT, COL_LOCAL_ID, COL_SYNCED, COL_UPDATED_AT, COL_UUID};

/// One row of a domain table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Builder-style field assignment for tests and capture paths
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// The record's globally unique identity, if present and well-formed
    pub fn uuid(&self) -> Option<Uuid> {
        self.fields
            .get(COL_UUID)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.set(COL_UUID, Value::String(uuid.to_string()));
    }

    pub fn created_at(&self) -> Option<i64> {
        self.fields.get(COL_CREATED_AT).and_then(Value::as_i64)
    }

    pub fn set_created_at(&mut self, at_ms: i64) {
        self.set(COL_CREATED_AT, Value::from(at_ms));
    }

    /// Logical clock used by last-write-wins comparison
    pub fn updated_at(&self) -> Option<i64> {
        self.fields.get(COL_UPDATED_AT).and_then(Value::as_i64)
    }

    pub fn set_updated_at(&mut self, at_ms: i64) {
        self.set(COL_UPDATED_AT, Value::from(at_ms));
    }

    pub fn local_id(&self) -> Option<i64> {
        self.fields.get(COL_LOCAL_ID).and_then(Value::as_i64)
    }

    /// Copy of this record without device-local columns (`id`, `synced`)
    #[must_use]
    pub fn portable(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() != COL_LOCAL_ID && name.as_str() != COL_SYNCED)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self { fields }
    }

    /// Field equality ignoring device-local columns
    pub fn content_eq(&self, other: &Self) -> bool {
        self.portable() == other.portable()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Current unix-millisecond instant, the timestamp convention for all records
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
