//! In-memory key-value store mirrored to disk.
//!
//! [`Store`] is a plain JSON object tree. Its operations never touch the
//! disk: the HTTP handlers decide when to call [`StorageBackend::save`] so a
//! batch of changes can be persisted once. A handler takes a checkpoint
//! (`store.clone()`) before mutating and restores it if the save fails.

mod backend;

pub use backend::{load_or_initialize, JsonFileBackend, StorageBackend};

use crate::error::StoreError;
use crate::utils::iso_timestamp;
use serde_json::{Map, Value};

/// Reserved top-level key holding the schema version.
pub const VERSION_KEY: &str = "version";
/// Reserved top-level key re-stamped on every save.
pub const LAST_UPDATE_KEY: &str = "lastUpdate";
/// Schema version written into a freshly initialised store.
pub const STORE_VERSION: &str = "1.0.0";

/// How a `PUT` was applied to the existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Object value shallow-merged with the body
    Merged,
    /// Array item with a matching `id` merged with the body
    ItemMerged,
    /// No array item matched the body's `id`; the body was appended
    Upserted,
    /// Body without `id` appended to the array
    Appended,
    /// Scalar value replaced by the body
    Replaced,
}

/// What a `DELETE` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deleted {
    Field(String),
    Items(usize),
    Key,
}

/// The server's single mutable document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    data: Map<String, Value>,
}

impl Store {
    /// Empty store with no keys at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// The structure written out when no data file exists yet.
    pub fn with_defaults() -> Self {
        let mut data = Map::new();
        data.insert("users".to_string(), Value::Array(Vec::new()));
        data.insert("content".to_string(), Value::Object(Map::new()));
        data.insert("config".to_string(), Value::Object(Map::new()));
        data.insert("cache".to_string(), Value::Object(Map::new()));
        data.insert(VERSION_KEY.to_string(), Value::String(STORE_VERSION.to_string()));
        data.insert(LAST_UPDATE_KEY.to_string(), Value::String(iso_timestamp()));
        Self { data }
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Whole store as a JSON value, for snapshots and serialization.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn version(&self) -> Option<&str> {
        self.data.get(VERSION_KEY).and_then(Value::as_str)
    }

    pub fn last_update(&self) -> Option<&str> {
        self.data.get(LAST_UPDATE_KEY).and_then(Value::as_str)
    }

    /// Stamps `lastUpdate` with the current time. Called right before a save.
    pub fn touch(&mut self) {
        self.data
            .insert(LAST_UPDATE_KEY.to_string(), Value::String(iso_timestamp()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Nested lookup: an object field, or an array element when `field` is a
    /// numeric index.
    pub fn get_field(&self, key: &str, field: &str) -> Option<&Value> {
        match self.data.get(key)? {
            Value::Object(map) => map.get(field),
            Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Replaces the value at `key`, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Applies a `PUT` body to an existing key.
    ///
    /// * object: shallow merge; the body must itself be an object
    /// * array: with a non-null `id` in the body, merge into the item with
    ///   that id, or append the body when none matches (upsert by id);
    ///   without `id`, append the body
    /// * anything else: replaced by the body
    pub fn merge(&mut self, key: &str, updates: Value) -> Result<UpdateOutcome, StoreError> {
        let current = self
            .data
            .get_mut(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;

        match current {
            Value::Object(existing) => {
                let Value::Object(fields) = updates else {
                    return Err(StoreError::NotAnObject(key.to_string()));
                };
                for (field, value) in fields {
                    existing.insert(field, value);
                }
                Ok(UpdateOutcome::Merged)
            }
            Value::Array(items) => {
                let id = updates.get("id").filter(|id| !id.is_null()).cloned();
                let Some(id) = id else {
                    items.push(updates);
                    return Ok(UpdateOutcome::Appended);
                };

                let position = items
                    .iter()
                    .position(|item| item.get("id").is_some_and(|item_id| ids_match(item_id, &id)));

                match (position, updates) {
                    (Some(index), Value::Object(mut fields)) => {
                        fields.remove("id");
                        if let Value::Object(item) = &mut items[index] {
                            for (field, value) in fields {
                                item.insert(field, value);
                            }
                        }
                        Ok(UpdateOutcome::ItemMerged)
                    }
                    (_, updates) => {
                        items.push(updates);
                        Ok(UpdateOutcome::Upserted)
                    }
                }
            }
            scalar => {
                *scalar = updates;
                Ok(UpdateOutcome::Replaced)
            }
        }
    }

    /// Removes a nested field, the array items with a given id, or the whole
    /// key when neither `field` nor `id` is given.
    pub fn delete(
        &mut self,
        key: &str,
        field: Option<&str>,
        id: Option<&str>,
    ) -> Result<Deleted, StoreError> {
        let current = self
            .data
            .get_mut(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;

        if let Some(field) = field {
            let removed = match current {
                Value::Object(map) => map.remove(field).is_some(),
                _ => false,
            };
            if !removed {
                return Err(StoreError::FieldNotFound {
                    key: key.to_string(),
                    field: field.to_string(),
                });
            }
            return Ok(Deleted::Field(field.to_string()));
        }

        if let Some(id) = id {
            let Value::Array(items) = current else {
                return Err(StoreError::NotAnArray(key.to_string()));
            };
            let wanted = Value::String(id.to_string());
            let before = items.len();
            items.retain(|item| !item.get("id").is_some_and(|item_id| ids_match(item_id, &wanted)));
            let removed = before - items.len();
            if removed == 0 {
                return Err(StoreError::ItemNotFound {
                    key: key.to_string(),
                    id: id.to_string(),
                });
            }
            return Ok(Deleted::Items(removed));
        }

        self.data.remove(key);
        Ok(Deleted::Key)
    }
}

/// Ids compare equal as JSON, or by their string form so that a query
/// string `?id=7` finds an item stored with `"id": 7`.
fn ids_match(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (id_string(a), id_string(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
