//! Record database abstraction for testability.
//!
//! A database holds named record containers. Each container maps a string
//! key (the record's `id` field) to a JSON object and keeps an auto-increment
//! counter for records written without an `id`. Writes are grouped into
//! transactions that either apply in full or not at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Field every record is keyed by.
pub const KEY_FIELD: &str = "id";

/// A single write step inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Removes every record from the container.
    Clear,
    /// Inserts or replaces a record, keyed by its `id` field.
    Put(Value),
}

/// Contents of one record container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Next value handed out to a record written without an `id`.
    pub next_id: u64,
    /// Records by key.
    pub records: BTreeMap<String, Value>,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }
}

impl Container {
    /// Applies a whole transaction to a copy of this container.
    ///
    /// Returns the new contents, or the first error. `self` is never touched,
    /// so callers commit by swapping in the returned value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if any step is invalid.
    pub fn staged(&self, ops: Vec<WriteOp>) -> Result<Self> {
        let mut next = self.clone();
        for op in ops {
            next.apply(op)?;
        }
        Ok(next)
    }

    fn apply(&mut self, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::Clear => self.records.clear(),
            WriteOp::Put(mut record) => {
                let Some(fields) = record.as_object_mut() else {
                    return Err(Error::Transaction(
                        "record must be a JSON object".to_string(),
                    ));
                };
                let key = match fields.get(KEY_FIELD) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    None | Some(Value::Null) => {
                        let id = self.next_id;
                        self.next_id += 1;
                        fields.insert(KEY_FIELD.to_string(), Value::from(id));
                        id.to_string()
                    }
                    Some(other) => {
                        return Err(Error::Transaction(format!(
                            "unsupported key type for `{KEY_FIELD}`: {other}"
                        )));
                    }
                };
                self.records.insert(key, record);
            }
        }
        Ok(())
    }
}

/// Abstraction over a durable, asynchronous key-value database.
#[async_trait]
pub trait RecordDatabase: Send + Sync {
    /// Opens the database, making sure the named container can be used.
    ///
    /// Fails with [`Error::StorageUnavailable`] if storage cannot be reached.
    async fn open(&self, container: &str) -> Result<()>;

    /// Reads one record by key.
    async fn get(&self, container: &str, key: &str) -> Result<Option<Value>>;

    /// Applies every op as one atomic transaction.
    async fn commit(&self, container: &str, ops: Vec<WriteOp>) -> Result<()>;
}

/// Ephemeral database kept in process memory.
///
/// Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    containers: Arc<Mutex<HashMap<String, Container>>>,
}

impl MemoryDatabase {
    /// Creates an empty in-memory database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in a container (0 if it does not exist).
    #[must_use]
    pub fn len(&self, container: &str) -> usize {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(container)
            .map_or(0, |c| c.records.len())
    }

    /// Returns true if the container holds no records.
    #[must_use]
    pub fn is_empty(&self, container: &str) -> bool {
        self.len(container) == 0
    }
}

#[async_trait]
impl RecordDatabase for MemoryDatabase {
    async fn open(&self, container: &str) -> Result<()> {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(container)
            .and_then(|c| c.records.get(key).cloned()))
    }

    async fn commit(&self, container: &str, ops: Vec<WriteOp>) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current = containers.entry(container.to_string()).or_default();
        let next = current.staged(ops)?;
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_keys_by_string_id() {
        let next = Container::default()
            .staged(vec![WriteOp::Put(json!({"id": "a", "v": 1}))])
            .unwrap();
        assert_eq!(next.records.len(), 1);
        assert_eq!(next.records["a"]["v"], 1);
        assert_eq!(next.next_id, 1);
    }

    #[test]
    fn put_without_id_uses_auto_increment() {
        let next = Container::default()
            .staged(vec![
                WriteOp::Put(json!({"v": "first"})),
                WriteOp::Put(json!({"v": "second"})),
            ])
            .unwrap();
        assert_eq!(next.records["1"]["id"], 1);
        assert_eq!(next.records["2"]["v"], "second");
        assert_eq!(next.next_id, 3);
    }

    #[test]
    fn clear_then_put_leaves_single_record() {
        let base = Container::default()
            .staged(vec![
                WriteOp::Put(json!({"id": "a"})),
                WriteOp::Put(json!({"id": "b"})),
            ])
            .unwrap();
        let next = base
            .staged(vec![WriteOp::Clear, WriteOp::Put(json!({"id": "c"}))])
            .unwrap();
        assert_eq!(next.records.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn invalid_step_rejects_whole_transaction() {
        let base = Container::default()
            .staged(vec![WriteOp::Put(json!({"id": "keep"}))])
            .unwrap();
        let result = base.staged(vec![WriteOp::Clear, WriteOp::Put(json!("not an object"))]);
        assert!(matches!(result, Err(Error::Transaction(_))));
        assert!(base.records.contains_key("keep"));
    }

    #[test]
    fn unsupported_key_type_is_rejected() {
        let result = Container::default().staged(vec![WriteOp::Put(json!({"id": [1, 2]}))]);
        assert!(matches!(result, Err(Error::Transaction(_))));
    }

    #[tokio::test]
    async fn memory_commit_is_atomic() {
        let db = MemoryDatabase::new();
        db.commit("history", vec![WriteOp::Put(json!({"id": "keep"}))])
            .await
            .unwrap();

        let result = db
            .commit("history", vec![WriteOp::Clear, WriteOp::Put(json!(42))])
            .await;

        assert!(result.is_err());
        assert!(db.get("history", "keep").await.unwrap().is_some());
        assert_eq!(db.len("history"), 1);
    }

    #[tokio::test]
    async fn memory_clones_share_contents() {
        let db = MemoryDatabase::new();
        let other = db.clone();
        db.commit("c", vec![WriteOp::Put(json!({"id": "x"}))])
            .await
            .unwrap();
        assert!(other.get("c", "x").await.unwrap().is_some());
        assert!(other.is_empty("missing"));
    }
}
