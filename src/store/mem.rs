//! In-Memory Table Store
//!
//! Hash-of-btrees store backing a replica's tables. Suitable for
//! embedding and tests; the `Store` trait is the seam for real engines.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{TableOp, TableSpec};

use super::{ApplyMode, Store};

type Table = BTreeMap<String, Vec<u8>>;

/// In-memory table store
pub struct MemStore {
    tables: RwLock<HashMap<String, Table>>,
    fail_next: AtomicBool,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Read a single record
    pub async fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        self.tables
            .read()
            .await
            .get(table)
            .and_then(|t| t.get(key).cloned())
    }

    /// Number of records in a table (0 if missing)
    pub async fn table_len(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Names of all existing tables
    pub async fn tables(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    /// Full contents of a table in key order
    pub async fn dump(&self, table: &str) -> Vec<(String, Vec<u8>)> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Make the next `apply_batch` call fail (failure-path tests)
    #[cfg(test)]
    pub(crate) fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn apply_one(tables: &mut HashMap<String, Table>, op: &TableOp) {
        match op {
            TableOp::Write { table, key, value } => {
                tables
                    .entry(table.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
            TableOp::Delete { table, key } => {
                if let Some(t) = tables.get_mut(table) {
                    t.remove(key);
                }
            }
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn ensure_table(&self, spec: &TableSpec) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.entry(spec.name.clone()).or_default();
        Ok(())
    }

    async fn clear_table(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get_mut(table) {
            t.clear();
        }
        Ok(())
    }

    async fn apply_batch(&self, mode: ApplyMode, ops: &[TableOp]) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Store("injected apply failure".into()));
        }

        let mut tables = self.tables.write().await;

        if mode == ApplyMode::Transactional {
            // Validate before touching anything; the whole batch commits
            // under one lock, or none of it does.
            for op in ops {
                if !tables.contains_key(op.table()) {
                    return Err(Error::Store(format!(
                        "transactional apply against missing table '{}'",
                        op.table()
                    )));
                }
            }
        }

        for op in ops {
            Self::apply_one(&mut tables, op);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(table: &str, key: &str, value: &[u8]) -> TableOp {
        TableOp::Write {
            table: table.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_apply_and_read() {
        let store = MemStore::new();
        store
            .apply_batch(
                ApplyMode::Dirty,
                &[write("t1", "a", b"1"), write("t1", "b", b"2")],
            )
            .await
            .unwrap();

        assert_eq!(store.get("t1", "a").await, Some(b"1".to_vec()));
        assert_eq!(store.table_len("t1").await, 2);

        store
            .apply_batch(
                ApplyMode::Dirty,
                &[TableOp::Delete {
                    table: "t1".to_string(),
                    key: "a".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(store.get("t1", "a").await, None);
    }

    #[tokio::test]
    async fn test_clear_table_idempotent() {
        let store = MemStore::new();
        store.clear_table("missing").await.unwrap();

        store
            .apply_batch(ApplyMode::Dirty, &[write("t1", "a", b"1")])
            .await
            .unwrap();
        store.clear_table("t1").await.unwrap();
        assert_eq!(store.table_len("t1").await, 0);
        store.clear_table("t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_transactional_requires_table() {
        let store = MemStore::new();
        let err = store
            .apply_batch(ApplyMode::Transactional, &[write("nope", "a", b"1")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        // Nothing was applied
        assert!(store.tables().await.is_empty());

        store.ensure_table(&TableSpec::new("nope")).await.unwrap();
        store
            .apply_batch(ApplyMode::Transactional, &[write("nope", "a", b"1")])
            .await
            .unwrap();
        assert_eq!(store.get("nope", "a").await, Some(b"1".to_vec()));
    }
}
