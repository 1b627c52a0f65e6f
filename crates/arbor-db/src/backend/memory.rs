//! # In-Memory Backend
//!
//! Reference implementation of the storage contract. Committed rows live in
//! tables behind a mutex; a transaction buffers its writes in an overlay that
//! is applied atomically at commit (or dropped at rollback), so uncommitted
//! writes are never visible to other operations.
//!
//! ## Transaction Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Memory Transaction Model                               │
//! │                                                                         │
//! │  committed tables              transaction overlay                      │
//! │  ┌──────────────────┐          ┌──────────────────────┐                │
//! │  │ product          │          │ (product, p1) → row' │  writes        │
//! │  │   p1 → row       │   read   │ (item, i1)   → row  │  buffered      │
//! │  │ sale_order       │ ◄────────│ (item, i2)   → None │  (None=delete) │
//! │  │   ...            │  merge   └──────────────────────┘                │
//! │  └──────────────────┘                     │                             │
//! │            ▲                              │ commit: apply atomically    │
//! │            └──────────────────────────────┘ rollback: drop              │
//! │                                                                         │
//! │  Row locks: one tokio::sync::Mutex per (entity, id); the guard is      │
//! │  held inside the transaction and released when the transaction          │
//! │  commits or rolls back, not before.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock Caveat
//! The per-row mutex is not re-entrant: a transaction that locks the same
//! row twice deadlocks against itself. `SaveContext::lock` tracks held locks
//! and re-reads instead of re-acquiring, which is why the engine acquires a
//! lock once per unique referenced id per transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::debug;

use arbor_core::{EngineError, EngineResult, FieldMap, Row};

use crate::storage::{ListQuery, Storage};

type Tables = HashMap<String, BTreeMap<String, FieldMap>>;
type RowLocks = HashMap<(String, String), Arc<TokioMutex<()>>>;

/// In-memory storage backend.
///
/// Cloning is cheap and shares the underlying tables, so one instance can be
/// handed to concurrently running operations.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<StdMutex<Tables>>,
    row_locks: Arc<StdMutex<RowLocks>>,
}

/// A buffered in-memory transaction.
pub struct MemoryTx {
    /// (entity, id) → latest in-transaction row state; None marks a delete.
    overlay: HashMap<(String, String), Option<FieldMap>>,

    /// Row locks held by this transaction, released on drop.
    guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    fn committed(&self, entity: &str, id: &str) -> Option<FieldMap> {
        self.tables
            .lock()
            .expect("memory tables poisoned")
            .get(entity)
            .and_then(|table| table.get(id))
            .cloned()
    }

    fn read_in_tx(&self, tx: &MemoryTx, entity: &str, id: &str) -> Option<FieldMap> {
        if let Some(entry) = tx.overlay.get(&(entity.to_string(), id.to_string())) {
            return entry.clone();
        }
        self.committed(entity, id)
    }

    fn row_lock(&self, entity: &str, id: &str) -> Arc<TokioMutex<()>> {
        self.row_locks
            .lock()
            .expect("memory row locks poisoned")
            .entry((entity.to_string(), id.to_string()))
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn sort_key(id: &str, fields: &FieldMap) -> (String, String) {
    let created = fields
        .get("created_at")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (created, id.to_string())
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> EngineResult<Self::Tx> {
        Ok(MemoryTx {
            overlay: HashMap::new(),
            guards: Vec::new(),
        })
    }

    async fn commit(&self, tx: Self::Tx) -> EngineResult<()> {
        let mut tables = self.tables.lock().expect("memory tables poisoned");
        for ((entity, id), state) in &tx.overlay {
            let table = tables.entry(entity.clone()).or_default();
            match state {
                Some(fields) => {
                    table.insert(id.clone(), fields.clone());
                }
                None => {
                    table.remove(id);
                }
            }
        }
        drop(tables);
        // Dropping the transaction releases its row locks
        drop(tx);
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> EngineResult<()> {
        debug!(writes = tx.overlay.len(), "discarding transaction overlay");
        drop(tx);
        Ok(())
    }

    async fn get(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<Option<Row>> {
        Ok(self
            .read_in_tx(tx, entity, id)
            .map(|fields| Row::new(id, fields)))
    }

    async fn lock_for_update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
    ) -> EngineResult<Option<Row>> {
        let lock = self.row_lock(entity, id);
        debug!(entity = %entity, id = %id, "acquiring row lock");
        let guard = lock.lock_owned().await;

        // Read after acquiring the lock so a waiter observes the previous
        // holder's committed write
        match self.read_in_tx(tx, entity, id) {
            Some(fields) => {
                tx.guards.push(guard);
                Ok(Some(Row::new(id, fields)))
            }
            None => {
                drop(guard);
                Ok(None)
            }
        }
    }

    async fn insert(&self, tx: &mut Self::Tx, entity: &str, row: Row) -> EngineResult<Row> {
        if self.read_in_tx(tx, entity, &row.id).is_some() {
            return Err(EngineError::Constraint(format!(
                "duplicate id {} for {entity}",
                row.id
            )));
        }

        let mut fields = row.fields;
        fields.entry("created_at".to_string()).or_insert_with(now);
        fields.insert("updated_at".to_string(), now());

        debug!(entity = %entity, id = %row.id, "inserting row");
        tx.overlay
            .insert((entity.to_string(), row.id.clone()), Some(fields.clone()));
        Ok(Row::new(row.id, fields))
    }

    async fn update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
        fields: &FieldMap,
    ) -> EngineResult<Row> {
        let mut current = self
            .read_in_tx(tx, entity, id)
            .ok_or_else(|| EngineError::not_found(entity, id))?;

        for (name, value) in fields {
            current.insert(name.clone(), value.clone());
        }
        current.insert("updated_at".to_string(), now());

        debug!(entity = %entity, id = %id, "updating row");
        tx.overlay
            .insert((entity.to_string(), id.to_string()), Some(current.clone()));
        Ok(Row::new(id, current))
    }

    async fn delete(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<u64> {
        if self.read_in_tx(tx, entity, id).is_none() {
            return Ok(0);
        }
        debug!(entity = %entity, id = %id, "deleting row");
        tx.overlay.insert((entity.to_string(), id.to_string()), None);
        Ok(1)
    }

    async fn find_children(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        foreign_key: &str,
        parent_id: &str,
    ) -> EngineResult<Vec<Row>> {
        // Merge the committed table with this transaction's overlay
        let mut merged: BTreeMap<String, FieldMap> = self
            .tables
            .lock()
            .expect("memory tables poisoned")
            .get(entity)
            .cloned()
            .unwrap_or_default();

        for ((tx_entity, id), state) in &tx.overlay {
            if tx_entity != entity {
                continue;
            }
            match state {
                Some(fields) => {
                    merged.insert(id.clone(), fields.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }

        let mut rows: Vec<Row> = merged
            .into_iter()
            .filter(|(_, fields)| {
                fields.get(foreign_key).and_then(Value::as_str) == Some(parent_id)
            })
            .map(|(id, fields)| Row::new(id, fields))
            .collect();
        rows.sort_by_key(|row| sort_key(&row.id, &row.fields));
        Ok(rows)
    }

    async fn find(&self, entity: &str, id: &str) -> EngineResult<Option<Row>> {
        Ok(self.committed(entity, id).map(|fields| Row::new(id, fields)))
    }

    async fn find_and_count(
        &self,
        entity: &str,
        query: &ListQuery,
    ) -> EngineResult<(Vec<Row>, u64)> {
        let table = self
            .tables
            .lock()
            .expect("memory tables poisoned")
            .get(entity)
            .cloned()
            .unwrap_or_default();

        let mut rows: Vec<Row> = table
            .into_iter()
            .filter(|(_, fields)| {
                query
                    .filters
                    .iter()
                    .all(|(field, value)| fields.get(field) == Some(value))
            })
            .map(|(id, fields)| Row::new(id, fields))
            .collect();
        rows.sort_by_key(|row| sort_key(&row.id, &row.fields));

        let count = rows.len() as u64;
        let offset = query.offset.unwrap_or(0) as usize;
        let rows: Vec<Row> = match query.limit {
            Some(limit) => rows.into_iter().skip(offset).take(limit as usize).collect(),
            None => rows.into_iter().skip(offset).collect(),
        };

        Ok((rows, count))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::types::object;
    use serde_json::json;
    use std::time::Duration;

    async fn seed(storage: &MemoryStorage, entity: &str, id: &str, fields: serde_json::Value) {
        let mut tx = storage.begin().await.unwrap();
        storage
            .insert(&mut tx, entity, Row::new(id, object(fields)))
            .await
            .unwrap();
        storage.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let storage = MemoryStorage::new();

        let mut tx = storage.begin().await.unwrap();
        storage
            .insert(&mut tx, "product", Row::new("p-1", object(json!({ "stock": 5 }))))
            .await
            .unwrap();

        assert!(storage.find("product", "p-1").await.unwrap().is_none());

        storage.commit(tx).await.unwrap();
        let row = storage.find("product", "p-1").await.unwrap().unwrap();
        assert_eq!(row.int("stock"), Some(5));
        assert!(row.get("created_at").is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_all_writes() {
        let storage = MemoryStorage::new();
        seed(&storage, "product", "p-1", json!({ "stock": 5 })).await;

        let mut tx = storage.begin().await.unwrap();
        storage
            .update(&mut tx, "product", "p-1", &object(json!({ "stock": 1 })))
            .await
            .unwrap();
        storage
            .insert(&mut tx, "product", Row::new("p-2", object(json!({ "stock": 9 }))))
            .await
            .unwrap();
        storage.rollback(tx).await.unwrap();

        let row = storage.find("product", "p-1").await.unwrap().unwrap();
        assert_eq!(row.int("stock"), Some(5));
        assert!(storage.find("product", "p-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_and_reports_missing_rows() {
        let storage = MemoryStorage::new();
        seed(&storage, "product", "p-1", json!({ "stock": 5, "name": "Widget" })).await;

        let mut tx = storage.begin().await.unwrap();
        let row = storage
            .update(&mut tx, "product", "p-1", &object(json!({ "stock": 3 })))
            .await
            .unwrap();
        assert_eq!(row.int("stock"), Some(3));
        assert_eq!(row.text("name"), Some("Widget"));

        let err = storage
            .update(&mut tx, "product", "ghost", &object(json!({ "stock": 3 })))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_a_constraint_error() {
        let storage = MemoryStorage::new();
        seed(&storage, "product", "p-1", json!({})).await;

        let mut tx = storage.begin().await.unwrap();
        let err = storage
            .insert(&mut tx, "product", Row::new("p-1", FieldMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Constraint(_)));
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_children_sees_overlay_and_orders_by_created_at() {
        let storage = MemoryStorage::new();
        seed(
            &storage,
            "item",
            "i-2",
            json!({ "fk_order": "o-1", "created_at": "2026-01-02T00:00:00+00:00" }),
        )
        .await;
        seed(
            &storage,
            "item",
            "i-1",
            json!({ "fk_order": "o-1", "created_at": "2026-01-01T00:00:00+00:00" }),
        )
        .await;

        let mut tx = storage.begin().await.unwrap();
        storage.delete(&mut tx, "item", "i-2").await.unwrap();
        storage
            .insert(
                &mut tx,
                "item",
                Row::new(
                    "i-3",
                    object(json!({ "fk_order": "o-1", "created_at": "2026-01-03T00:00:00+00:00" })),
                ),
            )
            .await
            .unwrap();

        let children = storage
            .find_children(&mut tx, "item", "fk_order", "o-1")
            .await
            .unwrap();
        let ids: Vec<&str> = children.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", "i-3"]);
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_and_count_filters_and_paginates() {
        let storage = MemoryStorage::new();
        for i in 0..5 {
            seed(
                &storage,
                "product",
                &format!("p-{i}"),
                json!({ "unit": "kg", "created_at": format!("2026-01-0{}T00:00:00+00:00", i + 1) }),
            )
            .await;
        }
        seed(&storage, "product", "p-x", json!({ "unit": "box" })).await;

        let (rows, count) = storage
            .find_and_count(
                "product",
                &ListQuery::new().filter("unit", "kg").limit(2).offset(1),
            )
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "p-1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_row_lock_serializes_transactions() {
        let storage = MemoryStorage::new();
        seed(&storage, "product", "p-1", json!({ "stock": 5 })).await;

        let mut tx1 = storage.begin().await.unwrap();
        storage
            .lock_for_update(&mut tx1, "product", "p-1")
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut tx2 = storage.begin().await.unwrap();
                let row = storage
                    .lock_for_update(&mut tx2, "product", "p-1")
                    .await
                    .unwrap()
                    .unwrap();
                storage.commit(tx2).await.unwrap();
                row
            })
        };

        // The second transaction must block while tx1 holds the lock
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        storage
            .update(&mut tx1, "product", "p-1", &object(json!({ "stock": 3 })))
            .await
            .unwrap();
        storage.commit(tx1).await.unwrap();

        // Once tx1 commits, the waiter proceeds and observes the new stock
        let row = waiter.await.unwrap();
        assert_eq!(row.int("stock"), Some(3));
    }

    #[tokio::test]
    async fn test_lock_on_missing_row_does_not_hold_the_lock() {
        let storage = MemoryStorage::new();

        let mut tx1 = storage.begin().await.unwrap();
        assert!(storage
            .lock_for_update(&mut tx1, "product", "ghost")
            .await
            .unwrap()
            .is_none());

        // The failed acquisition must not leave the row locked
        let mut tx2 = storage.begin().await.unwrap();
        assert!(storage
            .lock_for_update(&mut tx2, "product", "ghost")
            .await
            .unwrap()
            .is_none());
        storage.rollback(tx2).await.unwrap();
        storage.rollback(tx1).await.unwrap();
    }
}
