//! # Save Context
//!
//! One [`SaveContext`] per operation: it borrows the storage collaborator and
//! owns the operation's single transaction. The context is passed by
//! reference through every recursive step of the save tree and never outlives
//! the operation - the transaction is the only shared resource, and it is
//! propagated, never re-created, through nested steps.
//!
//! ## Lock Caching
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Two items in one payload referencing the same product:                 │
//! │                                                                         │
//! │  item 1 → ctx.lock("product", p1)  → acquires the row lock             │
//! │  item 2 → ctx.lock("product", p1)  → already held: re-READS inside     │
//! │                                      the transaction instead            │
//! │                                                                         │
//! │  The lock is acquired once per unique referenced id per transaction.   │
//! │  Re-acquiring would deadlock against ourselves; re-reading sees the    │
//! │  first item's in-transaction write, so the stock math stays correct.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use arbor_core::{EngineError, EngineResult, FieldMap, Row};

use crate::storage::Storage;

/// Carries the active transaction and the storage collaborator through one
/// save or delete operation.
pub struct SaveContext<'a, S: Storage> {
    storage: &'a S,
    tx: S::Tx,
    locked: HashSet<(String, String)>,
}

impl<'a, S: Storage> SaveContext<'a, S> {
    /// Opens the operation's transaction.
    pub async fn begin(storage: &'a S) -> EngineResult<Self> {
        Ok(SaveContext {
            storage,
            tx: storage.begin().await?,
            locked: HashSet::new(),
        })
    }

    /// Commits the transaction, releasing every held row lock.
    pub async fn commit(self) -> EngineResult<()> {
        self.storage.commit(self.tx).await
    }

    /// Rolls the transaction back, discarding all writes.
    pub async fn rollback(self) -> EngineResult<()> {
        self.storage.rollback(self.tx).await
    }

    /// Reads one row inside the transaction.
    pub async fn get(&mut self, entity: &str, id: &str) -> EngineResult<Option<Row>> {
        self.storage.get(&mut self.tx, entity, id).await
    }

    /// Reads one row, failing with NotFound when absent.
    pub async fn fetch(&mut self, entity: &str, id: &str) -> EngineResult<Row> {
        self.get(entity, id)
            .await?
            .ok_or_else(|| EngineError::not_found(entity, id))
    }

    /// Reads one row under a pessimistic lock, failing with NotFound when
    /// absent.
    ///
    /// The lock is acquired once per unique (entity, id) per transaction;
    /// later calls for the same row re-read inside the transaction instead of
    /// re-acquiring.
    pub async fn lock(&mut self, entity: &str, id: &str) -> EngineResult<Row> {
        let key = (entity.to_string(), id.to_string());
        if self.locked.contains(&key) {
            return self.fetch(entity, id).await;
        }

        match self.storage.lock_for_update(&mut self.tx, entity, id).await? {
            Some(row) => {
                self.locked.insert(key);
                Ok(row)
            }
            None => Err(EngineError::not_found(entity, id)),
        }
    }

    /// Inserts a row.
    pub async fn insert(&mut self, entity: &str, row: Row) -> EngineResult<Row> {
        self.storage.insert(&mut self.tx, entity, row).await
    }

    /// Merges fields into an existing row.
    pub async fn update(&mut self, entity: &str, id: &str, fields: &FieldMap) -> EngineResult<Row> {
        self.storage.update(&mut self.tx, entity, id, fields).await
    }

    /// Deletes one row by id.
    pub async fn delete(&mut self, entity: &str, id: &str) -> EngineResult<u64> {
        self.storage.delete(&mut self.tx, entity, id).await
    }

    /// Returns the persisted children of a parent row, in persisted order.
    pub async fn find_children(
        &mut self,
        entity: &str,
        foreign_key: &str,
        parent_id: &str,
    ) -> EngineResult<Vec<Row>> {
        self.storage
            .find_children(&mut self.tx, entity, foreign_key, parent_id)
            .await
    }
}
