//! # Storage Contract
//!
//! The save engine consumes storage through this trait: row-level CRUD plus
//! transaction primitives, nothing more. Backends decide how rows are kept;
//! the engine only relies on the contract below.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Storage Contract                                   │
//! │                                                                         │
//! │  begin / commit / rollback     - one transaction per operation         │
//! │                                                                         │
//! │  Inside a transaction:                                                  │
//! │  ├── get              - read one row (sees in-transaction writes)      │
//! │  ├── lock_for_update  - read one row under a pessimistic row lock;     │
//! │  │                      the lock is scoped to the transaction and       │
//! │  │                      released at commit/rollback, not before         │
//! │  ├── insert / update / delete                                           │
//! │  └── find_children    - rows whose foreign key equals a parent id,      │
//! │                         ordered by created_at then id                   │
//! │                                                                         │
//! │  Outside a transaction:                                                 │
//! │  ├── find             - read one committed row                          │
//! │  └── find_and_count   - filtered, paginated committed rows + total      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backends stamp `created_at` on insert and `updated_at` on every write, and
//! `update` merges the given fields into the existing row (partial update).

use async_trait::async_trait;
use serde_json::Value;

use arbor_core::{EngineResult, FieldMap, Row};

// =============================================================================
// List Query
// =============================================================================

/// Caller-supplied constraints for `find_and_count`.
///
/// Filters are exact-value equality on fields; the returned count is the
/// total number of matching rows before pagination.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Field = value equality filters, all of which must match.
    pub filters: Vec<(String, Value)>,

    /// Maximum rows to return.
    pub limit: Option<u32>,

    /// Rows to skip before returning.
    pub offset: Option<u32>,
}

impl ListQuery {
    /// Creates an unconstrained query.
    pub fn new() -> Self {
        ListQuery::default()
    }

    /// Adds an equality filter.
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    /// Sets the page size.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the page offset.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

// =============================================================================
// Storage Trait
// =============================================================================

/// Row-level storage collaborator consumed by the save engine.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Backend transaction handle. One per operation, passed by reference
    /// through every nested step, never duplicated.
    type Tx: Send;

    /// Opens a transaction.
    async fn begin(&self) -> EngineResult<Self::Tx>;

    /// Commits a transaction, releasing every row lock it holds.
    async fn commit(&self, tx: Self::Tx) -> EngineResult<()>;

    /// Rolls a transaction back, discarding its writes and releasing its
    /// row locks.
    async fn rollback(&self, tx: Self::Tx) -> EngineResult<()>;

    /// Reads one row inside the transaction.
    async fn get(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<Option<Row>>;

    /// Reads one row under a pessimistic row lock.
    ///
    /// A concurrent transaction locking the same row blocks until this
    /// transaction commits or rolls back. Re-acquiring a lock the same
    /// transaction already holds is not supported - callers must track their
    /// held locks (see `SaveContext::lock`).
    async fn lock_for_update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
    ) -> EngineResult<Option<Row>>;

    /// Inserts a row, returning it with storage stamps applied.
    async fn insert(&self, tx: &mut Self::Tx, entity: &str, row: Row) -> EngineResult<Row>;

    /// Merges `fields` into an existing row, returning the merged row.
    /// Fails with NotFound when the row does not exist.
    async fn update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
        fields: &FieldMap,
    ) -> EngineResult<Row>;

    /// Deletes one row by id; returns the number of rows removed (0 or 1).
    async fn delete(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<u64>;

    /// Returns rows whose `foreign_key` field equals `parent_id`, in
    /// persisted order (created_at, then id).
    async fn find_children(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        foreign_key: &str,
        parent_id: &str,
    ) -> EngineResult<Vec<Row>>;

    /// Reads one committed row, outside any transaction.
    async fn find(&self, entity: &str, id: &str) -> EngineResult<Option<Row>>;

    /// Returns committed rows matching the query plus the total match count
    /// before pagination.
    async fn find_and_count(
        &self,
        entity: &str,
        query: &ListQuery,
    ) -> EngineResult<(Vec<Row>, u64)>;
}
