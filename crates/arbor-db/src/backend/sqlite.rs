//! # SQLite Backend
//!
//! sqlx-backed persistence. Every registered entity gets one document table:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLite Row Layout                                  │
//! │                                                                         │
//! │  CREATE TABLE "sale_order_item" (                                      │
//! │      id     TEXT PRIMARY KEY,                                          │
//! │      fields TEXT NOT NULL      -- JSON document, id included           │
//! │  );                                                                     │
//! │                                                                         │
//! │  The engine is declarative and field-name keyed, so rows are stored    │
//! │  as JSON documents and filtered with json_extract. Entity tables are   │
//! │  created up front from the registered entity list (ensure_entities)    │
//! │  rather than from per-table migration files.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//! `lock_for_update` issues a no-op write (`UPDATE t SET id = id WHERE id = ?`)
//! before reading. The write upgrades the transaction to a writer, so a
//! concurrent transaction locking the same database blocks (within the busy
//! timeout) until commit or rollback. SQLite serializes writers per database
//! rather than per row; the contract holds, just with coarser granularity
//! than the in-memory backend.
//!
//! ## WAL Mode
//! WAL (Write-Ahead Logging) is enabled for better concurrent read
//! performance and crash recovery; readers don't block the writer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row as _, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use arbor_core::{EngineError, EngineResult, FieldMap, Row};

use crate::storage::{ListQuery, Storage};

// =============================================================================
// Configuration
// =============================================================================

/// SQLite backend configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/arbor.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits on a locked database before giving up.
    /// Default: 5 seconds
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// Creates a new configuration with the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// In-memory database configuration (for testing).
    ///
    /// The single connection IS the database: operations that need a second
    /// connection while a transaction is open will wait on the pool, so test
    /// code should commit before issuing non-transactional reads.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires a single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// SQLite Storage
// =============================================================================

/// SQLite implementation of the storage contract.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Creates the connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous (balance of safety/speed)
    ///    - Foreign keys enabled
    ///    - Busy timeout so concurrent writers wait instead of failing
    /// 3. Creates the connection pool
    pub async fn connect(config: DbConfig) -> EngineResult<Self> {
        info!(
            path = %config.database_path.display(),
            "initializing sqlite connection"
        );

        // sqlite://path with mode=rwc creates the file if not exists
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| EngineError::Storage(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "sqlite pool created"
        );

        Ok(SqliteStorage { pool })
    }

    /// Creates one document table per registered entity.
    ///
    /// Idempotent: safe to run on every startup.
    pub async fn ensure_entities(&self, entities: &[&str]) -> EngineResult<()> {
        for entity in entities {
            let table = ident(entity)?;
            let sql = format!(
                r#"CREATE TABLE IF NOT EXISTS "{table}" (id TEXT PRIMARY KEY, fields TEXT NOT NULL)"#
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        info!(count = entities.len(), "entity tables ready");
        Ok(())
    }

    /// Returns a reference to the connection pool, for diagnostics.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        info!("closing sqlite connection pool");
        self.pool.close().await;
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Entity and field names are static configuration, but they are interpolated
/// into SQL, so they must stay plain identifiers.
fn ident(name: &str) -> EngineResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(EngineError::Storage(format!("invalid identifier: {name}")))
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn row_from_document(text: &str) -> EngineResult<Row> {
    let fields: FieldMap = serde_json::from_str(text)
        .map_err(|e| EngineError::Storage(format!("corrupt row document: {e}")))?;
    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Storage("row document missing id".to_string()))?
        .to_string();
    Ok(Row::new(id, fields))
}

fn document(fields: &FieldMap) -> EngineResult<String> {
    serde_json::to_string(fields).map_err(|e| EngineError::Storage(e.to_string()))
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Maps sqlx errors onto the engine taxonomy.
///
/// SQLite constraint failures carry recognizable messages:
/// - UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
/// - FK constraint: "FOREIGN KEY constraint failed"
fn map_sqlx(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = db_err.message().to_string();
            if msg.contains("UNIQUE constraint failed")
                || msg.contains("FOREIGN KEY constraint failed")
            {
                EngineError::Constraint(msg)
            } else {
                EngineError::Storage(msg)
            }
        }
        other => EngineError::Storage(other.to_string()),
    }
}

fn where_clause(filters: &[(String, Value)]) -> EngineResult<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(filters.len());
    for (i, (field, _)) in filters.iter().enumerate() {
        let field = ident(field)?;
        parts.push(format!("json_extract(fields, '$.{field}') = ?{}", i + 1));
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

// =============================================================================
// Storage Implementation
// =============================================================================

#[async_trait]
impl Storage for SqliteStorage {
    type Tx = Transaction<'static, Sqlite>;

    async fn begin(&self) -> EngineResult<Self::Tx> {
        self.pool.begin().await.map_err(map_sqlx)
    }

    async fn commit(&self, tx: Self::Tx) -> EngineResult<()> {
        tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(&self, tx: Self::Tx) -> EngineResult<()> {
        tx.rollback().await.map_err(map_sqlx)
    }

    async fn get(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<Option<Row>> {
        let table = ident(entity)?;
        let sql = format!(r#"SELECT fields FROM "{table}" WHERE id = ?1"#);
        let found = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?;

        match found {
            Some(row) => {
                let text: String = row.try_get(0).map_err(map_sqlx)?;
                Ok(Some(row_from_document(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn lock_for_update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
    ) -> EngineResult<Option<Row>> {
        let table = ident(entity)?;
        debug!(entity = %entity, id = %id, "acquiring write lock");

        // No-op write: upgrades this transaction to the writer, blocking
        // concurrent writers until commit/rollback
        let sql = format!(r#"UPDATE "{table}" SET id = id WHERE id = ?1"#);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(tx, entity, id).await
    }

    async fn insert(&self, tx: &mut Self::Tx, entity: &str, row: Row) -> EngineResult<Row> {
        let table = ident(entity)?;
        let mut fields = row.fields;
        fields.entry("created_at".to_string()).or_insert_with(now);
        fields.insert("updated_at".to_string(), now());

        debug!(entity = %entity, id = %row.id, "inserting row");
        let sql = format!(r#"INSERT INTO "{table}" (id, fields) VALUES (?1, ?2)"#);
        sqlx::query(&sql)
            .bind(&row.id)
            .bind(document(&fields)?)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;

        Ok(Row::new(row.id, fields))
    }

    async fn update(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        id: &str,
        fields: &FieldMap,
    ) -> EngineResult<Row> {
        let table = ident(entity)?;
        let mut current = self
            .get(tx, entity, id)
            .await?
            .ok_or_else(|| EngineError::not_found(entity, id))?;

        for (name, value) in fields {
            current.fields.insert(name.clone(), value.clone());
        }
        current.fields.insert("updated_at".to_string(), now());

        debug!(entity = %entity, id = %id, "updating row");
        let sql = format!(r#"UPDATE "{table}" SET fields = ?2 WHERE id = ?1"#);
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(document(&current.fields)?)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::not_found(entity, id));
        }
        Ok(current)
    }

    async fn delete(&self, tx: &mut Self::Tx, entity: &str, id: &str) -> EngineResult<u64> {
        let table = ident(entity)?;
        debug!(entity = %entity, id = %id, "deleting row");
        let sql = format!(r#"DELETE FROM "{table}" WHERE id = ?1"#);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn find_children(
        &self,
        tx: &mut Self::Tx,
        entity: &str,
        foreign_key: &str,
        parent_id: &str,
    ) -> EngineResult<Vec<Row>> {
        let table = ident(entity)?;
        ident(foreign_key)?;
        let sql = format!(
            r#"SELECT fields FROM "{table}" WHERE json_extract(fields, '$.{foreign_key}') = ?1
               ORDER BY json_extract(fields, '$.created_at'), id"#
        );
        let found = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx)?;

        found
            .iter()
            .map(|row| {
                let text: String = row.try_get(0).map_err(map_sqlx)?;
                row_from_document(&text)
            })
            .collect()
    }

    async fn find(&self, entity: &str, id: &str) -> EngineResult<Option<Row>> {
        let table = ident(entity)?;
        let sql = format!(r#"SELECT fields FROM "{table}" WHERE id = ?1"#);
        let found = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        match found {
            Some(row) => {
                let text: String = row.try_get(0).map_err(map_sqlx)?;
                Ok(Some(row_from_document(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn find_and_count(
        &self,
        entity: &str,
        query: &ListQuery,
    ) -> EngineResult<(Vec<Row>, u64)> {
        let table = ident(entity)?;
        let filters = where_clause(&query.filters)?;

        let count_sql = format!(r#"SELECT COUNT(*) FROM "{table}"{filters}"#);
        let mut count_query = sqlx::query(&count_sql);
        for (_, value) in &query.filters {
            count_query = bind_value(count_query, value);
        }
        let count_row = count_query.fetch_one(&self.pool).await.map_err(map_sqlx)?;
        let count: i64 = count_row.try_get(0).map_err(map_sqlx)?;

        let n = query.filters.len();
        let rows_sql = format!(
            r#"SELECT fields FROM "{table}"{filters}
               ORDER BY json_extract(fields, '$.created_at'), id LIMIT ?{} OFFSET ?{}"#,
            n + 1,
            n + 2
        );
        let mut rows_query = sqlx::query(&rows_sql);
        for (_, value) in &query.filters {
            rows_query = bind_value(rows_query, value);
        }
        // LIMIT -1 means unlimited in SQLite
        rows_query = rows_query
            .bind(query.limit.map_or(-1, i64::from))
            .bind(i64::from(query.offset.unwrap_or(0)));

        let found = rows_query.fetch_all(&self.pool).await.map_err(map_sqlx)?;
        let rows = found
            .iter()
            .map(|row| {
                let text: String = row.try_get(0).map_err(map_sqlx)?;
                row_from_document(&text)
            })
            .collect::<EngineResult<Vec<Row>>>()?;

        Ok((rows, count as u64))
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

    async fn test_storage() -> SqliteStorage {
        let storage = SqliteStorage::connect(DbConfig::in_memory()).await.unwrap();
        storage
            .ensure_entities(&["product", "sale_order_item"])
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_insert_get_update_delete_roundtrip() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        let row = storage
            .insert(
                &mut tx,
                "product",
                Row::new("p-1", object(json!({ "name": "Widget", "stock": 5 }))),
            )
            .await
            .unwrap();
        assert!(row.get("created_at").is_some());

        let row = storage
            .update(&mut tx, "product", "p-1", &object(json!({ "stock": 3 })))
            .await
            .unwrap();
        assert_eq!(row.int("stock"), Some(3));
        assert_eq!(row.text("name"), Some("Widget"));

        let row = storage.get(&mut tx, "product", "p-1").await.unwrap().unwrap();
        assert_eq!(row.int("stock"), Some(3));

        assert_eq!(storage.delete(&mut tx, "product", "p-1").await.unwrap(), 1);
        assert!(storage.get(&mut tx, "product", "p-1").await.unwrap().is_none());
        storage.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        storage
            .insert(&mut tx, "product", Row::new("p-1", object(json!({ "stock": 5 }))))
            .await
            .unwrap();
        storage.rollback(tx).await.unwrap();

        assert!(storage.find("product", "p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_for_update_returns_row_or_none() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        storage
            .insert(&mut tx, "product", Row::new("p-1", object(json!({ "stock": 5 }))))
            .await
            .unwrap();

        let row = storage
            .lock_for_update(&mut tx, "product", "p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.int("stock"), Some(5));

        assert!(storage
            .lock_for_update(&mut tx, "product", "ghost")
            .await
            .unwrap()
            .is_none());
        storage.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_children_filters_and_orders() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        for (id, created) in [
            ("i-2", "2026-01-02T00:00:00+00:00"),
            ("i-1", "2026-01-01T00:00:00+00:00"),
        ] {
            storage
                .insert(
                    &mut tx,
                    "sale_order_item",
                    Row::new(id, object(json!({ "fk_order": "o-1", "created_at": created }))),
                )
                .await
                .unwrap();
        }
        storage
            .insert(
                &mut tx,
                "sale_order_item",
                Row::new("i-x", object(json!({ "fk_order": "other" }))),
            )
            .await
            .unwrap();

        let children = storage
            .find_children(&mut tx, "sale_order_item", "fk_order", "o-1")
            .await
            .unwrap();
        let ids: Vec<&str> = children.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);
        storage.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_and_count_filters_and_paginates() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        for i in 0..4 {
            storage
                .insert(
                    &mut tx,
                    "product",
                    Row::new(
                        format!("p-{i}"),
                        object(json!({
                            "unit": "kg",
                            "created_at": format!("2026-01-0{}T00:00:00+00:00", i + 1)
                        })),
                    ),
                )
                .await
                .unwrap();
        }
        storage
            .insert(&mut tx, "product", Row::new("p-x", object(json!({ "unit": "box" }))))
            .await
            .unwrap();
        storage.commit(tx).await.unwrap();

        let (rows, count) = storage
            .find_and_count(
                "product",
                &ListQuery::new().filter("unit", "kg").limit(2).offset(1),
            )
            .await
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "p-1");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_a_constraint_error() {
        let storage = test_storage().await;

        let mut tx = storage.begin().await.unwrap();
        storage
            .insert(&mut tx, "product", Row::new("p-1", FieldMap::new()))
            .await
            .unwrap();
        let err = storage
            .insert(&mut tx, "product", Row::new("p-1", FieldMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Constraint(_)));
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_identifiers_are_guarded() {
        let storage = test_storage().await;
        let err = storage.find("product; DROP TABLE product", "x").await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
