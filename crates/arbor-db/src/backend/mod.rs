//! # Storage Backends
//!
//! Two implementations of the [`crate::storage::Storage`] contract:
//!
//! - [`memory`] - committed tables behind a mutex, buffered transaction
//!   overlays, true per-row async locks. The reference implementation, and
//!   the one the concurrency tests exercise.
//! - [`sqlite`] - sqlx-backed SQLite persistence: one document table per
//!   entity, WAL mode, connection pooling.

pub mod memory;
pub mod sqlite;
