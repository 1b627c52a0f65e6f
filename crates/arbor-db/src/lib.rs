//! # arbor-db: Storage Layer and Save Engine
//!
//! This crate provides storage access and the declarative save engine for
//! Arbor resources.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Arbor Data Flow                                  │
//! │                                                                         │
//! │  Resource definition (arbor-erp: schema + relation tree + hooks)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     arbor-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │    Engine     │    │   Relations   │    │   Storage    │  │   │
//! │  │   │ save/list/    │    │ descriptors,  │    │ trait +      │  │   │
//! │  │   │ info/delete   │◄───│ hooks, handles│    │ backends     │  │   │
//! │  │   └───────┬───────┘    └───────────────┘    └──────┬───────┘  │   │
//! │  │           │                                        │          │   │
//! │  │           └──────────── SaveContext ───────────────┘          │   │
//! │  │                   (one transaction per operation)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Memory backend (per-row async locks) / SQLite backend (sqlx)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`storage`] - The storage collaborator contract and list queries
//! - [`backend`] - Memory and SQLite implementations of [`storage::Storage`]
//! - [`relation`] - Relation descriptors, hook traits, resource definitions
//! - [`handle`] - Entity handles wrapping rows and resolved relations
//! - [`context`] - The per-operation save context (transaction carrier)
//! - [`save`] - The save orchestrator
//! - [`ops`] - List / Info / Delete operations

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backend;
pub mod context;
pub mod handle;
pub mod ops;
pub mod relation;
pub mod save;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::memory::MemoryStorage;
pub use backend::sqlite::{DbConfig, SqliteStorage};
pub use context::SaveContext;
pub use handle::{EntityHandle, Related};
pub use relation::{ItemHooks, Relation, ResourceDef, RootHooks};
pub use save::Engine;
pub use storage::{ListQuery, Storage};
