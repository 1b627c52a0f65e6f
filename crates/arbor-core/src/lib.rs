//! # arbor-core: Pure Logic for the Arbor Save Engine
//!
//! This crate is the foundation of Arbor. It contains the types and rules the
//! save engine is built from, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Arbor Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 arbor-erp (Resource Definitions)                │   │
//! │  │        Product / SaleOrder schemas, relation trees, hooks       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 arbor-db (Storage + Save Engine)                │   │
//! │  │        Storage trait, backends, orchestrator, operations        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ arbor-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  schema   │  │   money   │  │   error   │  │   │
//! │  │   │ Row, maps │  │ FieldRule │  │ rounding  │  │ taxonomy  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Row and field-map types shared by every layer
//! - [`schema`] - Declarative field schemas and the payload validator
//! - [`money`] - Cent-boundary rounding for monetary aggregates
//! - [`error`] - The engine error taxonomy

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod schema;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use arbor_core::Row` instead of
// `use arbor_core::types::Row`

pub use error::{EngineError, EngineResult, ValidationError};
pub use schema::{FieldRule, Schema};
pub use types::{object, FieldMap, Row};
