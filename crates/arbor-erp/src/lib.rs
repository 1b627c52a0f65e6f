//! # arbor-erp: Resource Endpoints
//!
//! The ERP resources built on the Arbor save engine. Each resource is pure
//! metadata - a field schema, a relation tree, and hooks - interpreted by
//! [`arbor_db::Engine`].
//!
//! ## Resources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Product                           SaleOrder                           │
//! │  └── fk_type → ProductType         ├── consumer → Consumer (locked)    │
//! │                                    └── items → SaleOrderItem (cascade) │
//! │                                          └── product → Product (locked)│
//! │                                                                         │
//! │  Selling adjusts the locked product's stock inside the order's         │
//! │  transaction; creating an order credits the consumer's loyalty score.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod product;
pub mod sale;

pub use product::product;
pub use sale::sale_order;

/// Every entity type the resources persist, for backends that create their
/// tables up front (`SqliteStorage::ensure_entities`).
pub const ENTITIES: &[&str] = &[
    "product",
    "product_type",
    "consumer",
    "sale_order",
    "sale_order_item",
];
