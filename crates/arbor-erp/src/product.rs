//! # Product Resource
//!
//! Catalog products with stock levels and pricing. The only relation is the
//! product type, resolved for existence on save and eager-loaded on reads;
//! products own no children, so deletion is direct.

use arbor_core::{FieldRule, Schema};
use arbor_db::{Relation, ResourceDef, Storage};

/// The product endpoint definition.
pub fn product<S: Storage>() -> ResourceDef<S> {
    ResourceDef::new(
        "product",
        Schema::new()
            .field("name", FieldRule::string().min_len(3))
            .field("comment", FieldRule::string())
            .field("code", FieldRule::string())
            .field("unit", FieldRule::string())
            .field("stock", FieldRule::integer())
            .field("min_stock", FieldRule::integer())
            .field("unit_price", FieldRule::number())
            .field("purchase_price", FieldRule::number())
            .field("fk_type", FieldRule::uuid())
            .create_requires("name,stock,min_stock,unit_price,purchase_price,fk_type"),
    )
    .relation("fk_type", Relation::one("product_type", "fk_type"))
    .list_include("fk_type")
    .build()
}
