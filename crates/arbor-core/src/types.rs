//! # Row and Field Types
//!
//! The engine is declarative: resource definitions are metadata, so payloads
//! and persisted rows are field-name keyed maps of JSON values rather than
//! per-entity structs. This module holds the two types every layer shares.
//!
//! ## Dual Representation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  FieldMap  - one payload or one set of column values                   │
//! │              {"count": 2, "price": 10.0, "product": "<uuid>"}          │
//! │                                                                         │
//! │  Row       - one persisted (or pending) row: the id pulled out for    │
//! │              cheap access, the full field map (id included) kept for  │
//! │              storage and response use                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One payload or one row's column values, keyed by field name.
pub type FieldMap = serde_json::Map<String, Value>;

/// Converts a `serde_json::Value` into a [`FieldMap`].
///
/// Panics when the value is not a JSON object; intended for building payloads
/// from `json!({...})` literals in resource code and tests.
pub fn object(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

// =============================================================================
// Row
// =============================================================================

/// One persisted-or-pending row of a given entity type.
///
/// The `id` is duplicated into `fields` so a row serializes as a single flat
/// document for storage and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// All column values, id included.
    pub fields: FieldMap,
}

impl Row {
    /// Creates a row, forcing `fields["id"]` to match `id`.
    pub fn new(id: impl Into<String>, mut fields: FieldMap) -> Self {
        let id = id.into();
        fields.insert("id".to_string(), Value::String(id.clone()));
        Row { id, fields }
    }

    /// Returns a field value, if present and non-null.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Sets a field value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Returns a field as an integer.
    pub fn int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    /// Returns a field as a number.
    pub fn num(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Returns a field as a string slice.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Returns a field as a boolean, defaulting to `false` when absent.
    pub fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_forces_id_field() {
        let row = Row::new("r-1", object(json!({ "name": "Widget" })));
        assert_eq!(row.id, "r-1");
        assert_eq!(row.text("id"), Some("r-1"));
        assert_eq!(row.text("name"), Some("Widget"));
    }

    #[test]
    fn test_typed_accessors() {
        let row = Row::new(
            "r-1",
            object(json!({
                "stock": 5,
                "unit_price": 10.5,
                "disable_score": true,
                "comment": null
            })),
        );

        assert_eq!(row.int("stock"), Some(5));
        assert_eq!(row.num("unit_price"), Some(10.5));
        assert_eq!(row.num("stock"), Some(5.0));
        assert!(row.flag("disable_score"));
        assert!(!row.flag("missing"));
        assert_eq!(row.get("comment"), None);
    }

    #[test]
    #[should_panic(expected = "expected a JSON object")]
    fn test_object_rejects_non_objects() {
        object(json!([1, 2, 3]));
    }
}
