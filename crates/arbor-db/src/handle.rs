//! # Entity Handles
//!
//! An [`EntityHandle`] wraps one in-flight or persisted row plus the resolved
//! handles of its declared relations. Handles are created at the start of a
//! save/info operation for the root and every relation node touched, and
//! discarded when the operation finishes - they are never persisted as
//! standalone objects.
//!
//! Hooks receive handles to reach through the relation tree:
//! `item.one("product")` is the locked product a sale item references;
//! `root.many("items")` are the order's processed items.

use serde_json::Value;

use arbor_core::Row;

/// A resolved relation: one child handle or an ordered collection.
#[derive(Debug)]
pub enum Related {
    One(EntityHandle),
    Many(Vec<EntityHandle>),
}

/// A thin wrapper around one row of a given entity type plus its resolved
/// relations.
#[derive(Debug)]
pub struct EntityHandle {
    /// Entity type name (e.g. "sale_order_item").
    pub entity: String,

    /// The wrapped row. Before a pending row is written this holds only the
    /// minted id; afterwards it carries the persisted fields.
    pub row: Row,

    /// Whether the row did not exist before this operation.
    pub is_new: bool,

    relations: Vec<(String, Related)>,
}

impl EntityHandle {
    /// Wraps a row that already exists in storage.
    pub fn persisted(entity: &str, row: Row) -> Self {
        EntityHandle {
            entity: entity.to_string(),
            row,
            is_new: false,
            relations: Vec::new(),
        }
    }

    /// Wraps a row being created by the current operation.
    pub fn pending(entity: &str, row: Row) -> Self {
        EntityHandle {
            entity: entity.to_string(),
            row,
            is_new: true,
            relations: Vec::new(),
        }
    }

    /// The wrapped row's id.
    pub fn id(&self) -> &str {
        &self.row.id
    }

    /// Returns a resolved single relation.
    pub fn one(&self, name: &str) -> Option<&EntityHandle> {
        self.relations.iter().find_map(|(rel, related)| {
            match related {
                Related::One(handle) if rel == name => Some(handle),
                _ => None,
            }
        })
    }

    /// Returns a resolved single relation for mutation (hooks write derived
    /// fields, e.g. adjusted stock, onto the referenced row).
    pub fn one_mut(&mut self, name: &str) -> Option<&mut EntityHandle> {
        self.relations.iter_mut().find_map(|(rel, related)| {
            match related {
                Related::One(handle) if rel == name => Some(handle),
                _ => None,
            }
        })
    }

    /// Returns a resolved collection relation, empty when unresolved.
    pub fn many(&self, name: &str) -> &[EntityHandle] {
        self.relations
            .iter()
            .find_map(|(rel, related)| match related {
                Related::Many(handles) if rel == name => Some(handles.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Attaches (or replaces) a resolved single relation.
    pub fn set_one(&mut self, name: &str, handle: EntityHandle) {
        self.relations.retain(|(rel, _)| rel != name);
        self.relations.push((name.to_string(), Related::One(handle)));
    }

    /// Attaches (or replaces) a resolved collection relation.
    pub fn set_many(&mut self, name: &str, handles: Vec<EntityHandle>) {
        self.relations.retain(|(rel, _)| rel != name);
        self.relations
            .push((name.to_string(), Related::Many(handles)));
    }

    /// Serializes the row with its resolved relations nested, for responses.
    pub fn to_value(&self) -> Value {
        let mut out = self.row.fields.clone();
        for (name, related) in &self.relations {
            let value = match related {
                Related::One(handle) => handle.to_value(),
                Related::Many(handles) => {
                    Value::Array(handles.iter().map(EntityHandle::to_value).collect())
                }
            };
            out.insert(name.clone(), value);
        }
        Value::Object(out)
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

    fn handle(entity: &str, id: &str, fields: serde_json::Value) -> EntityHandle {
        EntityHandle::persisted(entity, Row::new(id, object(fields)))
    }

    #[test]
    fn test_relation_accessors() {
        let mut item = handle("sale_order_item", "i-1", json!({ "count": 2 }));
        assert!(item.one("product").is_none());
        assert!(item.many("anything").is_empty());

        item.set_one("product", handle("product", "p-1", json!({ "stock": 5 })));
        assert_eq!(item.one("product").unwrap().id(), "p-1");

        item.one_mut("product").unwrap().row.set("stock", 3);
        assert_eq!(item.one("product").unwrap().row.int("stock"), Some(3));
    }

    #[test]
    fn test_set_one_replaces() {
        let mut order = handle("sale_order", "o-1", json!({}));
        order.set_one("consumer", handle("consumer", "c-1", json!({})));
        order.set_one("consumer", handle("consumer", "c-2", json!({})));
        assert_eq!(order.one("consumer").unwrap().id(), "c-2");
    }

    #[test]
    fn test_to_value_nests_relations() {
        let mut order = handle("sale_order", "o-1", json!({ "price": 20.0 }));
        order.set_one("consumer", handle("consumer", "c-1", json!({ "name": "Ada" })));
        order.set_many(
            "items",
            vec![handle("sale_order_item", "i-1", json!({ "count": 2 }))],
        );

        let value = order.to_value();
        assert_eq!(value["price"], json!(20.0));
        assert_eq!(value["consumer"]["name"], json!("Ada"));
        assert_eq!(value["items"][0]["count"], json!(2));
    }
}
