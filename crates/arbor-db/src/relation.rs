//! # Relation Descriptors and Resource Definitions
//!
//! Static metadata, built once at resource-registration time. A
//! [`ResourceDef`] declares a root entity's field schema, its relation tree,
//! and its hooks; the save engine interprets it.
//!
//! ## Relation Tree
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Relation Tree (sale order)                        │
//! │                                                                         │
//! │  sale_order                                                            │
//! │  ├── consumer  → Consumer         single, LOCKED   (fk_consumer)       │
//! │  └── items     → SaleOrderItem    many, CASCADE    (fk_order)          │
//! │        └── product → Product      single, LOCKED   (fk_product)        │
//! │                                                                         │
//! │  The tree is defined by the descriptor, not by the data. Locked        │
//! │  relations are references the operation does not own; owned many       │
//! │  relations are created/updated/deleted as part of the operation.       │
//! │                                                                         │
//! │  The builder asserts the graph IS a tree: no entity may appear as      │
//! │  its own ancestor.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Hooks
//! Domain logic plugs into a closed set of named slots, expressed as traits
//! with default no-op methods rather than open-ended reflection. See
//! [`ItemHooks`] and [`RootHooks`] for the exact invocation points.

use std::sync::Arc;

use async_trait::async_trait;

use arbor_core::{EngineResult, FieldMap, Schema};

use crate::context::SaveContext;
use crate::handle::EntityHandle;
use crate::storage::Storage;

// =============================================================================
// Hook Traits
// =============================================================================

/// Extension points for items of a relation.
#[async_trait]
pub trait ItemHooks<S: Storage>: Send + Sync {
    /// Runs after the item's own schema validation, before any write.
    ///
    /// May mutate the candidate field values (e.g. inject a derived price
    /// snapshot) and may fail the whole operation by returning
    /// `EngineError::Domain`, which aborts the enclosing transaction. Nested
    /// relations of the item are resolved on the handle before this runs.
    async fn on_validate(
        &self,
        _fields: &mut FieldMap,
        _item: &mut EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        Ok(())
    }

    /// Runs after the item row is written.
    ///
    /// Used to persist side effects to entities reached through the item
    /// (e.g. a locked product's adjusted stock) inside the same transaction.
    async fn on_persist(
        &self,
        _item: &EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        Ok(())
    }
}

/// Extension points on the root entity.
#[async_trait]
pub trait RootHooks<S: Storage>: Send + Sync {
    /// Runs after all relations are fully processed.
    ///
    /// Computes aggregate/derived fields on the root (e.g. the order total);
    /// the orchestrator persists whatever this mutates on the root handle.
    async fn on_save(
        &self,
        _root: &mut EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        Ok(())
    }

    /// Runs only when the root did not previously exist, after `on_save`.
    ///
    /// For one-time side effects on other entities (e.g. crediting a
    /// consumer's loyalty score).
    async fn on_create(
        &self,
        _root: &mut EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        Ok(())
    }
}

// =============================================================================
// Relation Descriptor
// =============================================================================

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// One referenced row; the payload carries its id.
    One,
    /// An owned, ordered collection; the payload carries an array of items.
    Many,
}

/// Static metadata for one relation.
pub struct Relation<S: Storage> {
    /// Target entity type.
    pub entity: String,

    /// Foreign-key field. On a One relation it lives on the parent row; on a
    /// Many relation it lives on each child row.
    pub foreign_key: String,

    /// Single or collection.
    pub kind: Cardinality,

    /// Resolve the referenced row under a pessimistic row lock scoped to the
    /// enclosing transaction (lock scope ends at commit/rollback).
    pub lock: bool,

    /// Delete previously persisted children absent from an update payload.
    pub cascade: bool,

    /// Field schema for collection items.
    pub item_schema: Schema,

    /// Nested relations, declaration order.
    pub nested: Vec<(String, Relation<S>)>,

    /// Item-level hooks.
    pub hooks: Option<Arc<dyn ItemHooks<S>>>,
}

impl<S: Storage> Relation<S> {
    fn new(entity: &str, foreign_key: &str, kind: Cardinality) -> Self {
        Relation {
            entity: entity.to_string(),
            foreign_key: foreign_key.to_string(),
            kind,
            lock: false,
            cascade: false,
            item_schema: Schema::new(),
            nested: Vec::new(),
            hooks: None,
        }
    }

    /// A single referenced row, fk stored on the parent.
    pub fn one(entity: &str, foreign_key: &str) -> Self {
        Relation::new(entity, foreign_key, Cardinality::One)
    }

    /// An owned collection, fk stored on each child.
    pub fn many(entity: &str, foreign_key: &str) -> Self {
        Relation::new(entity, foreign_key, Cardinality::Many)
    }

    /// Resolves this reference under a row lock.
    pub fn locked(mut self) -> Self {
        self.lock = true;
        self
    }

    /// Enables cascade deletion of children absent from the payload.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Declares the item payload schema for a Many relation.
    pub fn item_schema(mut self, schema: Schema) -> Self {
        self.item_schema = schema;
        self
    }

    /// Declares a nested relation.
    pub fn nested(mut self, name: &str, relation: Relation<S>) -> Self {
        self.nested.push((name.to_string(), relation));
        self
    }

    /// Attaches item-level hooks.
    pub fn hooks(mut self, hooks: impl ItemHooks<S> + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Whether this is a collection relation.
    pub fn is_many(&self) -> bool {
        self.kind == Cardinality::Many
    }
}

// =============================================================================
// Resource Definition
// =============================================================================

/// One resource endpoint: root entity, field schema, relation tree, hooks.
pub struct ResourceDef<S: Storage> {
    /// Root entity type.
    pub entity: String,

    /// Root field schema (relation fields included, so the validator can
    /// check their shape and create-requiredness).
    pub schema: Schema,

    /// Relations in declaration order.
    pub relations: Vec<(String, Relation<S>)>,

    /// Root-level hooks.
    pub root_hooks: Option<Arc<dyn RootHooks<S>>>,

    /// Single relations the list operation always eager-loads.
    pub list_includes: Vec<String>,
}

impl<S: Storage> ResourceDef<S> {
    /// Starts a resource definition.
    pub fn new(entity: &str, schema: Schema) -> Self {
        ResourceDef {
            entity: entity.to_string(),
            schema,
            relations: Vec::new(),
            root_hooks: None,
            list_includes: Vec::new(),
        }
    }

    /// Declares a relation.
    pub fn relation(mut self, name: &str, relation: Relation<S>) -> Self {
        self.relations.push((name.to_string(), relation));
        self
    }

    /// Attaches root-level hooks.
    pub fn hooks(mut self, hooks: impl RootHooks<S> + 'static) -> Self {
        self.root_hooks = Some(Arc::new(hooks));
        self
    }

    /// Marks a single relation as eagerly loaded by the list operation.
    pub fn list_include(mut self, name: &str) -> Self {
        self.list_includes.push(name.to_string());
        self
    }

    /// Finalizes the definition, asserting the relation graph is a tree.
    ///
    /// Panics when an entity appears as its own ancestor - that is a
    /// programming error in the resource configuration, caught at
    /// registration time rather than mid-save.
    pub fn build(self) -> Self {
        fn walk<S: Storage>(ancestors: &mut Vec<String>, name: &str, relation: &Relation<S>) {
            assert!(
                !ancestors.contains(&relation.entity),
                "relation tree cycle: entity '{}' (relation '{}') appears as its own ancestor",
                relation.entity,
                name,
            );
            ancestors.push(relation.entity.clone());
            for (nested_name, nested) in &relation.nested {
                walk(ancestors, nested_name, nested);
            }
            ancestors.pop();
        }

        let mut ancestors = vec![self.entity.clone()];
        for (name, relation) in &self.relations {
            walk(&mut ancestors, name, relation);
        }
        self
    }

    /// Looks up a relation by name.
    pub fn find_relation(&self, name: &str) -> Option<&Relation<S>> {
        self.relations
            .iter()
            .find(|(rel_name, _)| rel_name == name)
            .map(|(_, relation)| relation)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
