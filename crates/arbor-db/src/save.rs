//! # Save Orchestrator
//!
//! Takes a root entity type, a relation-tree descriptor and a payload, and
//! validates and persists the whole graph atomically.
//!
//! ## Save Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Save Algorithm                                    │
//! │                                                                         │
//! │  1. is_create = payload has no id                                      │
//! │  2. Validate payload, extract relation inputs     (NO transaction yet) │
//! │  ─────────────────────── transaction opens ──────────────────────────  │
//! │  3. Load root row by id (update) or mint a fresh id (create)           │
//! │  4. Resolve single relations (row locks!) → fks land on root fields    │
//! │  5. Persist the root row (parent before children)                      │
//! │  6. For each many relation, diff payload items against persisted       │
//! │     children by id:                                                     │
//! │       with id    → update   (validate → on_validate → write →          │
//! │       without id → create    on_persist)                                │
//! │       absent     → delete iff cascade                                   │
//! │  7. on_save → persist mutated root fields                               │
//! │  8. on_create (create only) → persist mutated root fields               │
//! │  ─────────────── commit (rollback on any error above) ────────────────  │
//! │  9. Reload the root with relations for response use                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Relation processing order is declaration order; within a many relation,
//! item order is payload order for creates/updates and persisted order for
//! deletions. Any error inside the transactional region rolls everything
//! back - partial writes are never visible outside the operation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use arbor_core::{EngineError, EngineResult, FieldMap, Row, ValidationError};

use crate::context::SaveContext;
use crate::handle::EntityHandle;
use crate::relation::{Relation, ResourceDef};
use crate::storage::Storage;

// =============================================================================
// Engine
// =============================================================================

/// The save engine: one instance per storage backend, shared by every
/// resource definition.
#[derive(Debug, Clone)]
pub struct Engine<S: Storage> {
    pub(crate) storage: S,
}

impl<S: Storage> Engine<S> {
    /// Creates an engine on top of a storage backend.
    pub fn new(storage: S) -> Self {
        Engine { storage }
    }

    /// Returns the underlying storage collaborator.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Saves a root entity plus its relation tree, atomically.
    ///
    /// A payload with an id updates; without one it creates. Returns the
    /// fully resolved root handle, reloaded after commit for response use.
    pub async fn save(&self, def: &ResourceDef<S>, payload: FieldMap) -> EngineResult<EntityHandle> {
        let root_id = extract_id(&payload, "id")?;
        let is_create = root_id.is_none();
        debug!(entity = %def.entity, is_create, "save requested");

        // Validation happens before the transaction opens; failures here
        // never touch storage
        let mut root_fields = def.schema.validate(&payload, is_create)?;
        let rels = extract_relations(&def.relations, &mut root_fields)?;

        let mut ctx = SaveContext::begin(&self.storage).await?;
        match save_tree(def, root_id, root_fields, rels, &mut ctx).await {
            Ok(saved_id) => {
                ctx.commit().await?;
                debug!(entity = %def.entity, id = %saved_id, "save committed");
                self.info(def, &saved_id).await
            }
            Err(err) => {
                // A rollback failure must not mask the original error
                let _ = ctx.rollback().await;
                Err(err)
            }
        }
    }
}

// =============================================================================
// Payload Extraction (pre-transaction)
// =============================================================================

/// Validated input for one relation subtree, pulled out of the payload before
/// the transaction opens.
#[derive(Default)]
struct RelInput {
    /// Single relation name → referenced id present in the payload.
    ones: Vec<(String, String)>,

    /// Many relation name → validated items. A relation absent here was
    /// absent from the payload (children stay untouched).
    manys: Vec<(String, Vec<ItemInput>)>,
}

struct ItemInput {
    id: Option<String>,
    fields: FieldMap,
    nested: RelInput,
}

impl RelInput {
    fn one_id(&self, name: &str) -> Option<String> {
        self.ones
            .iter()
            .find(|(rel, _)| rel == name)
            .map(|(_, id)| id.clone())
    }

    fn take_many(&mut self, name: &str) -> Option<Vec<ItemInput>> {
        let index = self.manys.iter().position(|(rel, _)| rel == name)?;
        Some(self.manys.remove(index).1)
    }
}

fn extract_id(payload: &FieldMap, field: &str) -> Result<Option<String>, ValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => {
            Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
                field: field.to_string(),
                reason: "must be a valid UUID".to_string(),
            })?;
            Ok(Some(id.clone()))
        }
        Some(_) => Err(ValidationError::WrongType {
            field: field.to_string(),
            expected: "string",
        }),
    }
}

/// Pulls relation values out of a validated field map, schema-checking many
/// relation items (create/update mode per item by id presence) recursively.
fn extract_relations<S: Storage>(
    relations: &[(String, Relation<S>)],
    fields: &mut FieldMap,
) -> Result<RelInput, ValidationError> {
    let mut input = RelInput::default();

    for (name, relation) in relations {
        let Some(value) = fields.remove(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        if relation.is_many() {
            let Value::Array(items) = value else {
                return Err(ValidationError::WrongType {
                    field: name.clone(),
                    expected: "array",
                });
            };
            let mut parsed = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(mut item_fields) = item else {
                    return Err(ValidationError::WrongType {
                        field: name.clone(),
                        expected: "object",
                    });
                };
                let id = extract_id(&item_fields, "id")?;
                item_fields.remove("id");
                let mut cleaned = relation.item_schema.validate(&item_fields, id.is_none())?;
                let nested = extract_relations(&relation.nested, &mut cleaned)?;
                parsed.push(ItemInput {
                    id,
                    fields: cleaned,
                    nested,
                });
            }
            input.manys.push((name.clone(), parsed));
        } else {
            let Value::String(id) = value else {
                return Err(ValidationError::WrongType {
                    field: name.clone(),
                    expected: "string",
                });
            };
            input.ones.push((name.clone(), id));
        }
    }

    Ok(input)
}

// =============================================================================
// Transactional Tree Walk
// =============================================================================

async fn save_tree<S: Storage>(
    def: &ResourceDef<S>,
    root_id: Option<String>,
    mut root_fields: FieldMap,
    mut rels: RelInput,
    ctx: &mut SaveContext<'_, S>,
) -> EngineResult<String> {
    let is_create = root_id.is_none();

    // Load (update) or initialize (create) the root row
    let mut root = match &root_id {
        Some(id) => {
            let row = ctx
                .get(&def.entity, id)
                .await?
                .ok_or_else(|| EngineError::not_found(&def.entity, id))?;
            EntityHandle::persisted(&def.entity, row)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            EntityHandle::pending(&def.entity, Row::new(id, FieldMap::new()))
        }
    };
    let root_row_id = root.id().to_string();

    // Single relations resolve first so their foreign keys land on the root
    // row before it is written. Locked references serialize concurrent
    // operations touching the same row.
    for (name, relation) in &def.relations {
        if relation.is_many() {
            continue;
        }
        let ref_id = rels
            .one_id(name)
            .or_else(|| root.row.text(&relation.foreign_key).map(String::from));
        let Some(ref_id) = ref_id else {
            continue;
        };
        let child = resolve_reference(relation, &ref_id, ctx).await?;
        root_fields.insert(relation.foreign_key.clone(), Value::String(ref_id));
        root.set_one(name, child);
    }

    // Parent before children: new items need a valid root id for their fk
    root.row = if is_create {
        ctx.insert(&def.entity, Row::new(root_row_id.clone(), root_fields))
            .await?
    } else {
        ctx.update(&def.entity, &root_row_id, &root_fields).await?
    };

    // Owned collections, declaration order
    for (name, relation) in &def.relations {
        if !relation.is_many() {
            continue;
        }
        let handles = match rels.take_many(name) {
            Some(items) => apply_many(relation, &root_row_id, items, ctx).await?,
            None => {
                // Relation absent from an update payload: children stay
                // untouched, but root hooks still need them resolved for
                // aggregates
                let rows = ctx
                    .find_children(&relation.entity, &relation.foreign_key, &root_row_id)
                    .await?;
                rows.into_iter()
                    .map(|row| EntityHandle::persisted(&relation.entity, row))
                    .collect()
            }
        };
        root.set_many(name, handles);
    }

    // Aggregates, then one-time create effects; the orchestrator persists
    // whatever the hooks mutate on the root handle
    if let Some(hooks) = &def.root_hooks {
        hooks.on_save(&mut root, ctx).await?;
        let fields = root.row.fields.clone();
        root.row = ctx.update(&def.entity, &root_row_id, &fields).await?;

        if is_create {
            hooks.on_create(&mut root, ctx).await?;
            let fields = root.row.fields.clone();
            root.row = ctx.update(&def.entity, &root_row_id, &fields).await?;
        }
    }

    Ok(root_row_id)
}

/// Resolves a referenced (not owned) row into a handle, locking it when the
/// relation says so, then resolves its nested single relations.
fn resolve_reference<'a, S: Storage>(
    relation: &'a Relation<S>,
    id: &'a str,
    ctx: &'a mut SaveContext<'_, S>,
) -> Pin<Box<dyn Future<Output = EngineResult<EntityHandle>> + Send + 'a>> {
    Box::pin(async move {
        let row = if relation.lock {
            ctx.lock(&relation.entity, id).await?
        } else {
            ctx.fetch(&relation.entity, id).await?
        };
        let mut handle = EntityHandle::persisted(&relation.entity, row);

        for (name, nested) in &relation.nested {
            if nested.is_many() {
                continue;
            }
            let Some(ref_id) = handle.row.text(&nested.foreign_key).map(String::from) else {
                continue;
            };
            let child = resolve_reference(nested, &ref_id, ctx).await?;
            handle.set_one(name, child);
        }

        Ok(handle)
    })
}

/// Reconciles one owned collection against its persisted children by id.
fn apply_many<'a, S: Storage>(
    relation: &'a Relation<S>,
    parent_id: &'a str,
    items: Vec<ItemInput>,
    ctx: &'a mut SaveContext<'_, S>,
) -> Pin<Box<dyn Future<Output = EngineResult<Vec<EntityHandle>>> + Send + 'a>> {
    Box::pin(async move {
        let existing = ctx
            .find_children(&relation.entity, &relation.foreign_key, parent_id)
            .await?;
        let mut remaining: Vec<String> = existing.iter().map(|row| row.id.clone()).collect();
        let mut by_id: HashMap<String, Row> = existing
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let handle =
                apply_item(relation, parent_id, item, &mut by_id, &mut remaining, ctx).await?;
            out.push(handle);
        }

        if relation.cascade {
            // Previously persisted items absent from the payload are deleted,
            // in persisted order - never silently orphaned
            for stale in &remaining {
                debug!(entity = %relation.entity, id = %stale, "cascade delete");
                ctx.delete(&relation.entity, stale).await?;
            }
        } else {
            // Without cascade they stay untouched; keep them on the handle so
            // root aggregates still see them
            for stale in &remaining {
                if let Some(row) = by_id.remove(stale) {
                    out.push(EntityHandle::persisted(&relation.entity, row));
                }
            }
        }

        Ok(out)
    })
}

async fn apply_item<S: Storage>(
    relation: &Relation<S>,
    parent_id: &str,
    item: ItemInput,
    by_id: &mut HashMap<String, Row>,
    remaining: &mut Vec<String>,
    ctx: &mut SaveContext<'_, S>,
) -> EngineResult<EntityHandle> {
    let ItemInput {
        id,
        mut fields,
        mut nested,
    } = item;

    let (item_id, mut handle) = match id {
        Some(id) => {
            // The id must belong to this parent's persisted children
            let row = by_id
                .remove(&id)
                .ok_or_else(|| EngineError::not_found(&relation.entity, &id))?;
            remaining.retain(|existing| existing != &id);
            (id, EntityHandle::persisted(&relation.entity, row))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            fields.insert(
                relation.foreign_key.clone(),
                Value::String(parent_id.to_string()),
            );
            let handle =
                EntityHandle::pending(&relation.entity, Row::new(id.clone(), FieldMap::new()));
            (id, handle)
        }
    };

    // Nested single relations resolve before the item's own hooks run, since
    // the hooks depend on the resolved handles
    for (name, nested_rel) in &relation.nested {
        if nested_rel.is_many() {
            continue;
        }
        let ref_id = nested
            .one_id(name)
            .or_else(|| handle.row.text(&nested_rel.foreign_key).map(String::from));
        let Some(ref_id) = ref_id else {
            continue;
        };
        let child = resolve_reference(nested_rel, &ref_id, ctx).await?;
        fields.insert(nested_rel.foreign_key.clone(), Value::String(ref_id));
        handle.set_one(name, child);
    }

    if let Some(hooks) = &relation.hooks {
        hooks.on_validate(&mut fields, &mut handle, ctx).await?;
    }

    handle.row = if handle.is_new {
        ctx.insert(&relation.entity, Row::new(item_id.clone(), fields))
            .await?
    } else {
        ctx.update(&relation.entity, &item_id, &fields).await?
    };

    if let Some(hooks) = &relation.hooks {
        hooks.on_persist(&handle, ctx).await?;
    }

    // Nested collections of this item
    for (name, nested_rel) in &relation.nested {
        if !nested_rel.is_many() {
            continue;
        }
        let handles = match nested.take_many(name) {
            Some(items) => apply_many(nested_rel, &item_id, items, ctx).await?,
            None if !handle.is_new => ctx
                .find_children(&nested_rel.entity, &nested_rel.foreign_key, &item_id)
                .await?
                .into_iter()
                .map(|row| EntityHandle::persisted(&nested_rel.entity, row))
                .collect(),
            None => Vec::new(),
        };
        handle.set_many(name, handles);
    }

    Ok(handle)
}

// =============================================================================
// Unit Tests
// =============================================================================
