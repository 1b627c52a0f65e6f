//! # List / Info / Delete Operations
//!
//! Thin read/delete entry points reusing the relation metadata of a
//! [`ResourceDef`]:
//!
//! - **list** - delegates to storage with caller filters/pagination merged;
//!   the resource's configured single relations are always eager-loaded on
//!   top of whatever the caller asked for (caller constraints never remove
//!   the mandatory includes).
//! - **info** - one row by id with ALL declared relations eagerly resolved,
//!   nested included; NotFound when absent.
//! - **delete** - for resources with owned collections, children are removed
//!   first, then the root, inside one transaction, so a failure partway
//!   leaves everything in place and nothing is ever orphaned.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use arbor_core::{EngineError, EngineResult};

use crate::context::SaveContext;
use crate::handle::EntityHandle;
use crate::relation::{Relation, ResourceDef};
use crate::save::Engine;
use crate::storage::{ListQuery, Storage};

impl<S: Storage> Engine<S> {
    /// Lists committed rows with the resource's configured single relations
    /// eagerly loaded, plus the total match count before pagination.
    pub async fn list(
        &self,
        def: &ResourceDef<S>,
        query: ListQuery,
    ) -> EngineResult<(Vec<EntityHandle>, u64)> {
        let (rows, count) = self.storage.find_and_count(&def.entity, &query).await?;
        debug!(entity = %def.entity, rows = rows.len(), count, "list");

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut handle = EntityHandle::persisted(&def.entity, row);
            for name in &def.list_includes {
                let Some(relation) = def.find_relation(name) else {
                    continue;
                };
                if relation.is_many() {
                    continue;
                }
                let Some(ref_id) = handle.row.text(&relation.foreign_key).map(String::from)
                else {
                    continue;
                };
                if let Some(row) = self.storage.find(&relation.entity, &ref_id).await? {
                    handle.set_one(name, EntityHandle::persisted(&relation.entity, row));
                }
            }
            out.push(handle);
        }

        Ok((out, count))
    }

    /// Loads one row by id with all declared relations eagerly resolved.
    pub async fn info(&self, def: &ResourceDef<S>, id: &str) -> EngineResult<EntityHandle> {
        let row = self
            .storage
            .find(&def.entity, id)
            .await?
            .ok_or_else(|| EngineError::not_found(&def.entity, id))?;
        let mut handle = EntityHandle::persisted(&def.entity, row);
        resolve_relations(&self.storage, &def.relations, &mut handle).await?;
        Ok(handle)
    }

    /// Deletes one row and every owned child row, in one transaction.
    pub async fn delete(&self, def: &ResourceDef<S>, id: &str) -> EngineResult<()> {
        debug!(entity = %def.entity, id = %id, "delete requested");
        let mut ctx = SaveContext::begin(&self.storage).await?;
        match delete_tree(def, id, &mut ctx).await {
            Ok(()) => ctx.commit().await,
            Err(err) => {
                let _ = ctx.rollback().await;
                Err(err)
            }
        }
    }
}

/// Resolves all relations of a handle from committed storage, nested
/// included (used by info and by the post-save reload).
fn resolve_relations<'a, S: Storage>(
    storage: &'a S,
    relations: &'a [(String, Relation<S>)],
    handle: &'a mut EntityHandle,
) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
    Box::pin(async move {
        for (name, relation) in relations {
            if relation.is_many() {
                let query = ListQuery::new().filter(&relation.foreign_key, handle.id());
                let (rows, _) = storage.find_and_count(&relation.entity, &query).await?;
                let mut children = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut child = EntityHandle::persisted(&relation.entity, row);
                    resolve_relations(storage, &relation.nested, &mut child).await?;
                    children.push(child);
                }
                handle.set_many(name, children);
            } else {
                let Some(ref_id) = handle.row.text(&relation.foreign_key).map(String::from)
                else {
                    continue;
                };
                let Some(row) = storage.find(&relation.entity, &ref_id).await? else {
                    continue;
                };
                let mut child = EntityHandle::persisted(&relation.entity, row);
                resolve_relations(storage, &relation.nested, &mut child).await?;
                handle.set_one(name, child);
            }
        }
        Ok(())
    })
}

/// Children first, then the root, so a foreign-key violation or an orphaned
/// child is impossible.
async fn delete_tree<S: Storage>(
    def: &ResourceDef<S>,
    id: &str,
    ctx: &mut SaveContext<'_, S>,
) -> EngineResult<()> {
    if ctx.get(&def.entity, id).await?.is_none() {
        return Err(EngineError::not_found(&def.entity, id));
    }

    for (_, relation) in &def.relations {
        if relation.is_many() {
            delete_children(relation, id, ctx).await?;
        }
    }

    ctx.delete(&def.entity, id).await?;
    Ok(())
}

fn delete_children<'a, S: Storage>(
    relation: &'a Relation<S>,
    parent_id: &'a str,
    ctx: &'a mut SaveContext<'_, S>,
) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let children = ctx
            .find_children(&relation.entity, &relation.foreign_key, parent_id)
            .await?;
        for child in children {
            for (_, nested) in &relation.nested {
                if nested.is_many() {
                    delete_children(nested, &child.id, ctx).await?;
                }
            }
            ctx.delete(&relation.entity, &child.id).await?;
        }
        Ok(())
    })
}
