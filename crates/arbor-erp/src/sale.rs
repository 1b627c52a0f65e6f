//! # Sale Order Resource
//!
//! The sale order owns its line items and references a locked consumer; each
//! item references a locked product. Selling moves stock inside the order's
//! transaction, so two concurrent sales of the same product serialize on the
//! product row and the counter can never be driven negative.
//!
//! ## Save Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  save(sale_order, payload)                                              │
//! │       │                                                                 │
//! │       ├── lock consumer row                                             │
//! │       ├── per item:                                                     │
//! │       │     lock product row                                            │
//! │       │     on_validate: snapshot purchase_price, move stock,           │
//! │       │                  veto when it would go negative                 │
//! │       │     write item row                                              │
//! │       │     on_persist: save the product's adjusted stock               │
//! │       ├── on_save:   price = Σ count × price, rounded to cents          │
//! │       └── on_create: credit the consumer's loyalty score                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use arbor_core::{money, EngineError, EngineResult, FieldMap, FieldRule, Schema};
use arbor_db::{EntityHandle, ItemHooks, Relation, ResourceDef, RootHooks, SaveContext, Storage};

// =============================================================================
// Item Hooks
// =============================================================================

/// Stock movement and price snapshotting for sale order items.
struct SaleItemHooks;

#[async_trait]
impl<S: Storage> ItemHooks<S> for SaleItemHooks {
    async fn on_validate(
        &self,
        fields: &mut FieldMap,
        item: &mut EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        let Some(product) = item.one("product") else {
            return Ok(());
        };

        // Snapshot the purchase price at sale time; later catalog changes
        // must not rewrite sale history
        if let Some(purchase_price) = product.row.get("purchase_price").cloned() {
            fields.insert("purchase_price".to_string(), purchase_price);
        }

        let stock = product.row.int("stock").unwrap_or(0);
        let product_name = product.row.text("name").unwrap_or(product.id()).to_string();

        let new_count = fields.get("count").and_then(Value::as_i64);
        let old_count = item.row.int("count");

        // New items take their full count out of stock; updated items move
        // only the difference
        let next_stock = if item.is_new {
            new_count.map(|count| stock - count)
        } else {
            match (new_count, old_count) {
                (Some(new), Some(old)) if new != old => Some(stock - (new - old)),
                _ => None,
            }
        };

        if let Some(next_stock) = next_stock {
            if next_stock < 0 {
                return Err(EngineError::domain(format!(
                    "insufficient stock for product [{product_name}]"
                )));
            }
            if let Some(product) = item.one_mut("product") {
                debug!(product = %product.id(), stock = next_stock, "stock adjusted");
                product.row.set("stock", next_stock);
            }
        }

        Ok(())
    }

    async fn on_persist(
        &self,
        item: &EntityHandle,
        ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        // Persist the locked product's adjusted stock inside the same
        // transaction
        let Some(product) = item.one("product") else {
            return Ok(());
        };
        let fields = product.row.fields.clone();
        ctx.update("product", product.id(), &fields).await?;
        Ok(())
    }
}

// =============================================================================
// Root Hooks
// =============================================================================

/// Order total aggregation and consumer loyalty crediting.
struct SaleOrderHooks;

#[async_trait]
impl<S: Storage> RootHooks<S> for SaleOrderHooks {
    async fn on_save(
        &self,
        root: &mut EntityHandle,
        _ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        let total: f64 = root
            .many("items")
            .iter()
            .map(|item| {
                item.row.int("count").unwrap_or(0) as f64 * item.row.num("price").unwrap_or(0.0)
            })
            .sum();
        root.row.set("price", money::round_to_cents(total));
        Ok(())
    }

    async fn on_create(
        &self,
        root: &mut EntityHandle,
        ctx: &mut SaveContext<'_, S>,
    ) -> EngineResult<()> {
        let Some(consumer) = root.one("consumer") else {
            return Ok(());
        };

        if consumer.row.flag("disable_score") {
            // Scoring suppressed for this consumer; the order records none
            root.row.set("score", 0);
        } else {
            let credited =
                consumer.row.num("score").unwrap_or(0.0) + root.row.num("score").unwrap_or(0.0);
            let consumer_id = consumer.id().to_string();
            debug!(consumer = %consumer_id, score = credited, "crediting loyalty score");
            let mut fields = FieldMap::new();
            fields.insert("score".to_string(), Value::from(credited));
            ctx.update("consumer", &consumer_id, &fields).await?;
        }

        Ok(())
    }
}

// =============================================================================
// Resource Definition
// =============================================================================

/// The sale order endpoint definition.
pub fn sale_order<S: Storage>() -> ResourceDef<S> {
    ResourceDef::new(
        "sale_order",
        Schema::new()
            .field("discount", FieldRule::number().min(6.0).max(10.0))
            .field("discount_price", FieldRule::number().min(0.0))
            .field("discount_comment", FieldRule::string())
            .field("pay", FieldRule::number().min(0.0))
            .field("score", FieldRule::number())
            .field("pay_type", FieldRule::string())
            .field("comment", FieldRule::string())
            .field("consumer", FieldRule::uuid())
            .field("items", FieldRule::array().min_items(1))
            .create_requires("discount,discount_price,pay,score,pay_type,consumer,items"),
    )
    .relation("consumer", Relation::one("consumer", "fk_consumer").locked())
    .relation(
        "items",
        Relation::many("sale_order_item", "fk_order")
            .cascade()
            .item_schema(
                Schema::new()
                    .field("count", FieldRule::integer().min(1.0).required())
                    .field("price", FieldRule::number().min(0.0).required())
                    .field("product", FieldRule::uuid().required()),
            )
            .nested("product", Relation::one("product", "fk_product").locked())
            .hooks(SaleItemHooks),
    )
    .hooks(SaleOrderHooks)
    .list_include("consumer")
    .build()
}
