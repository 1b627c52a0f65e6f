#![allow(dead_code)]

//! Shared fixtures for the integration suites.

use serde_json::{json, Value};
use uuid::Uuid;

use arbor_core::types::{object, FieldMap, Row};
use arbor_db::{Engine, MemoryStorage, Storage};

/// Inserts a committed row directly through the storage collaborator,
/// bypassing the engine (for entities without endpoints, e.g. consumers).
pub async fn seed<S: Storage>(storage: &S, entity: &str, fields: Value) -> String {
    let id = Uuid::new_v4().to_string();
    let mut tx = storage.begin().await.expect("begin");
    storage
        .insert(&mut tx, entity, Row::new(id.clone(), object(fields)))
        .await
        .expect("insert");
    storage.commit(tx).await.expect("commit");
    id
}

pub struct Fixture {
    pub engine: Engine<MemoryStorage>,
    pub consumer: String,
    pub product: String,
    pub product_type: String,
}

/// An engine over fresh in-memory storage with one consumer and one product
/// carrying the given stock.
pub async fn fixture_with_stock(stock: i64) -> Fixture {
    init_tracing();
    let engine = Engine::new(MemoryStorage::new());

    let product_type = seed(engine.storage(), "product_type", json!({ "name": "Drinks" })).await;
    let consumer = seed(
        engine.storage(),
        "consumer",
        json!({ "name": "Ada", "score": 0.0 }),
    )
    .await;
    let product = seed(
        engine.storage(),
        "product",
        json!({
            "name": "Widget",
            "stock": stock,
            "min_stock": 0,
            "unit_price": 10.0,
            "purchase_price": 7.5,
            "fk_type": product_type
        }),
    )
    .await;

    Fixture {
        engine,
        consumer,
        product,
        product_type,
    }
}

/// A valid create payload for a sale order with the given items array.
pub fn order_payload(consumer: &str, items: Value) -> FieldMap {
    object(json!({
        "discount": 10,
        "discount_price": 0.0,
        "pay": 0.0,
        "score": 5.0,
        "pay_type": "cash",
        "consumer": consumer,
        "items": items
    }))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
