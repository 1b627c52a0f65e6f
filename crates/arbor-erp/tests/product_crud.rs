//! Product endpoint operations against the in-memory backend.

mod common;

use serde_json::json;

use arbor_core::types::object;
use arbor_core::EngineError;
use arbor_db::{Engine, ListQuery, MemoryStorage};
use arbor_erp::product;
use common::seed;

async fn engine_with_type() -> (Engine<MemoryStorage>, String) {
    common::init_tracing();
    let engine = Engine::new(MemoryStorage::new());
    let type_id = seed(engine.storage(), "product_type", json!({ "name": "Drinks" })).await;
    (engine, type_id)
}

fn product_payload(type_id: &str, name: &str) -> arbor_core::FieldMap {
    object(json!({
        "name": name,
        "stock": 10,
        "min_stock": 2,
        "unit_price": 3.5,
        "purchase_price": 2.0,
        "unit": "can",
        "fk_type": type_id
    }))
}

#[tokio::test]
async fn create_update_info_roundtrip() {
    let (engine, type_id) = engine_with_type().await;
    let def = product();

    let created = engine
        .save(&def, product_payload(&type_id, "Cola 330ml"))
        .await
        .unwrap();
    assert_eq!(created.row.int("stock"), Some(10));
    assert_eq!(created.one("fk_type").unwrap().id(), type_id);

    // Partial update: only the stock changes
    let updated = engine
        .save(&def, object(json!({ "id": created.id(), "stock": 4 })))
        .await
        .unwrap();
    assert_eq!(updated.row.int("stock"), Some(4));
    assert_eq!(updated.row.text("name"), Some("Cola 330ml"));

    let loaded = engine.info(&def, created.id()).await.unwrap();
    assert_eq!(loaded.row, updated.row);
    assert_eq!(loaded.one("fk_type").unwrap().row.text("name"), Some("Drinks"));
}

#[tokio::test]
async fn create_requires_every_named_field() {
    let (engine, type_id) = engine_with_type().await;
    let def = product();

    let mut payload = product_payload(&type_id, "Cola 330ml");
    payload.remove("purchase_price");

    let err = engine.save(&def, payload).await.unwrap_err();
    match err {
        EngineError::Validation(err) => assert_eq!(err.field(), "purchase_price"),
        other => panic!("expected a validation error, got {other}"),
    }
}

#[tokio::test]
async fn unknown_product_type_is_not_found() {
    let (engine, _) = engine_with_type().await;
    let def = product();

    let err = engine
        .save(
            &def,
            product_payload("550e8400-e29b-41d4-a716-446655440000", "Cola 330ml"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn list_merges_filters_with_the_mandatory_include() {
    let (engine, type_id) = engine_with_type().await;
    let def = product();

    for name in ["Cola 330ml", "Cola 500ml", "Water 500ml"] {
        let mut payload = product_payload(&type_id, name);
        if name.starts_with("Water") {
            payload.insert("unit".to_string(), json!("bottle"));
        }
        engine.save(&def, payload).await.unwrap();
    }

    let (rows, count) = engine
        .list(&def, ListQuery::new().filter("unit", "can"))
        .await
        .unwrap();
    assert_eq!(count, 2);
    // caller filters never remove the configured include
    assert!(rows
        .iter()
        .all(|row| row.one("fk_type").map(|t| t.id().to_string()) == Some(type_id.clone())));
}

#[tokio::test]
async fn delete_is_direct_for_resources_without_children() {
    let (engine, type_id) = engine_with_type().await;
    let def = product();

    let created = engine
        .save(&def, product_payload(&type_id, "Cola 330ml"))
        .await
        .unwrap();

    engine.delete(&def, created.id()).await.unwrap();
    let err = engine.info(&def, created.id()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));

    let err = engine.delete(&def, created.id()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}
