//! Global secondary index upkeep and projections.

mod common;

use common::*;
use pretenderdb::api::{QueryRequest, UpdateItemRequest};
use pretenderdb::types::ProjectionType;

fn gsi_query(table: &str, status: &str) -> QueryRequest {
    QueryRequest {
        table_name: table.to_string(),
        index_name: Some("StatusIdx".to_string()),
        key_condition_expression: "#st = :s".to_string(),
        filter_expression: None,
        projection_expression: None,
        expression_attribute_names: Some(names(&[("#st", "status")])),
        expression_attribute_values: Some(values(&[(":s", s(status))])),
        scan_index_forward: None,
        limit: None,
        exclusive_start_key: None,
        consistent_read: None,
    }
}

#[tokio::test]
async fn gsi_follows_attribute_changes() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::All, None).await;
    put(
        &db,
        "Orders",
        item(&[("id", s("a")), ("status", s("pending")), ("v", n("1"))]),
    )
    .await;

    let output = db.query(gsi_query("Orders", "pending")).await.unwrap();
    assert_eq!(output.count, 1);

    db.update_item(UpdateItemRequest {
        table_name: "Orders".into(),
        key: item(&[("id", s("a"))]),
        update_expression: "SET #st = :active".into(),
        condition_expression: None,
        expression_attribute_names: Some(names(&[("#st", "status")])),
        expression_attribute_values: Some(values(&[(":active", s("active"))])),
        return_values: None,
    })
    .await
    .unwrap();

    let output = db.query(gsi_query("Orders", "pending")).await.unwrap();
    assert_eq!(output.count, 0);
    let output = db.query(gsi_query("Orders", "active")).await.unwrap();
    assert_eq!(output.count, 1);
    assert_eq!(output.items[0].get("v"), Some(&n("1")));
}

#[tokio::test]
async fn keys_only_projection_strips_non_key_attributes() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::KeysOnly, None).await;
    put(
        &db,
        "Orders",
        item(&[("id", s("a")), ("status", s("x")), ("name", s("n"))]),
    )
    .await;

    let output = db.query(gsi_query("Orders", "x")).await.unwrap();
    assert_eq!(output.count, 1);
    let projected = &output.items[0];
    assert_eq!(projected.len(), 2);
    assert_eq!(projected.get("id"), Some(&s("a")));
    assert_eq!(projected.get("status"), Some(&s("x")));
}

#[tokio::test]
async fn include_projection_carries_named_attributes() {
    let db = db().await;
    create_gsi_table(
        &db,
        "Orders",
        ProjectionType::Include,
        Some(vec!["qty".to_string()]),
    )
    .await;
    put(
        &db,
        "Orders",
        item(&[
            ("id", s("a")),
            ("status", s("x")),
            ("qty", n("5")),
            ("name", s("dropped")),
        ]),
    )
    .await;

    let output = db.query(gsi_query("Orders", "x")).await.unwrap();
    let projected = &output.items[0];
    assert_eq!(projected.len(), 3);
    assert_eq!(projected.get("qty"), Some(&n("5")));
    assert!(!projected.contains_key("name"));
}

#[tokio::test]
async fn items_without_gsi_keys_are_not_indexed() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::All, None).await;
    put(&db, "Orders", item(&[("id", s("keyless")), ("v", n("1"))])).await;
    put(
        &db,
        "Orders",
        item(&[("id", s("keyed")), ("status", s("x"))]),
    )
    .await;

    let output = db.query(gsi_query("Orders", "x")).await.unwrap();
    assert_eq!(output.count, 1);
    assert_eq!(output.items[0].get("id"), Some(&s("keyed")));
}

#[tokio::test]
async fn removing_the_gsi_key_attribute_drops_the_projection() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::All, None).await;
    put(
        &db,
        "Orders",
        item(&[("id", s("a")), ("status", s("x"))]),
    )
    .await;

    db.update_item(UpdateItemRequest {
        table_name: "Orders".into(),
        key: item(&[("id", s("a"))]),
        update_expression: "REMOVE #st".into(),
        condition_expression: None,
        expression_attribute_names: Some(names(&[("#st", "status")])),
        expression_attribute_values: None,
        return_values: None,
    })
    .await
    .unwrap();

    let output = db.query(gsi_query("Orders", "x")).await.unwrap();
    assert_eq!(output.count, 0);
    // Base item still present.
    assert!(get(&db, "Orders", item(&[("id", s("a"))])).await.is_some());
}

#[tokio::test]
async fn deleting_the_item_drops_its_projection() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::All, None).await;
    put(&db, "Orders", item(&[("id", s("a")), ("status", s("x"))])).await;

    db.delete_item(pretenderdb::api::DeleteItemRequest {
        table_name: "Orders".into(),
        key: item(&[("id", s("a"))]),
        condition_expression: None,
        expression_attribute_names: None,
        expression_attribute_values: None,
        return_values: None,
    })
    .await
    .unwrap();

    let output = db.query(gsi_query("Orders", "x")).await.unwrap();
    assert_eq!(output.count, 0);
}

#[tokio::test]
async fn querying_a_missing_index_is_resource_not_found() {
    let db = db().await;
    create_gsi_table(&db, "Orders", ProjectionType::All, None).await;
    let mut req = gsi_query("Orders", "x");
    req.index_name = Some("NoSuchIdx".into());
    assert_eq!(db.query(req).await.unwrap_err().code(), "ResourceNotFound");
}
