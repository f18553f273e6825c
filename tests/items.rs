//! Item CRUD: puts, conditional writes, updates, deletes, return values.

mod common;

use common::*;
use pretenderdb::api::{DeleteItemRequest, GetItemRequest, PutItemRequest, UpdateItemRequest};
use pretenderdb::types::ReturnValues;
use pretenderdb::{AttributeValue, Item};

#[tokio::test]
async fn put_then_get_roundtrips_all_types() {
    let db = db().await;
    create_hash_table(&db, "Things").await;

    let mut nested = Item::new();
    nested.insert("inner".into(), n("1.50"));
    let stored = item(&[
        ("id", s("a")),
        ("qty", n("3.14")),
        ("blob", AttributeValue::B(vec![1, 2, 255])),
        ("ok", AttributeValue::Bool(true)),
        ("nothing", AttributeValue::Null),
        ("tags", string_set(&["x", "y"])),
        ("log", AttributeValue::L(vec![n("1"), s("two")])),
        ("meta", AttributeValue::M(nested)),
    ]);
    put(&db, "Things", stored.clone()).await;

    let fetched = get(&db, "Things", item(&[("id", s("a"))])).await.unwrap();
    assert_eq!(fetched, stored);
    // Number lexical form survives the round-trip.
    match fetched.get("qty") {
        Some(AttributeValue::N(text)) => assert_eq!(text, "3.14"),
        other => panic!("expected N, got {other:?}"),
    }
}

#[tokio::test]
async fn get_missing_item_is_empty_not_error() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    assert!(get(&db, "Things", item(&[("id", s("ghost"))])).await.is_none());
}

#[tokio::test]
async fn put_is_full_replacement() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(&db, "Things", item(&[("id", s("a")), ("old", s("attr"))])).await;
    put(&db, "Things", item(&[("id", s("a")), ("new", s("attr"))])).await;

    let fetched = get(&db, "Things", item(&[("id", s("a"))])).await.unwrap();
    assert!(fetched.contains_key("new"));
    assert!(!fetched.contains_key("old"));
}

#[tokio::test]
async fn conditional_put_fails_without_mutating() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(&db, "Things", item(&[("id", s("a")), ("v", n("1"))])).await;

    let err = db
        .put_item(PutItemRequest {
            table_name: "Things".into(),
            item: item(&[("id", s("a")), ("v", n("9"))]),
            condition_expression: Some("attribute_not_exists(id)".into()),
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ConditionalCheckFailed");

    let fetched = get(&db, "Things", item(&[("id", s("a"))])).await.unwrap();
    assert_eq!(fetched.get("v"), Some(&n("1")));
}

#[tokio::test]
async fn put_returns_all_old() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(&db, "Things", item(&[("id", s("a")), ("v", n("1"))])).await;

    let output = db
        .put_item(PutItemRequest {
            table_name: "Things".into(),
            item: item(&[("id", s("a")), ("v", n("2"))]),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: Some(ReturnValues::AllOld),
        })
        .await
        .unwrap();
    assert_eq!(
        output.attributes,
        Some(item(&[("id", s("a")), ("v", n("1"))]))
    );
}

#[tokio::test]
async fn update_add_remove_matches_dynamo_semantics() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(
        &db,
        "Things",
        item(&[
            ("id", s("x")),
            ("counter", n("10")),
            ("tags", string_set(&["a", "b"])),
            ("unused", s("gone soon")),
        ]),
    )
    .await;

    db.update_item(UpdateItemRequest {
        table_name: "Things".into(),
        key: item(&[("id", s("x"))]),
        update_expression: "ADD counter :five, tags :more REMOVE unused".into(),
        condition_expression: None,
        expression_attribute_names: None,
        expression_attribute_values: Some(values(&[
            (":five", n("5")),
            (":more", string_set(&["c"])),
        ])),
        return_values: None,
    })
    .await
    .unwrap();

    let fetched = get(&db, "Things", item(&[("id", s("x"))])).await.unwrap();
    assert_eq!(fetched.get("counter"), Some(&n("15")));
    assert_eq!(fetched.get("tags"), Some(&string_set(&["a", "b", "c"])));
    assert!(!fetched.contains_key("unused"));
}

#[tokio::test]
async fn update_missing_item_upserts() {
    let db = db().await;
    create_hash_table(&db, "Things").await;

    let output = db
        .update_item(UpdateItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("fresh"))]),
            update_expression: "SET v = :v".into(),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: Some(values(&[(":v", n("1"))])),
            return_values: Some(ReturnValues::AllNew),
        })
        .await
        .unwrap();
    assert_eq!(
        output.attributes,
        Some(item(&[("id", s("fresh")), ("v", n("1"))]))
    );
}

#[tokio::test]
async fn update_returns_only_changed_attributes() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(
        &db,
        "Things",
        item(&[("id", s("a")), ("v", n("1")), ("untouched", s("same"))]),
    )
    .await;

    let output = db
        .update_item(UpdateItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("a"))]),
            update_expression: "SET v = :v".into(),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: Some(values(&[(":v", n("2"))])),
            return_values: Some(ReturnValues::UpdatedNew),
        })
        .await
        .unwrap();
    assert_eq!(output.attributes, Some(item(&[("v", n("2"))])));
}

#[tokio::test]
async fn update_may_not_touch_key_attributes() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    let err = db
        .update_item(UpdateItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("a"))]),
            update_expression: "SET id = :v".into(),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: Some(values(&[(":v", s("b"))])),
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[tokio::test]
async fn delete_missing_item_succeeds_unless_condition_demands_existence() {
    let db = db().await;
    create_hash_table(&db, "Things").await;

    db.delete_item(DeleteItemRequest {
        table_name: "Things".into(),
        key: item(&[("id", s("ghost"))]),
        condition_expression: None,
        expression_attribute_names: None,
        expression_attribute_values: None,
        return_values: None,
    })
    .await
    .unwrap();

    let err = db
        .delete_item(DeleteItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("ghost"))]),
            condition_expression: Some("attribute_exists(id)".into()),
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ConditionalCheckFailed");
}

#[tokio::test]
async fn reserved_attribute_names_need_placeholders() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(&db, "Things", item(&[("id", s("a")), ("status", s("open"))])).await;

    let err = db
        .update_item(UpdateItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("a"))]),
            update_expression: "SET status = :v".into(),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: Some(values(&[(":v", s("closed"))])),
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");

    db.update_item(UpdateItemRequest {
        table_name: "Things".into(),
        key: item(&[("id", s("a"))]),
        update_expression: "SET #st = :v".into(),
        condition_expression: None,
        expression_attribute_names: Some(names(&[("#st", "status")])),
        expression_attribute_values: Some(values(&[(":v", s("closed"))])),
        return_values: None,
    })
    .await
    .unwrap();

    let fetched = get(&db, "Things", item(&[("id", s("a"))])).await.unwrap();
    assert_eq!(fetched.get("status"), Some(&s("closed")));
}

#[tokio::test]
async fn key_type_violations_are_rejected() {
    let db = db().await;
    create_hash_table(&db, "Things").await;

    let err = db
        .put_item(PutItemRequest {
            table_name: "Things".into(),
            item: item(&[("id", n("42"))]),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");

    let err = db
        .put_item(PutItemRequest {
            table_name: "Things".into(),
            item: item(&[("other", s("no key"))]),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[tokio::test]
async fn unknown_table_is_resource_not_found() {
    let db = db().await;
    let err = db
        .get_item(GetItemRequest {
            table_name: "Nope".into(),
            key: item(&[("id", s("a"))]),
            projection_expression: None,
            expression_attribute_names: None,
            consistent_read: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ResourceNotFound");
}

#[tokio::test]
async fn projection_expression_restricts_get() {
    let db = db().await;
    create_hash_table(&db, "Things").await;
    put(
        &db,
        "Things",
        item(&[("id", s("a")), ("keep", n("1")), ("drop", n("2"))]),
    )
    .await;

    let fetched = db
        .get_item(GetItemRequest {
            table_name: "Things".into(),
            key: item(&[("id", s("a"))]),
            projection_expression: Some("id, keep".into()),
            expression_attribute_names: None,
            consistent_read: None,
        })
        .await
        .unwrap()
        .item
        .unwrap();
    assert_eq!(fetched, item(&[("id", s("a")), ("keep", n("1"))]));
}
