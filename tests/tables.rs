//! Table lifecycle: create, describe, list, update, delete.

mod common;

use common::*;
use pretenderdb::api::{
    AttributeDefinition, CreateTableRequest, KeyRole, KeySchemaElement, ListTablesRequest,
    StreamSpecification, UpdateTableRequest,
};
use pretenderdb::types::{KeyType, StreamViewType};

fn simple_create(table: &str) -> CreateTableRequest {
    CreateTableRequest {
        table_name: table.to_string(),
        attribute_definitions: vec![AttributeDefinition {
            attribute_name: "id".into(),
            attribute_type: KeyType::S,
        }],
        key_schema: vec![KeySchemaElement {
            attribute_name: "id".into(),
            key_type: KeyRole::Hash,
        }],
        global_secondary_indexes: None,
        stream_specification: None,
    }
}

#[tokio::test]
async fn create_and_describe_roundtrip() {
    let db = db().await;
    let created = db.create_table(simple_create("Orders")).await.unwrap();
    assert_eq!(created.table_name, "Orders");
    assert!(created.latest_stream_id.is_none());

    let described = db.describe_table("Orders").await.unwrap();
    assert_eq!(described.key_schema, created.key_schema);
    assert_eq!(described.attribute_definitions, created.attribute_definitions);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let db = db().await;
    db.create_table(simple_create("Orders")).await.unwrap();
    let err = db.create_table(simple_create("Orders")).await.unwrap_err();
    assert_eq!(err.code(), "TableAlreadyExists");
}

#[tokio::test]
async fn list_tables_paginates_in_name_order() {
    let db = db().await;
    for name in ["cherry", "apple", "banana", "apricot"] {
        db.create_table(simple_create(name)).await.unwrap();
    }

    let page = db
        .list_tables(ListTablesRequest {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.table_names, vec!["apple", "apricot"]);
    let start = page.last_evaluated_table_name.unwrap();

    let page = db
        .list_tables(ListTablesRequest {
            limit: Some(10),
            exclusive_start_table_name: Some(start),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.table_names, vec!["banana", "cherry"]);
    assert!(page.last_evaluated_table_name.is_none());

    let prefixed = db
        .list_tables(ListTablesRequest {
            prefix: Some("ap".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(prefixed.table_names, vec!["apple", "apricot"]);
}

#[tokio::test]
async fn delete_table_removes_items_and_streams() {
    let db = db().await;
    create_stream_table(&db, "Gone", StreamViewType::KeysOnly).await;
    put(&db, "Gone", item(&[("id", s("a"))])).await;
    let stream_id = db
        .describe_table("Gone")
        .await
        .unwrap()
        .latest_stream_id
        .unwrap();

    db.delete_table("Gone").await.unwrap();

    assert_eq!(
        db.describe_table("Gone").await.unwrap_err().code(),
        "ResourceNotFound"
    );
    assert_eq!(
        db.describe_stream(&stream_id).await.unwrap_err().code(),
        "ResourceNotFound"
    );

    // Recreating finds no leftover rows.
    create_stream_table(&db, "Gone", StreamViewType::KeysOnly).await;
    assert!(get(&db, "Gone", item(&[("id", s("a"))])).await.is_none());
}

#[tokio::test]
async fn delete_missing_table_is_resource_not_found() {
    let db = db().await;
    let err = db.delete_table("Nope").await.unwrap_err();
    assert_eq!(err.code(), "ResourceNotFound");
}

#[tokio::test]
async fn update_table_enables_and_disables_streams() {
    let db = db().await;
    db.create_table(simple_create("Orders")).await.unwrap();

    let described = db
        .update_table(UpdateTableRequest {
            table_name: "Orders".into(),
            stream_specification: Some(StreamSpecification {
                stream_enabled: true,
                stream_view_type: Some(StreamViewType::NewImage),
            }),
        })
        .await
        .unwrap();
    let stream_id = described.latest_stream_id.clone().unwrap();

    put(&db, "Orders", item(&[("id", s("a"))])).await;
    let description = db.describe_stream(&stream_id).await.unwrap();
    assert_eq!(description.table_name, "Orders");

    // Disabling stops capture; retained records stay readable.
    db.update_table(UpdateTableRequest {
        table_name: "Orders".into(),
        stream_specification: Some(StreamSpecification {
            stream_enabled: false,
            stream_view_type: None,
        }),
    })
    .await
    .unwrap();
    put(&db, "Orders", item(&[("id", s("b"))])).await;

    let description = db.describe_stream(&stream_id).await.unwrap();
    assert_eq!(
        description.shards[0].starting_sequence_number,
        description.shards[0].ending_sequence_number
    );
}

#[tokio::test]
async fn create_with_enabled_stream_requires_a_view_type() {
    let db = db().await;
    let mut request = simple_create("Orders");
    request.stream_specification = Some(StreamSpecification {
        stream_enabled: true,
        stream_view_type: None,
    });
    let err = db.create_table(request).await.unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}

#[tokio::test]
async fn data_survives_reopening_a_file_backed_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pretender.db");
    let mut config = pretenderdb::Config::in_memory();
    config.database.url = format!("sqlite://{}", path.display());

    let db = pretenderdb::PretenderDb::builder(config.clone())
        .build()
        .await
        .unwrap();
    db.create_table(simple_create("Durable")).await.unwrap();
    put(&db, "Durable", item(&[("id", s("kept")), ("v", n("1"))])).await;
    drop(db);

    let reopened = pretenderdb::PretenderDb::builder(config).build().await.unwrap();
    let fetched = get(&reopened, "Durable", item(&[("id", s("kept"))])).await;
    assert_eq!(fetched.unwrap().get("v"), Some(&n("1")));
}

#[tokio::test]
async fn key_schema_must_reference_defined_attributes() {
    let db = db().await;
    let mut request = simple_create("Orders");
    request.key_schema[0].attribute_name = "ghost".into();
    let err = db.create_table(request).await.unwrap_err();
    assert_eq!(err.code(), "ValidationError");
}
