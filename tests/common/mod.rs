//! Shared helpers for the integration tests: an in-memory embedded
//! instance plus attribute-value and table-shape builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use pretenderdb::api::{
    AttributeDefinition, CreateTableRequest, GetItemRequest, GlobalSecondaryIndexSpec, KeyRole,
    KeySchemaElement, ProjectionSpec, PutItemRequest, StreamSpecification,
};
use pretenderdb::types::{KeyType, ProjectionType, StreamViewType};
use pretenderdb::{AttributeValue, Config, FixedClock, Item, PretenderDb};

/// Fresh in-memory instance without background workers.
pub async fn db() -> PretenderDb {
    PretenderDb::builder(Config::in_memory())
        .build()
        .await
        .expect("build in-memory instance")
}

/// Fresh instance with a pinned clock.
pub async fn db_with_clock(clock: Arc<FixedClock>) -> PretenderDb {
    PretenderDb::builder(Config::in_memory())
        .with_clock(clock)
        .build()
        .await
        .expect("build in-memory instance")
}

pub fn s(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

pub fn n(value: &str) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn string_set(values: &[&str]) -> AttributeValue {
    AttributeValue::Ss(values.iter().map(|v| v.to_string()).collect())
}

pub fn item(pairs: &[(&str, AttributeValue)]) -> Item {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn values(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn hash_element(name: &str) -> KeySchemaElement {
    KeySchemaElement {
        attribute_name: name.to_string(),
        key_type: KeyRole::Hash,
    }
}

fn range_element(name: &str) -> KeySchemaElement {
    KeySchemaElement {
        attribute_name: name.to_string(),
        key_type: KeyRole::Range,
    }
}

fn definition(name: &str, key_type: KeyType) -> AttributeDefinition {
    AttributeDefinition {
        attribute_name: name.to_string(),
        attribute_type: key_type,
    }
}

/// Table with a single `id: S` hash key.
pub async fn create_hash_table(db: &PretenderDb, table: &str) {
    db.create_table(CreateTableRequest {
        table_name: table.to_string(),
        attribute_definitions: vec![definition("id", KeyType::S)],
        key_schema: vec![hash_element("id")],
        global_secondary_indexes: None,
        stream_specification: None,
    })
    .await
    .expect("create table");
}

/// Table with `id: S` hash and `seq: N` range.
pub async fn create_range_table(db: &PretenderDb, table: &str) {
    db.create_table(CreateTableRequest {
        table_name: table.to_string(),
        attribute_definitions: vec![definition("id", KeyType::S), definition("seq", KeyType::N)],
        key_schema: vec![hash_element("id"), range_element("seq")],
        global_secondary_indexes: None,
        stream_specification: None,
    })
    .await
    .expect("create table");
}

/// Hash table with a `StatusIdx` GSI on `status: S`.
pub async fn create_gsi_table(
    db: &PretenderDb,
    table: &str,
    projection: ProjectionType,
    non_key_attributes: Option<Vec<String>>,
) {
    db.create_table(CreateTableRequest {
        table_name: table.to_string(),
        attribute_definitions: vec![definition("id", KeyType::S), definition("status", KeyType::S)],
        key_schema: vec![hash_element("id")],
        global_secondary_indexes: Some(vec![GlobalSecondaryIndexSpec {
            index_name: "StatusIdx".to_string(),
            key_schema: vec![hash_element("status")],
            projection: ProjectionSpec {
                projection_type: projection,
                non_key_attributes,
            },
        }]),
        stream_specification: None,
    })
    .await
    .expect("create table");
}

/// Hash table with a stream.
pub async fn create_stream_table(db: &PretenderDb, table: &str, view: StreamViewType) {
    db.create_table(CreateTableRequest {
        table_name: table.to_string(),
        attribute_definitions: vec![definition("id", KeyType::S)],
        key_schema: vec![hash_element("id")],
        global_secondary_indexes: None,
        stream_specification: Some(StreamSpecification {
            stream_enabled: true,
            stream_view_type: Some(view),
        }),
    })
    .await
    .expect("create table");
}

pub async fn put(db: &PretenderDb, table: &str, item: Item) {
    db.put_item(PutItemRequest {
        table_name: table.to_string(),
        item,
        condition_expression: None,
        expression_attribute_names: None,
        expression_attribute_values: None,
        return_values: None,
    })
    .await
    .expect("put item");
}

pub async fn get(db: &PretenderDb, table: &str, key: Item) -> Option<Item> {
    db.get_item(GetItemRequest {
        table_name: table.to_string(),
        key,
        projection_expression: None,
        expression_attribute_names: None,
        consistent_read: None,
    })
    .await
    .expect("get item")
    .item
}
