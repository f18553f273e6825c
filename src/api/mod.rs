//! Request/response shapes mirroring the DynamoDB JSON protocol.
//!
//! Field names serialize in PascalCase like the wire protocol, so these
//! structs round-trip the JSON a DynamoDB client would send. The facade
//! exposes the same operations as local method calls over these shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PdbError, Result};
use crate::streams::ShardIteratorType;
use crate::types::{
    AttributeValue, GsiSchema, Item, KeyAttribute, KeySchema, KeyType, ProjectionType,
    ReturnValues, StreamViewType, TableSchema, TtlSettings,
};

/// Attribute name/type hint from `AttributeDefinitions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: KeyType,
}

/// HASH or RANGE role of one key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyRole {
    Hash,
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectionSpec {
    pub projection_type: ProjectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_key_attributes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalSecondaryIndexSpec {
    pub index_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub projection: ProjectionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamSpecification {
    pub stream_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<StreamViewType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTableRequest {
    pub table_name: String,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_secondary_indexes: Option<Vec<GlobalSecondaryIndexSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_specification: Option<StreamSpecification>,
}

/// DescribeTable / CreateTable output view of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    pub table_name: String,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_secondary_indexes: Option<Vec<GlobalSecondaryIndexSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_specification: Option<StreamSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_stream_id: Option<String>,
    pub creation_date_time_millis: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListTablesRequest {
    pub exclusive_start_table_name: Option<String>,
    pub limit: Option<u32>,
    /// Name-prefix filter (extension; plain DynamoDB lists everything).
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTablesOutput {
    pub table_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateTableRequest {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_specification: Option<StreamSpecification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeToLiveSpecification {
    pub enabled: bool,
    pub attribute_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateTimeToLiveRequest {
    pub table_name: String,
    pub time_to_live_specification: TimeToLiveSpecification,
}

// ---- item operations ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemRequest {
    pub table_name: String,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_values: Option<ReturnValues>,
}

/// Output of the mutating item operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemRequest {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateItemRequest {
    pub table_name: String,
    pub key: Item,
    pub update_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_values: Option<ReturnValues>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemRequest {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_values: Option<ReturnValues>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryRequest {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_index_forward: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub scanned_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanRequest {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

// ---- batch operations ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    pub keys: Vec<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemRequest {
    pub request_items: HashMap<String, KeysAndAttributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    pub responses: HashMap<String, Vec<Item>>,
    pub unprocessed_keys: HashMap<String, KeysAndAttributes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    pub item: Item,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    pub key: Item,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WriteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemRequest {
    pub request_items: HashMap<String, Vec<WriteRequest>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemOutput {
    pub unprocessed_items: HashMap<String, Vec<WriteRequest>>,
}

// ---- transactions ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactPut {
    pub table_name: String,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactUpdate {
    pub table_name: String,
    pub key: Item,
    pub update_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactDelete {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactConditionCheck {
    pub table_name: String,
    pub key: Item,
    pub condition_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<HashMap<String, AttributeValue>>,
}

/// Exactly one of the four entries must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TransactWriteItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<TransactPut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<TransactUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<TransactDelete>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_check: Option<TransactConditionCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemsRequest {
    pub transact_items: Vec<TransactWriteItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGet {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItem {
    pub get: TransactGet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItemsRequest {
    pub transact_items: Vec<TransactGetItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactGetItemsOutput {
    pub responses: Vec<ItemResponse>,
}

// ---- streams ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListStreamsRequest {
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetShardIteratorRequest {
    pub stream_id: String,
    pub shard_id: String,
    pub shard_iterator_type: ShardIteratorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetRecordsRequest {
    pub shard_iterator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

// ---- conversions between wire shapes and the internal schema model ----

/// Resolve the HASH/RANGE elements against the attribute definitions.
pub fn build_key_schema(
    elements: &[KeySchemaElement],
    definitions: &[AttributeDefinition],
) -> Result<KeySchema> {
    let type_of = |name: &str| -> Result<KeyType> {
        definitions
            .iter()
            .find(|d| d.attribute_name == name)
            .map(|d| d.attribute_type)
            .ok_or_else(|| {
                PdbError::validation(format!(
                    "key attribute {name} is missing from the attribute definitions"
                ))
            })
    };

    let mut hash = None;
    let mut range = None;
    for element in elements {
        let attr = KeyAttribute {
            name: element.attribute_name.clone(),
            key_type: type_of(&element.attribute_name)?,
        };
        match element.key_type {
            KeyRole::Hash => {
                if hash.replace(attr).is_some() {
                    return Err(PdbError::validation("key schema has more than one HASH key"));
                }
            }
            KeyRole::Range => {
                if range.replace(attr).is_some() {
                    return Err(PdbError::validation(
                        "key schema has more than one RANGE key",
                    ));
                }
            }
        }
    }
    let hash =
        hash.ok_or_else(|| PdbError::validation("key schema must declare a HASH key"))?;
    Ok(KeySchema { hash, range })
}

/// Build the internal GSI model from its wire shape.
pub fn build_gsi(
    spec: &GlobalSecondaryIndexSpec,
    definitions: &[AttributeDefinition],
) -> Result<GsiSchema> {
    Ok(GsiSchema {
        index_name: spec.index_name.clone(),
        key: build_key_schema(&spec.key_schema, definitions)?,
        projection: spec.projection.projection_type,
        non_key_attributes: spec.projection.non_key_attributes.clone().unwrap_or_default(),
    })
}

fn key_schema_elements(key: &KeySchema) -> Vec<KeySchemaElement> {
    let mut elements = vec![KeySchemaElement {
        attribute_name: key.hash.name.clone(),
        key_type: KeyRole::Hash,
    }];
    if let Some(range) = &key.range {
        elements.push(KeySchemaElement {
            attribute_name: range.name.clone(),
            key_type: KeyRole::Range,
        });
    }
    elements
}

/// Render the internal schema back into the wire description.
pub fn describe(schema: &TableSchema) -> TableDescription {
    let mut definitions: Vec<AttributeDefinition> = Vec::new();
    let mut add_def = |attr: &KeyAttribute| {
        if !definitions
            .iter()
            .any(|d| d.attribute_name == attr.name)
        {
            definitions.push(AttributeDefinition {
                attribute_name: attr.name.clone(),
                attribute_type: attr.key_type,
            });
        }
    };
    add_def(&schema.key.hash);
    if let Some(range) = &schema.key.range {
        add_def(range);
    }
    for gsi in &schema.gsis {
        add_def(&gsi.key.hash);
        if let Some(range) = &gsi.key.range {
            add_def(range);
        }
    }

    TableDescription {
        table_name: schema.table_name.clone(),
        attribute_definitions: definitions,
        key_schema: key_schema_elements(&schema.key),
        global_secondary_indexes: if schema.gsis.is_empty() {
            None
        } else {
            Some(
                schema
                    .gsis
                    .iter()
                    .map(|gsi| GlobalSecondaryIndexSpec {
                        index_name: gsi.index_name.clone(),
                        key_schema: key_schema_elements(&gsi.key),
                        projection: ProjectionSpec {
                            projection_type: gsi.projection,
                            non_key_attributes: if gsi.non_key_attributes.is_empty() {
                                None
                            } else {
                                Some(gsi.non_key_attributes.clone())
                            },
                        },
                    })
                    .collect(),
            )
        },
        stream_specification: schema.stream_view.map(|view| StreamSpecification {
            stream_enabled: true,
            stream_view_type: Some(view),
        }),
        latest_stream_id: schema.stream_id.clone(),
        creation_date_time_millis: schema.created_at,
    }
}

impl From<&TimeToLiveSpecification> for TtlSettings {
    fn from(spec: &TimeToLiveSpecification) -> Self {
        TtlSettings {
            attribute_name: spec.attribute_name.clone(),
            enabled: spec.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<AttributeDefinition> {
        vec![
            AttributeDefinition {
                attribute_name: "id".into(),
                attribute_type: KeyType::S,
            },
            AttributeDefinition {
                attribute_name: "seq".into(),
                attribute_type: KeyType::N,
            },
        ]
    }

    #[test]
    fn test_build_key_schema() {
        let elements = vec![
            KeySchemaElement {
                attribute_name: "id".into(),
                key_type: KeyRole::Hash,
            },
            KeySchemaElement {
                attribute_name: "seq".into(),
                key_type: KeyRole::Range,
            },
        ];
        let key = build_key_schema(&elements, &defs()).unwrap();
        assert_eq!(key.hash.name, "id");
        assert_eq!(key.hash.key_type, KeyType::S);
        assert_eq!(key.range.as_ref().unwrap().key_type, KeyType::N);
    }

    #[test]
    fn test_build_key_schema_requires_definitions() {
        let elements = vec![KeySchemaElement {
            attribute_name: "ghost".into(),
            key_type: KeyRole::Hash,
        }];
        assert!(build_key_schema(&elements, &defs()).is_err());
    }

    #[test]
    fn test_build_key_schema_rejects_two_hash_keys() {
        let elements = vec![
            KeySchemaElement {
                attribute_name: "id".into(),
                key_type: KeyRole::Hash,
            },
            KeySchemaElement {
                attribute_name: "seq".into(),
                key_type: KeyRole::Hash,
            },
        ];
        assert!(build_key_schema(&elements, &defs()).is_err());
    }

    #[test]
    fn test_request_json_uses_pascal_case() {
        let request = PutItemRequest {
            table_name: "orders".into(),
            item: Item::new(),
            condition_expression: None,
            expression_attribute_names: None,
            expression_attribute_values: None,
            return_values: Some(ReturnValues::AllOld),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["TableName"], "orders");
        assert_eq!(json["ReturnValues"], "ALL_OLD");
        assert!(json.get("ConditionExpression").is_none());
    }
}
