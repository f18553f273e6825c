//! Core value and schema types.

pub mod attribute;
pub mod schema;

pub use attribute::{
    compare_scalars, item_from_json, item_from_string, item_size_bytes, item_to_json,
    item_to_string, validate_item, validate_number, AttributeValue, Item,
};
pub use schema::{
    GsiSchema, KeyAttribute, KeySchema, KeyType, PrimaryKey, ProjectionType, ReturnValues,
    StreamViewType, TableSchema, TtlSettings,
};
