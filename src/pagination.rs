//! Pagination cursors.
//!
//! `LastEvaluatedKey` is the attribute-value map of the last row returned:
//! the table's primary key, plus the index keys for GSI reads. The same map
//! comes back as `ExclusiveStartKey` on the next call; decoding validates
//! its shape and value types against the target table or index before the
//! read path turns it into SQL predicates.

use crate::error::{PdbError, Result};
use crate::types::attribute::{item_to_string, AttributeValue, Item};
use crate::types::schema::{GsiSchema, TableSchema};

/// A validated `ExclusiveStartKey`, decomposed for the read path.
#[derive(Debug, Clone)]
pub struct StartCursor {
    /// The base primary key as an item.
    pub base_key: Item,
    /// Canonical serialized base key; row identity and scan order.
    pub base_key_json: String,
    /// Range-key value of the read target (table or index), when the
    /// target has one.
    pub range_value: Option<AttributeValue>,
}

/// Validate an `ExclusiveStartKey` against the table (and index, for GSI
/// reads) it will resume.
pub fn decode_start_key(
    schema: &TableSchema,
    index: Option<&GsiSchema>,
    start: &Item,
) -> Result<StartCursor> {
    let base = schema.extract_key(start)?;
    let base_key = schema.key_item(&base);
    let base_key_json = item_to_string(&base_key);

    let range_value = match index {
        Some(gsi) => match &gsi.key.range {
            Some(attr) => {
                let value = start.get(&attr.name).ok_or_else(|| {
                    PdbError::validation(format!(
                        "exclusive start key is missing index range key {}",
                        attr.name
                    ))
                })?;
                if !attr.key_type.matches(value) {
                    return Err(PdbError::validation(format!(
                        "exclusive start key value for {} must be of type {}",
                        attr.name,
                        attr.key_type.name()
                    )));
                }
                Some(value.clone())
            }
            None => None,
        },
        None => base.range,
    };

    Ok(StartCursor {
        base_key,
        base_key_json,
        range_value,
    })
}

/// `LastEvaluatedKey` for a base-table read: the item's primary key.
pub fn last_key_for_table(schema: &TableSchema, item: &Item) -> Result<Item> {
    Ok(schema.key_item(&schema.extract_key(item)?))
}

/// `LastEvaluatedKey` for a GSI read: the base primary key plus the index
/// key attributes carried by the projected item.
pub fn last_key_for_index(gsi: &GsiSchema, base_key: Item, projected: &Item) -> Item {
    let mut key = base_key;
    for name in gsi.key.attribute_names() {
        if let Some(value) = projected.get(name) {
            key.insert(name.to_string(), value.clone());
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::{
        KeyAttribute, KeySchema, KeyType, ProjectionType,
    };

    fn schema() -> TableSchema {
        TableSchema {
            table_name: "t".into(),
            key: KeySchema {
                hash: KeyAttribute {
                    name: "id".into(),
                    key_type: KeyType::S,
                },
                range: Some(KeyAttribute {
                    name: "seq".into(),
                    key_type: KeyType::N,
                }),
            },
            gsis: vec![GsiSchema {
                index_name: "ByStatus".into(),
                key: KeySchema {
                    hash: KeyAttribute {
                        name: "status".into(),
                        key_type: KeyType::S,
                    },
                    range: Some(KeyAttribute {
                        name: "rank".into(),
                        key_type: KeyType::N,
                    }),
                },
                projection: ProjectionType::All,
                non_key_attributes: vec![],
            }],
            ttl: None,
            stream_view: None,
            stream_id: None,
            created_at: 0,
        }
    }

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_table_cursor_roundtrip() {
        let schema = schema();
        let stored = item(&[
            ("id", AttributeValue::S("a".into())),
            ("seq", AttributeValue::N("7".into())),
            ("extra", AttributeValue::Bool(true)),
        ]);
        let last = last_key_for_table(&schema, &stored).unwrap();
        assert_eq!(last.len(), 2);

        let cursor = decode_start_key(&schema, None, &last).unwrap();
        assert_eq!(cursor.range_value, Some(AttributeValue::N("7".into())));
        assert_eq!(cursor.base_key, last);
    }

    #[test]
    fn test_index_cursor_carries_both_key_sets() {
        let schema = schema();
        let projected = item(&[
            ("id", AttributeValue::S("a".into())),
            ("seq", AttributeValue::N("7".into())),
            ("status", AttributeValue::S("open".into())),
            ("rank", AttributeValue::N("3".into())),
        ]);
        let base = last_key_for_table(&schema, &projected).unwrap();
        let last = last_key_for_index(&schema.gsis[0], base, &projected);
        assert_eq!(last.len(), 4);

        let cursor = decode_start_key(&schema, Some(&schema.gsis[0]), &last).unwrap();
        assert_eq!(cursor.range_value, Some(AttributeValue::N("3".into())));
    }

    #[test]
    fn test_decode_rejects_missing_or_mistyped_parts() {
        let schema = schema();
        // Missing range key.
        let bad = item(&[("id", AttributeValue::S("a".into()))]);
        assert!(decode_start_key(&schema, None, &bad).is_err());

        // Wrong type for the range key.
        let bad = item(&[
            ("id", AttributeValue::S("a".into())),
            ("seq", AttributeValue::S("not-a-number".into())),
        ]);
        assert!(decode_start_key(&schema, None, &bad).is_err());

        // Index read missing the index range key.
        let bad = item(&[
            ("id", AttributeValue::S("a".into())),
            ("seq", AttributeValue::N("7".into())),
            ("status", AttributeValue::S("open".into())),
        ]);
        assert!(decode_start_key(&schema, Some(&schema.gsis[0]), &bad).is_err());
    }
}
