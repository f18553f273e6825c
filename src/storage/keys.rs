//! Typed key column encoding.
//!
//! Key attribute values project into one of three typed SQL columns so the
//! backend can order and range-scan natively: `S` into text, `N` into a
//! numeric column, `B` hex-encoded into text (hex preserves bytewise order
//! under text collation; base64 does not).

use bigdecimal::BigDecimal;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{PdbError, Result};
use crate::types::attribute::{item_to_string, AttributeValue, Item};
use crate::types::schema::{PrimaryKey, TableSchema};

/// One key value spread over the typed columns; exactly one field is set.
#[derive(Debug, Clone, Default)]
pub struct KeyColumns {
    pub s: Option<String>,
    pub n: Option<BigDecimal>,
    pub b: Option<String>,
}

impl KeyColumns {
    pub fn from_value(value: &AttributeValue) -> Result<Self> {
        match value {
            AttributeValue::S(text) => Ok(Self {
                s: Some(text.clone()),
                ..Self::default()
            }),
            AttributeValue::N(text) => {
                let n = text.parse::<BigDecimal>().map_err(|_| {
                    PdbError::validation(format!("key value is not a valid number: {text}"))
                })?;
                Ok(Self {
                    n: Some(n),
                    ..Self::default()
                })
            }
            AttributeValue::B(bytes) => Ok(Self {
                b: Some(hex::encode(bytes)),
                ..Self::default()
            }),
            other => Err(PdbError::validation(format!(
                "key values must be S, N, or B, got {}",
                other.type_name()
            ))),
        }
    }

    /// All-null columns, for absent range keys.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Canonical serialized form of a primary key, used as row identity.
pub fn key_json(schema: &TableSchema, key: &PrimaryKey) -> String {
    item_to_string(&schema.key_item(key))
}

/// Canonical serialized form of a bare key item.
pub fn key_item_json(key_item: &Item) -> String {
    item_to_string(key_item)
}

/// Stable non-negative hash of a key, used to partition segmented scans.
pub fn segment_hash(key_json: &str) -> i64 {
    (xxh3_64(key_json.as_bytes()) & 0x7fff_ffff_ffff_ffff) as i64
}

/// Epoch seconds carried by a TTL attribute, when it is an `N` value that
/// fits. Anything else is ignored by the sweeper.
pub fn ttl_epoch_of(value: Option<&AttributeValue>) -> Option<i64> {
    use bigdecimal::ToPrimitive;
    value?.decimal()?.to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::{KeyAttribute, KeySchema, KeyType};

    fn schema() -> TableSchema {
        TableSchema {
            table_name: "t".into(),
            key: KeySchema {
                hash: KeyAttribute {
                    name: "id".into(),
                    key_type: KeyType::S,
                },
                range: None,
            },
            gsis: vec![],
            ttl: None,
            stream_view: None,
            stream_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_key_columns_per_type() {
        let cols = KeyColumns::from_value(&AttributeValue::S("a".into())).unwrap();
        assert_eq!(cols.s.as_deref(), Some("a"));
        assert!(cols.n.is_none() && cols.b.is_none());

        let cols = KeyColumns::from_value(&AttributeValue::N("1.5".into())).unwrap();
        assert!(cols.n.is_some());

        let cols = KeyColumns::from_value(&AttributeValue::B(vec![0xde, 0xad])).unwrap();
        assert_eq!(cols.b.as_deref(), Some("dead"));

        assert!(KeyColumns::from_value(&AttributeValue::Bool(true)).is_err());
    }

    #[test]
    fn test_hex_encoding_preserves_byte_order() {
        let a = hex::encode([0x01, 0xff]);
        let b = hex::encode([0x02, 0x00]);
        assert!(a < b);
    }

    #[test]
    fn test_key_json_is_deterministic() {
        let schema = schema();
        let key = PrimaryKey {
            hash: AttributeValue::S("a".into()),
            range: None,
        };
        assert_eq!(key_json(&schema, &key), key_json(&schema, &key));
        assert_eq!(key_json(&schema, &key), r#"{"id":{"S":"a"}}"#);
    }

    #[test]
    fn test_segment_hash_is_stable_and_non_negative() {
        let h1 = segment_hash(r#"{"id":{"S":"a"}}"#);
        let h2 = segment_hash(r#"{"id":{"S":"a"}}"#);
        assert_eq!(h1, h2);
        assert!(h1 >= 0);
        assert_ne!(h1, segment_hash(r#"{"id":{"S":"b"}}"#));
    }
}
