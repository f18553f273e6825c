//! Table metadata: key schema, attribute type hints, secondary indexes,
//! TTL and stream settings.
//!
//! One `TableSchema` serializes to the `schema_json` column of the catalog
//! relation and is the unit the in-memory cache hands out.

use serde::{Deserialize, Serialize};

use crate::error::{PdbError, Result};
use crate::types::attribute::{AttributeValue, Item};

/// Declared scalar type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    S,
    N,
    B,
}

impl KeyType {
    pub fn matches(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (KeyType::S, AttributeValue::S(_))
                | (KeyType::N, AttributeValue::N(_))
                | (KeyType::B, AttributeValue::B(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyType::S => "S",
            KeyType::N => "N",
            KeyType::B => "B",
        }
    }
}

/// One key attribute: name plus declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub key_type: KeyType,
}

/// Hash key and optional range key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub hash: KeyAttribute,
    pub range: Option<KeyAttribute>,
}

impl KeySchema {
    /// Names of the key attributes.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = vec![self.hash.name.as_str()];
        if let Some(range) = &self.range {
            names.push(range.name.as_str());
        }
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hash.name == name
            || self.range.as_ref().is_some_and(|r| r.name == name)
    }
}

/// Which attributes a GSI stores alongside its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionType {
    All,
    KeysOnly,
    Include,
}

/// Global secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsiSchema {
    pub index_name: String,
    pub key: KeySchema,
    pub projection: ProjectionType,
    /// Projected non-key attributes for `INCLUDE`.
    #[serde(default)]
    pub non_key_attributes: Vec<String>,
}

/// Which images each stream record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamViewType {
    KeysOnly,
    NewImage,
    OldImage,
    NewAndOldImages,
}

impl StreamViewType {
    pub fn wants_old(&self) -> bool {
        matches!(self, StreamViewType::OldImage | StreamViewType::NewAndOldImages)
    }

    pub fn wants_new(&self) -> bool {
        matches!(self, StreamViewType::NewImage | StreamViewType::NewAndOldImages)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamViewType::KeysOnly => "KEYS_ONLY",
            StreamViewType::NewImage => "NEW_IMAGE",
            StreamViewType::OldImage => "OLD_IMAGE",
            StreamViewType::NewAndOldImages => "NEW_AND_OLD_IMAGES",
        }
    }
}

/// Caller-selected portion of the pre/post image returned by a mutating
/// operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    UpdatedOld,
    AllNew,
    UpdatedNew,
}

/// Per-table TTL configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSettings {
    pub attribute_name: String,
    pub enabled: bool,
}

/// Full persisted schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub key: KeySchema,
    #[serde(default)]
    pub gsis: Vec<GsiSchema>,
    #[serde(default)]
    pub ttl: Option<TtlSettings>,
    #[serde(default)]
    pub stream_view: Option<StreamViewType>,
    /// Stream identifier, present iff a stream has ever been enabled.
    #[serde(default)]
    pub stream_id: Option<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl TableSchema {
    pub fn gsi(&self, index_name: &str) -> Result<&GsiSchema> {
        self.gsis
            .iter()
            .find(|g| g.index_name == index_name)
            .ok_or_else(|| {
                PdbError::ResourceNotFound(format!(
                    "index {index_name} on table {}",
                    self.table_name
                ))
            })
    }

    /// TTL attribute name, when TTL is enabled.
    pub fn ttl_attribute(&self) -> Option<&str> {
        self.ttl
            .as_ref()
            .filter(|t| t.enabled)
            .map(|t| t.attribute_name.as_str())
    }

    /// Whether mutations should capture stream records.
    pub fn stream_enabled(&self) -> bool {
        self.stream_view.is_some() && self.stream_id.is_some()
    }

    /// Extract and validate the primary key of an item.
    pub fn extract_key(&self, item: &Item) -> Result<PrimaryKey> {
        let hash = key_value(item, &self.key.hash)?;
        let range = match &self.key.range {
            Some(range_attr) => Some(key_value(item, range_attr)?),
            None => None,
        };
        Ok(PrimaryKey { hash, range })
    }

    /// Validate a bare key map (GetItem / DeleteItem / Update key argument):
    /// it must contain exactly the key attributes with matching types.
    pub fn validate_key_map(&self, key: &Item) -> Result<PrimaryKey> {
        let expected = if self.key.range.is_some() { 2 } else { 1 };
        if key.len() != expected {
            return Err(PdbError::validation(format!(
                "key for table {} must contain exactly {expected} attribute(s)",
                self.table_name
            )));
        }
        self.extract_key(key)
    }

    /// Item containing only the primary-key attributes.
    pub fn key_item(&self, key: &PrimaryKey) -> Item {
        let mut item = Item::new();
        item.insert(self.key.hash.name.clone(), key.hash.clone());
        if let (Some(range_attr), Some(range)) = (&self.key.range, &key.range) {
            item.insert(range_attr.name.clone(), range.clone());
        }
        item
    }
}

fn key_value(item: &Item, attr: &KeyAttribute) -> Result<AttributeValue> {
    let value = item.get(&attr.name).ok_or_else(|| {
        PdbError::validation(format!("missing key attribute {}", attr.name))
    })?;
    if !attr.key_type.matches(value) {
        return Err(PdbError::validation(format!(
            "key attribute {} must be of type {}, got {}",
            attr.name,
            attr.key_type.name(),
            value.type_name()
        )));
    }
    if let AttributeValue::S(s) = value {
        if s.is_empty() {
            return Err(PdbError::validation(format!(
                "key attribute {} must not be empty",
                attr.name
            )));
        }
    }
    Ok(value.clone())
}

/// A table's primary key values for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub hash: AttributeValue,
    pub range: Option<AttributeValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema {
            table_name: "orders".into(),
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
                index_name: "StatusIdx".into(),
                key: KeySchema {
                    hash: KeyAttribute {
                        name: "status".into(),
                        key_type: KeyType::S,
                    },
                    range: None,
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

    #[test]
    fn test_schema_json_roundtrip() {
        let schema = schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }

    #[test]
    fn test_extract_key_validates_types() {
        let schema = schema();
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::S("a".into()));
        item.insert("seq".into(), AttributeValue::S("not-a-number".into()));
        let err = schema.extract_key(&item).unwrap_err();
        assert_eq!(err.code(), "ValidationError");

        item.insert("seq".into(), AttributeValue::N("7".into()));
        let key = schema.extract_key(&item).unwrap();
        assert_eq!(key.hash, AttributeValue::S("a".into()));
        assert_eq!(key.range, Some(AttributeValue::N("7".into())));
    }

    #[test]
    fn test_validate_key_map_rejects_extra_attributes() {
        let schema = schema();
        let mut key = Item::new();
        key.insert("id".into(), AttributeValue::S("a".into()));
        key.insert("seq".into(), AttributeValue::N("1".into()));
        key.insert("extra".into(), AttributeValue::S("x".into()));
        assert!(schema.validate_key_map(&key).is_err());
    }

    #[test]
    fn test_gsi_lookup() {
        let schema = schema();
        assert!(schema.gsi("StatusIdx").is_ok());
        let err = schema.gsi("Missing").unwrap_err();
        assert_eq!(err.code(), "ResourceNotFound");
    }

    #[test]
    fn test_stream_view_images() {
        assert!(StreamViewType::NewAndOldImages.wants_old());
        assert!(StreamViewType::NewAndOldImages.wants_new());
        assert!(!StreamViewType::KeysOnly.wants_old());
        assert!(StreamViewType::OldImage.wants_old());
        assert!(!StreamViewType::OldImage.wants_new());
    }
}
