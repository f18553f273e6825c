//! DynamoDB attribute-value sum type and its canonical JSON codec.
//!
//! The wire shape is the AWS one: `{"S":"x"}`, `{"N":"3.14"}`,
//! `{"B":"<base64>"}`, `{"BOOL":true}`, `{"NULL":true}`, `{"SS":[...]}`,
//! `{"NS":[...]}`, `{"BS":[...]}`, `{"L":[...]}`, `{"M":{...}}`. Numbers are
//! carried as decimal strings and kept verbatim through round-trips;
//! equality and ordering on `N` are numeric.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use base64::prelude::*;
use bigdecimal::BigDecimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{PdbError, Result};

/// A single logical record: attribute name to attribute value.
///
/// `BTreeMap` keeps the JSON form canonical (sorted keys), which the item
/// store relies on for primary-key row identity.
pub type Item = BTreeMap<String, AttributeValue>;

/// The tagged value held under each attribute name.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    S(String),
    /// Decimal numeral kept in its lexical form.
    N(String),
    B(Vec<u8>),
    Bool(bool),
    Null,
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
    L(Vec<AttributeValue>),
    M(Item),
}

impl AttributeValue {
    /// Wire type tag for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null => "NULL",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    /// Numeric value of an `N`, when this is one.
    pub fn decimal(&self) -> Option<BigDecimal> {
        match self {
            AttributeValue::N(text) => BigDecimal::from_str(text).ok(),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(
            self,
            AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_)
        )
    }

    /// Canonical wire JSON for this value.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::S(s) => json!({ "S": s }),
            AttributeValue::N(n) => json!({ "N": n }),
            AttributeValue::B(b) => json!({ "B": BASE64_STANDARD.encode(b) }),
            AttributeValue::Bool(b) => json!({ "BOOL": b }),
            AttributeValue::Null => json!({ "NULL": true }),
            AttributeValue::Ss(items) => json!({ "SS": items }),
            AttributeValue::Ns(items) => json!({ "NS": items }),
            AttributeValue::Bs(items) => {
                let encoded: Vec<String> =
                    items.iter().map(|b| BASE64_STANDARD.encode(b)).collect();
                json!({ "BS": encoded })
            }
            AttributeValue::L(items) => {
                wrap("L", Value::Array(items.iter().map(Self::to_json).collect()))
            }
            AttributeValue::M(map) => {
                let obj: serde_json::Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                wrap("M", Value::Object(obj))
            }
        }
    }

    /// Decode the canonical wire JSON. Rejects objects with zero or more
    /// than one type tag, unknown tags, and malformed payloads.
    pub fn from_json(value: &Value) -> Result<AttributeValue> {
        let obj = value
            .as_object()
            .ok_or_else(|| PdbError::validation("attribute value must be a JSON object"))?;
        if obj.len() != 1 {
            return Err(PdbError::validation(format!(
                "attribute value must carry exactly one type tag, found {}",
                obj.len()
            )));
        }
        let (tag, inner) = obj.iter().next().expect("length checked");
        match tag.as_str() {
            "S" => Ok(AttributeValue::S(expect_string(inner, "S")?)),
            "N" => {
                let text = expect_string(inner, "N")?;
                validate_number(&text)?;
                Ok(AttributeValue::N(text))
            }
            "B" => Ok(AttributeValue::B(decode_base64(inner)?)),
            "BOOL" => inner
                .as_bool()
                .map(AttributeValue::Bool)
                .ok_or_else(|| PdbError::validation("BOOL payload must be a boolean")),
            "NULL" => match inner.as_bool() {
                Some(true) => Ok(AttributeValue::Null),
                _ => Err(PdbError::validation("NULL payload must be true")),
            },
            "SS" => {
                let items = expect_array(inner, "SS")?
                    .iter()
                    .map(|v| expect_string(v, "SS element"))
                    .collect::<Result<Vec<_>>>()?;
                check_set(&items, "SS")?;
                Ok(AttributeValue::Ss(items))
            }
            "NS" => {
                let items = expect_array(inner, "NS")?
                    .iter()
                    .map(|v| expect_string(v, "NS element"))
                    .collect::<Result<Vec<_>>>()?;
                for item in &items {
                    validate_number(item)?;
                }
                check_set(&items, "NS")?;
                Ok(AttributeValue::Ns(items))
            }
            "BS" => {
                let items = expect_array(inner, "BS")?
                    .iter()
                    .map(decode_base64)
                    .collect::<Result<Vec<_>>>()?;
                check_set(&items, "BS")?;
                Ok(AttributeValue::Bs(items))
            }
            "L" => {
                let items = expect_array(inner, "L")?
                    .iter()
                    .map(AttributeValue::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(AttributeValue::L(items))
            }
            "M" => {
                let obj = inner
                    .as_object()
                    .ok_or_else(|| PdbError::validation("M payload must be an object"))?;
                let map = obj
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), AttributeValue::from_json(v)?)))
                    .collect::<Result<Item>>()?;
                Ok(AttributeValue::M(map))
            }
            other => Err(PdbError::validation(format!(
                "unknown attribute value type tag: {other}"
            ))),
        }
    }
}

fn wrap(tag: &str, value: Value) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert(tag.to_string(), value);
    Value::Object(obj)
}

fn expect_string(value: &Value, what: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PdbError::validation(format!("{what} payload must be a string")))
}

fn expect_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| PdbError::validation(format!("{what} payload must be an array")))
}

fn decode_base64(value: &Value) -> Result<Vec<u8>> {
    let text = expect_string(value, "B")?;
    BASE64_STANDARD
        .decode(text.as_bytes())
        .map_err(|e| PdbError::validation(format!("invalid base64 binary payload: {e}")))
}

fn check_set<T: PartialEq>(items: &[T], what: &str) -> Result<()> {
    if items.is_empty() {
        return Err(PdbError::validation(format!("{what} must not be empty")));
    }
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Err(PdbError::validation(format!(
                "{what} contains duplicate elements"
            )));
        }
    }
    Ok(())
}

/// Validate a decimal numeral: optional sign, digits with an optional
/// fractional part, optional exponent.
pub fn validate_number(text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
        if frac_digits == 0 {
            return Err(PdbError::validation(format!("invalid number: {text:?}")));
        }
    }
    if int_digits + frac_digits == 0 {
        return Err(PdbError::validation(format!("invalid number: {text:?}")));
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return Err(PdbError::validation(format!("invalid number: {text:?}")));
        }
    }
    if i != bytes.len() {
        return Err(PdbError::validation(format!("invalid number: {text:?}")));
    }
    Ok(())
}

/// Numeric-aware, order-insensitive set equality.
fn set_eq<T, F>(a: &[T], b: &[T], eq: F) -> bool
where
    F: Fn(&T, &T) -> bool,
{
    a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| eq(x, y)))
}

fn number_eq(a: &str, b: &str) -> bool {
    match (BigDecimal::from_str(a), BigDecimal::from_str(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::S(a), AttributeValue::S(b)) => a == b,
            (AttributeValue::N(a), AttributeValue::N(b)) => number_eq(a, b),
            (AttributeValue::B(a), AttributeValue::B(b)) => a == b,
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::Null, AttributeValue::Null) => true,
            (AttributeValue::Ss(a), AttributeValue::Ss(b)) => set_eq(a, b, |x, y| x == y),
            (AttributeValue::Ns(a), AttributeValue::Ns(b)) => {
                set_eq(a, b, |x, y| number_eq(x, y))
            }
            (AttributeValue::Bs(a), AttributeValue::Bs(b)) => set_eq(a, b, |x, y| x == y),
            (AttributeValue::L(a), AttributeValue::L(b)) => a == b,
            (AttributeValue::M(a), AttributeValue::M(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

/// Ordering for scalar values of the same variant: numeric on `N`,
/// code-point on `S`, bytewise on `B`. Everything else is unordered.
pub fn compare_scalars(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.cmp(y)),
        (AttributeValue::N(_), AttributeValue::N(_)) => {
            Some(a.decimal()?.cmp(&b.decimal()?))
        }
        _ => None,
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        AttributeValue::from_json(&value).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Canonical wire JSON for a whole item.
pub fn item_to_json(item: &Item) -> Value {
    let obj: serde_json::Map<String, Value> = item
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    Value::Object(obj)
}

/// Decode an item from its wire JSON.
pub fn item_from_json(value: &Value) -> Result<Item> {
    let obj = value
        .as_object()
        .ok_or_else(|| PdbError::validation("item must be a JSON object"))?;
    obj.iter()
        .map(|(name, v)| Ok((name.clone(), AttributeValue::from_json(v)?)))
        .collect()
}

/// Canonical serialized form of an item. Keys are sorted, so equal items
/// serialize identically.
pub fn item_to_string(item: &Item) -> String {
    item_to_json(item).to_string()
}

/// Parse the canonical serialized form.
pub fn item_from_string(text: &str) -> Result<Item> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| PdbError::Internal(format!("corrupt item payload: {e}")))?;
    item_from_json(&value)
}

/// Serialized size of an item, used by the batch size guard.
pub fn item_size_bytes(item: &Item) -> usize {
    item_to_string(item).len()
}

/// Validate every value in an item: numbers parse, sets are non-empty and
/// duplicate-free, and top-level strings are non-empty.
pub fn validate_item(item: &Item) -> Result<()> {
    for (name, value) in item {
        if name.is_empty() {
            return Err(PdbError::validation("attribute names must not be empty"));
        }
        if let AttributeValue::S(s) = value {
            if s.is_empty() {
                return Err(PdbError::validation(format!(
                    "attribute {name} is an empty string"
                )));
            }
        }
        validate_value(value)?;
    }
    Ok(())
}

fn validate_value(value: &AttributeValue) -> Result<()> {
    match value {
        AttributeValue::N(text) => validate_number(text),
        AttributeValue::Ss(items) => check_set(items, "SS"),
        AttributeValue::Ns(items) => {
            for item in items {
                validate_number(item)?;
            }
            check_set(items, "NS")
        }
        AttributeValue::Bs(items) => check_set(items, "BS"),
        AttributeValue::L(items) => items.iter().try_for_each(validate_value),
        AttributeValue::M(map) => map.values().try_for_each(validate_value),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AttributeValue) {
        let json = value.to_json();
        let decoded = AttributeValue::from_json(&json).expect("decode");
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_wire_roundtrip_all_variants() {
        roundtrip(AttributeValue::S("hello".into()));
        roundtrip(AttributeValue::N("3.14".into()));
        roundtrip(AttributeValue::B(vec![0, 1, 2, 255]));
        roundtrip(AttributeValue::Bool(true));
        roundtrip(AttributeValue::Null);
        roundtrip(AttributeValue::Ss(vec!["a".into(), "b".into()]));
        roundtrip(AttributeValue::Ns(vec!["1".into(), "2.5".into()]));
        roundtrip(AttributeValue::Bs(vec![vec![1], vec![2, 3]]));
        roundtrip(AttributeValue::L(vec![
            AttributeValue::S("x".into()),
            AttributeValue::N("1".into()),
        ]));
        let mut map = Item::new();
        map.insert("nested".into(), AttributeValue::Bool(false));
        roundtrip(AttributeValue::M(map));
    }

    #[test]
    fn test_number_preserves_lexical_form() {
        let value = AttributeValue::N("1.0".into());
        let json = value.to_json();
        assert_eq!(json, json!({"N": "1.0"}));
        let decoded = AttributeValue::from_json(&json).unwrap();
        match decoded {
            AttributeValue::N(text) => assert_eq!(text, "1.0"),
            other => panic!("expected N, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_equality_ignores_trailing_zeros() {
        assert_eq!(
            AttributeValue::N("1".into()),
            AttributeValue::N("1.0".into())
        );
        assert_ne!(
            AttributeValue::N("1".into()),
            AttributeValue::N("1.01".into())
        );
    }

    #[test]
    fn test_rejects_zero_or_multiple_tags() {
        assert!(AttributeValue::from_json(&json!({})).is_err());
        assert!(AttributeValue::from_json(&json!({"S": "a", "N": "1"})).is_err());
        assert!(AttributeValue::from_json(&json!({"X": "a"})).is_err());
    }

    #[test]
    fn test_number_validation() {
        for ok in ["0", "-1", "+1", "3.14", "1e5", "2.5E-3", ".5"] {
            assert!(validate_number(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "abc", "1.2.3", "--1", "1e", ".", "1x", "10."] {
            assert!(validate_number(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_sets_reject_duplicates_and_empty() {
        assert!(AttributeValue::from_json(&json!({"SS": []})).is_err());
        assert!(AttributeValue::from_json(&json!({"SS": ["a", "a"]})).is_err());
        // Numeric duplicates are not currently collapsed; lexical dup only.
        assert!(AttributeValue::from_json(&json!({"NS": ["1", "1"]})).is_err());
    }

    #[test]
    fn test_set_equality_is_order_insensitive() {
        assert_eq!(
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
            AttributeValue::Ss(vec!["b".into(), "a".into()])
        );
        assert_eq!(
            AttributeValue::Ns(vec!["1.0".into(), "2".into()]),
            AttributeValue::Ns(vec!["2.0".into(), "1".into()])
        );
    }

    #[test]
    fn test_scalar_ordering() {
        let a = AttributeValue::N("9".into());
        let b = AttributeValue::N("10".into());
        assert_eq!(compare_scalars(&a, &b), Some(Ordering::Less));

        let a = AttributeValue::S("abc".into());
        let b = AttributeValue::S("abd".into());
        assert_eq!(compare_scalars(&a, &b), Some(Ordering::Less));

        let a = AttributeValue::B(vec![1, 2]);
        let b = AttributeValue::B(vec![1, 2, 0]);
        assert_eq!(compare_scalars(&a, &b), Some(Ordering::Less));

        let a = AttributeValue::S("x".into());
        let b = AttributeValue::N("1".into());
        assert_eq!(compare_scalars(&a, &b), None);
    }

    #[test]
    fn test_item_canonical_form_is_sorted() {
        let mut item = Item::new();
        item.insert("zeta".into(), AttributeValue::N("1".into()));
        item.insert("alpha".into(), AttributeValue::S("x".into()));
        let text = item_to_string(&item);
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        let back = item_from_string(&text).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn test_validate_item_rejects_top_level_empty_string() {
        let mut item = Item::new();
        item.insert("name".into(), AttributeValue::S(String::new()));
        assert!(validate_item(&item).is_err());

        let mut nested = Item::new();
        nested.insert(
            "inner".into(),
            AttributeValue::L(vec![AttributeValue::S(String::new())]),
        );
        let mut item = Item::new();
        item.insert("m".into(), AttributeValue::M(nested));
        // Empty strings inside containers are fine.
        assert!(validate_item(&item).is_ok());
    }
}
