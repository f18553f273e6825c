//! Key-condition extraction and shape validation.
//!
//! A `KeyConditionExpression` must pin the hash key with `=` and may add at
//! most one range-key constraint (`=`, `<`, `<=`, `>`, `>=`, `BETWEEN`,
//! `begins_with`). Any other shape is rejected.

use crate::error::{PdbError, Result};
use crate::expression::ast::{CompareOp, Condition, Operand};
use crate::types::{AttributeValue, KeySchema, KeyType};

/// Range-key constraint of a validated key condition.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeCondition {
    Eq(AttributeValue),
    Lt(AttributeValue),
    Le(AttributeValue),
    Gt(AttributeValue),
    Ge(AttributeValue),
    Between(AttributeValue, AttributeValue),
    BeginsWith(AttributeValue),
}

/// A validated key condition: fixed hash value, optional range constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub hash_value: AttributeValue,
    pub range: Option<RangeCondition>,
}

/// Validate a parsed condition as a key condition against a key schema.
pub fn extract_key_condition(condition: &Condition, key: &KeySchema) -> Result<KeyCondition> {
    let (first, second) = match condition {
        Condition::And(a, b) => (a.as_ref(), Some(b.as_ref())),
        other => (other, None),
    };

    let mut hash_value = None;
    let mut range = None;
    for part in [Some(first), second].into_iter().flatten() {
        if let Some(value) = as_hash_equality(part, key)? {
            if hash_value.replace(value).is_some() {
                return Err(PdbError::validation(
                    "key condition constrains the hash key more than once",
                ));
            }
        } else if let Some(constraint) = as_range_constraint(part, key)? {
            if range.replace(constraint).is_some() {
                return Err(PdbError::validation(
                    "key condition constrains the range key more than once",
                ));
            }
        } else {
            return Err(PdbError::validation(
                "key condition may only reference the key attributes",
            ));
        }
    }

    let hash_value = hash_value.ok_or_else(|| {
        PdbError::validation(format!(
            "key condition must fix the hash key {} with equality",
            key.hash.name
        ))
    })?;
    check_type(&hash_value, key.hash.key_type, &key.hash.name)?;
    if let Some(constraint) = &range {
        let range_attr = key.range.as_ref().expect("range constraint implies range key");
        for value in constraint.values() {
            check_type(value, range_attr.key_type, &range_attr.name)?;
        }
        if matches!(constraint, RangeCondition::BeginsWith(_))
            && range_attr.key_type == KeyType::N
        {
            return Err(PdbError::validation(
                "begins_with is not supported on number range keys",
            ));
        }
    }

    Ok(KeyCondition { hash_value, range })
}

impl RangeCondition {
    fn values(&self) -> Vec<&AttributeValue> {
        match self {
            RangeCondition::Eq(v)
            | RangeCondition::Lt(v)
            | RangeCondition::Le(v)
            | RangeCondition::Gt(v)
            | RangeCondition::Ge(v)
            | RangeCondition::BeginsWith(v) => vec![v],
            RangeCondition::Between(a, b) => vec![a, b],
        }
    }
}

fn check_type(value: &AttributeValue, expected: KeyType, name: &str) -> Result<()> {
    if !expected.matches(value) {
        return Err(PdbError::validation(format!(
            "key condition value for {name} must be of type {}, got {}",
            expected.name(),
            value.type_name()
        )));
    }
    Ok(())
}

/// Match `hash = :v` (in either operand order).
fn as_hash_equality(condition: &Condition, key: &KeySchema) -> Result<Option<AttributeValue>> {
    let Condition::Compare(CompareOp::Eq, left, right) = condition else {
        return Ok(None);
    };
    match (path_name(left), literal(right), path_name(right), literal(left)) {
        (Some(name), Some(value), _, _) | (_, _, Some(name), Some(value)) => {
            if name == key.hash.name {
                Ok(Some(value.clone()))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

fn as_range_constraint(
    condition: &Condition,
    key: &KeySchema,
) -> Result<Option<RangeCondition>> {
    let Some(range_attr) = &key.range else {
        return Ok(None);
    };
    let matches_range = |op: &Operand| path_name(op) == Some(range_attr.name.as_str());
    match condition {
        Condition::Compare(op, left, right) if matches_range(left) => {
            let Some(value) = literal(right) else {
                return Ok(None);
            };
            let value = value.clone();
            Ok(Some(match op {
                CompareOp::Eq => RangeCondition::Eq(value),
                CompareOp::Lt => RangeCondition::Lt(value),
                CompareOp::Le => RangeCondition::Le(value),
                CompareOp::Gt => RangeCondition::Gt(value),
                CompareOp::Ge => RangeCondition::Ge(value),
                CompareOp::Ne => {
                    return Err(PdbError::validation(
                        "key condition does not support <> on the range key",
                    ))
                }
            }))
        }
        Condition::Between(target, low, high) if matches_range(target) => {
            match (literal(low), literal(high)) {
                (Some(lo), Some(hi)) => {
                    Ok(Some(RangeCondition::Between(lo.clone(), hi.clone())))
                }
                _ => Ok(None),
            }
        }
        Condition::BeginsWith(target, prefix) if matches_range(target) => {
            match literal(prefix) {
                Some(p) => Ok(Some(RangeCondition::BeginsWith(p.clone()))),
                None => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn path_name(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Path(path) if path.is_top_level() => Some(path.root_name()),
        _ => None,
    }
}

fn literal(operand: &Operand) -> Option<&AttributeValue> {
    match operand {
        Operand::Value(value) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::ExpressionParser;
    use crate::types::KeyAttribute;
    use std::collections::HashMap;

    fn key_schema() -> KeySchema {
        KeySchema {
            hash: KeyAttribute {
                name: "pk".into(),
                key_type: KeyType::S,
            },
            range: Some(KeyAttribute {
                name: "sk".into(),
                key_type: KeyType::N,
            }),
        }
    }

    fn extract(expr: &str, vals: &[(&str, AttributeValue)]) -> Result<KeyCondition> {
        let values: HashMap<String, AttributeValue> = vals
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut parser = ExpressionParser::new(None, Some(&values));
        let condition = parser.parse_condition(expr)?;
        extract_key_condition(&condition, &key_schema())
    }

    #[test]
    fn test_hash_only() {
        let kc = extract("pk = :h", &[("h", AttributeValue::S("a".into()))]).unwrap();
        assert_eq!(kc.hash_value, AttributeValue::S("a".into()));
        assert!(kc.range.is_none());
    }

    #[test]
    fn test_hash_and_range_between() {
        let kc = extract(
            "pk = :h AND sk BETWEEN :lo AND :hi",
            &[
                ("h", AttributeValue::S("a".into())),
                ("lo", AttributeValue::N("1".into())),
                ("hi", AttributeValue::N("9".into())),
            ],
        )
        .unwrap();
        assert!(matches!(kc.range, Some(RangeCondition::Between(..))));
    }

    #[test]
    fn test_operand_order_is_flexible_for_hash() {
        let kc = extract(":h = pk", &[("h", AttributeValue::S("a".into()))]).unwrap();
        assert_eq!(kc.hash_value, AttributeValue::S("a".into()));
    }

    #[test]
    fn test_rejects_missing_hash() {
        let err = extract("sk > :v", &[("v", AttributeValue::N("1".into()))]).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_rejects_non_key_attribute() {
        let err = extract(
            "pk = :h AND other = :v",
            &[
                ("h", AttributeValue::S("a".into())),
                ("v", AttributeValue::S("x".into())),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_rejects_or_shape() {
        let err = extract(
            "pk = :h OR sk > :v",
            &[
                ("h", AttributeValue::S("a".into())),
                ("v", AttributeValue::N("1".into())),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_rejects_wrong_value_type() {
        let err = extract(
            "pk = :h AND sk = :v",
            &[
                ("h", AttributeValue::S("a".into())),
                ("v", AttributeValue::S("not-a-number".into())),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_rejects_begins_with_on_number_range() {
        let err = extract(
            "pk = :h AND begins_with(sk, :p)",
            &[
                ("h", AttributeValue::S("a".into())),
                ("p", AttributeValue::N("1".into())),
            ],
        )
        .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }
}
