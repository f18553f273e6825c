//! Condition and filter evaluation.
//!
//! Evaluation never fails on missing data: an unresolved path is "missing"
//! and comparisons against missing or type-mismatched values are false,
//! matching DynamoDB. Errors are reserved for structurally invalid
//! operations (arithmetic on non-numbers).

use std::cmp::Ordering;

use crate::error::{PdbError, Result};
use crate::expression::ast::{CompareOp, Condition, DocumentPath, Operand, PathSegment};
use crate::types::attribute::{compare_scalars, AttributeValue, Item};

/// Resolve a document path against an item. Out-of-bounds indexes and
/// wrong-variant navigation yield `None`, not an error.
pub fn resolve_path<'a>(item: &'a Item, path: &DocumentPath) -> Option<&'a AttributeValue> {
    let mut segments = path.segments.iter();
    let mut current = match segments.next()? {
        PathSegment::Field(name) => item.get(name)?,
        PathSegment::Index(_) => return None,
    };
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Field(name), AttributeValue::M(map)) => map.get(name)?,
            (PathSegment::Index(idx), AttributeValue::L(list)) => list.get(*idx as usize)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate an operand to a value; `None` means "missing".
pub fn eval_operand(operand: &Operand, item: &Item) -> Result<Option<AttributeValue>> {
    match operand {
        Operand::Path(path) => Ok(resolve_path(item, path).cloned()),
        Operand::Value(value) => Ok(Some(value.clone())),
        Operand::Size(path) => Ok(resolve_path(item, path).and_then(size_of)),
        Operand::IfNotExists(path, fallback) => match resolve_path(item, path) {
            Some(value) => Ok(Some(value.clone())),
            None => eval_operand(fallback, item),
        },
        Operand::ListAppend(first, second) => {
            let first = eval_operand(first, item)?;
            let second = eval_operand(second, item)?;
            match (first, second) {
                (Some(AttributeValue::L(mut a)), Some(AttributeValue::L(b))) => {
                    a.extend(b);
                    Ok(Some(AttributeValue::L(a)))
                }
                _ => Err(PdbError::validation(
                    "list_append operands must both be lists",
                )),
            }
        }
        Operand::Plus(a, b) => arithmetic(a, b, item, |x, y| x + y),
        Operand::Minus(a, b) => arithmetic(a, b, item, |x, y| x - y),
    }
}

fn arithmetic(
    a: &Operand,
    b: &Operand,
    item: &Item,
    apply: fn(bigdecimal::BigDecimal, bigdecimal::BigDecimal) -> bigdecimal::BigDecimal,
) -> Result<Option<AttributeValue>> {
    let left = eval_operand(a, item)?
        .ok_or_else(|| PdbError::validation("arithmetic operand is missing"))?;
    let right = eval_operand(b, item)?
        .ok_or_else(|| PdbError::validation("arithmetic operand is missing"))?;
    match (left.decimal(), right.decimal()) {
        (Some(x), Some(y)) => Ok(Some(AttributeValue::N(apply(x, y).to_string()))),
        _ => Err(PdbError::validation(
            "arithmetic requires number operands",
        )),
    }
}

fn size_of(value: &AttributeValue) -> Option<AttributeValue> {
    let len = match value {
        AttributeValue::S(s) => s.chars().count(),
        AttributeValue::B(b) => b.len(),
        AttributeValue::Ss(v) => v.len(),
        AttributeValue::Ns(v) => v.len(),
        AttributeValue::Bs(v) => v.len(),
        AttributeValue::L(v) => v.len(),
        AttributeValue::M(m) => m.len(),
        _ => return None,
    };
    Some(AttributeValue::N(len.to_string()))
}

/// Evaluate a boolean condition against an item (possibly empty, for
/// condition checks on absent rows).
pub fn eval_condition(condition: &Condition, item: &Item) -> Result<bool> {
    match condition {
        Condition::And(a, b) => Ok(eval_condition(a, item)? && eval_condition(b, item)?),
        Condition::Or(a, b) => Ok(eval_condition(a, item)? || eval_condition(b, item)?),
        Condition::Not(inner) => Ok(!eval_condition(inner, item)?),
        Condition::Compare(op, left, right) => {
            let left = eval_operand(left, item)?;
            let right = eval_operand(right, item)?;
            Ok(compare_values(*op, left.as_ref(), right.as_ref()))
        }
        Condition::Between(target, low, high) => {
            let target = eval_operand(target, item)?;
            let low = eval_operand(low, item)?;
            let high = eval_operand(high, item)?;
            match (target, low, high) {
                (Some(t), Some(lo), Some(hi)) => {
                    let ge_low = compare_scalars(&t, &lo)
                        .is_some_and(|o| o != Ordering::Less);
                    let le_high = compare_scalars(&t, &hi)
                        .is_some_and(|o| o != Ordering::Greater);
                    Ok(ge_low && le_high)
                }
                _ => Ok(false),
            }
        }
        Condition::In(target, members) => {
            let target = match eval_operand(target, item)? {
                Some(t) => t,
                None => return Ok(false),
            };
            for member in members {
                if eval_operand(member, item)?.is_some_and(|m| m == target) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::AttributeExists(path) => Ok(resolve_path(item, path).is_some()),
        Condition::AttributeNotExists(path) => Ok(resolve_path(item, path).is_none()),
        Condition::AttributeType(path, type_operand) => {
            let expected = match eval_operand(type_operand, item)? {
                Some(AttributeValue::S(tag)) => tag,
                _ => {
                    return Err(PdbError::validation(
                        "attribute_type expects a string type tag",
                    ))
                }
            };
            Ok(resolve_path(item, path).is_some_and(|v| v.type_name() == expected))
        }
        Condition::BeginsWith(target, prefix) => {
            let target = eval_operand(target, item)?;
            let prefix = eval_operand(prefix, item)?;
            Ok(match (target, prefix) {
                (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => s.starts_with(&p),
                (Some(AttributeValue::B(b)), Some(AttributeValue::B(p))) => b.starts_with(&p),
                _ => false,
            })
        }
        Condition::Contains(haystack, needle) => {
            let haystack = eval_operand(haystack, item)?;
            let needle = eval_operand(needle, item)?;
            Ok(match (haystack, needle) {
                (Some(h), Some(n)) => contains(&h, &n),
                _ => false,
            })
        }
    }
}

fn compare_values(op: CompareOp, left: Option<&AttributeValue>, right: Option<&AttributeValue>) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Lt => compare_scalars(left, right) == Some(Ordering::Less),
        CompareOp::Le => {
            compare_scalars(left, right).is_some_and(|o| o != Ordering::Greater)
        }
        CompareOp::Gt => compare_scalars(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => compare_scalars(left, right).is_some_and(|o| o != Ordering::Less),
    }
}

fn contains(haystack: &AttributeValue, needle: &AttributeValue) -> bool {
    match (haystack, needle) {
        (AttributeValue::S(s), AttributeValue::S(n)) => s.contains(n.as_str()),
        (AttributeValue::Ss(set), AttributeValue::S(n)) => set.iter().any(|s| s == n),
        (AttributeValue::Ns(set), AttributeValue::N(_)) => set
            .iter()
            .any(|s| AttributeValue::N(s.clone()) == *needle),
        (AttributeValue::Bs(set), AttributeValue::B(n)) => set.iter().any(|b| b == n),
        (AttributeValue::L(list), _) => list.iter().any(|v| v == needle),
        _ => false,
    }
}
