//! Update-expression application.
//!
//! All clause operands are evaluated against the pre-image, then the
//! resulting writes are applied to a copy, so `SET a = b, b = a` swaps.

use std::collections::BTreeSet;

use crate::error::{PdbError, Result};
use crate::expression::ast::{DocumentPath, PathSegment, UpdateAction, UpdateExpression};
use crate::expression::eval::{eval_operand, resolve_path};
use crate::types::attribute::{AttributeValue, Item};

/// Result of applying an update expression.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub post: Item,
    /// Top-level attribute names that actually changed.
    pub changed: BTreeSet<String>,
}

/// Apply an update expression to a pre-image (empty for upserts) and
/// produce the post-image.
pub fn apply_update(update: &UpdateExpression, pre: &Item) -> Result<UpdateOutcome> {
    let mut post = pre.clone();
    let mut changed = BTreeSet::new();
    for action in &update.actions {
        match action {
            UpdateAction::Set { path, value } => {
                let value = eval_operand(value, pre)?.ok_or_else(|| {
                    PdbError::validation(format!(
                        "SET operand for {path} resolves to a missing attribute"
                    ))
                })?;
                set_path(&mut post, path, value)?;
                changed.insert(path.root_name().to_string());
            }
            UpdateAction::Remove { path } => {
                if remove_path(&mut post, path) {
                    changed.insert(path.root_name().to_string());
                }
            }
            UpdateAction::Add { path, value } => {
                let existing = resolve_path(&post, path).cloned();
                let merged = add_values(existing.as_ref(), value, path)?;
                set_path(&mut post, path, merged)?;
                changed.insert(path.root_name().to_string());
            }
            UpdateAction::Delete { path, value } => {
                let Some(existing) = resolve_path(&post, path).cloned() else {
                    continue;
                };
                match delete_from_set(&existing, value, path)? {
                    Some(remaining) => {
                        if remaining != existing {
                            set_path(&mut post, path, remaining)?;
                            changed.insert(path.root_name().to_string());
                        }
                    }
                    None => {
                        remove_path(&mut post, path);
                        changed.insert(path.root_name().to_string());
                    }
                }
            }
        }
    }
    Ok(UpdateOutcome { post, changed })
}

/// `ADD`: numeric addition, set union, or creation when absent.
fn add_values(
    existing: Option<&AttributeValue>,
    value: &AttributeValue,
    path: &DocumentPath,
) -> Result<AttributeValue> {
    match existing {
        None => match value {
            AttributeValue::N(_)
            | AttributeValue::Ss(_)
            | AttributeValue::Ns(_)
            | AttributeValue::Bs(_) => Ok(value.clone()),
            other => Err(PdbError::validation(format!(
                "ADD {path} requires a number or set operand, got {}",
                other.type_name()
            ))),
        },
        Some(AttributeValue::N(current)) => {
            let current = AttributeValue::N(current.clone())
                .decimal()
                .ok_or_else(|| PdbError::validation(format!("{path} is not a valid number")))?;
            let addend = value
                .decimal()
                .ok_or_else(|| {
                    PdbError::validation(format!("ADD {path} operand must be a number"))
                })?;
            Ok(AttributeValue::N((current + addend).to_string()))
        }
        Some(AttributeValue::Ss(current)) => match value {
            AttributeValue::Ss(incoming) => {
                let mut merged = current.clone();
                for element in incoming {
                    if !merged.contains(element) {
                        merged.push(element.clone());
                    }
                }
                Ok(AttributeValue::Ss(merged))
            }
            _ => Err(set_type_mismatch(path, "SS", value)),
        },
        Some(AttributeValue::Ns(current)) => match value {
            AttributeValue::Ns(incoming) => {
                let mut merged = current.clone();
                for element in incoming {
                    let candidate = AttributeValue::N(element.clone());
                    if !merged
                        .iter()
                        .any(|m| AttributeValue::N(m.clone()) == candidate)
                    {
                        merged.push(element.clone());
                    }
                }
                Ok(AttributeValue::Ns(merged))
            }
            _ => Err(set_type_mismatch(path, "NS", value)),
        },
        Some(AttributeValue::Bs(current)) => match value {
            AttributeValue::Bs(incoming) => {
                let mut merged = current.clone();
                for element in incoming {
                    if !merged.contains(element) {
                        merged.push(element.clone());
                    }
                }
                Ok(AttributeValue::Bs(merged))
            }
            _ => Err(set_type_mismatch(path, "BS", value)),
        },
        Some(other) => Err(PdbError::validation(format!(
            "ADD {path} target must be a number or set, found {}",
            other.type_name()
        ))),
    }
}

fn set_type_mismatch(path: &DocumentPath, expected: &str, value: &AttributeValue) -> PdbError {
    PdbError::validation(format!(
        "DELETE/ADD on {path}: expected {expected} operand, got {}",
        value.type_name()
    ))
}

/// `DELETE`: set difference. `Ok(None)` means the set emptied out and the
/// attribute should be removed.
fn delete_from_set(
    existing: &AttributeValue,
    value: &AttributeValue,
    path: &DocumentPath,
) -> Result<Option<AttributeValue>> {
    let remaining = match (existing, value) {
        (AttributeValue::Ss(current), AttributeValue::Ss(remove)) => AttributeValue::Ss(
            current
                .iter()
                .filter(|e| !remove.contains(e))
                .cloned()
                .collect(),
        ),
        (AttributeValue::Ns(current), AttributeValue::Ns(remove)) => AttributeValue::Ns(
            current
                .iter()
                .filter(|e| {
                    let candidate = AttributeValue::N((*e).clone());
                    !remove
                        .iter()
                        .any(|r| AttributeValue::N(r.clone()) == candidate)
                })
                .cloned()
                .collect(),
        ),
        (AttributeValue::Bs(current), AttributeValue::Bs(remove)) => AttributeValue::Bs(
            current
                .iter()
                .filter(|e| !remove.contains(e))
                .cloned()
                .collect(),
        ),
        (existing, value) => {
            return Err(PdbError::validation(format!(
                "DELETE {path} requires matching set types, found {} and {}",
                existing.type_name(),
                value.type_name()
            )))
        }
    };
    let empty = match &remaining {
        AttributeValue::Ss(v) => v.is_empty(),
        AttributeValue::Ns(v) => v.is_empty(),
        AttributeValue::Bs(v) => v.is_empty(),
        _ => false,
    };
    Ok(if empty { None } else { Some(remaining) })
}

/// Write a value at a path, creating intermediate maps for missing fields.
/// Indexing into a missing or non-list value is an error; an index at or
/// past the end of a list appends.
fn set_path(item: &mut Item, path: &DocumentPath, value: AttributeValue) -> Result<()> {
    let mut segments = path.segments.iter();
    let root = match segments.next() {
        Some(PathSegment::Field(name)) => name,
        _ => return Err(PdbError::validation("path must start at an attribute name")),
    };
    let rest: Vec<_> = segments.collect();
    if rest.is_empty() {
        item.insert(root.clone(), value);
        return Ok(());
    }
    let slot = item
        .entry(root.clone())
        .or_insert_with(|| AttributeValue::M(Item::new()));
    set_nested(slot, &rest, value, path)
}

fn set_nested(
    current: &mut AttributeValue,
    rest: &[&PathSegment],
    value: AttributeValue,
    full: &DocumentPath,
) -> Result<()> {
    let (segment, tail) = rest.split_first().expect("set_nested requires segments");
    match segment {
        PathSegment::Field(name) => {
            let map = match current {
                AttributeValue::M(map) => map,
                _ => {
                    return Err(PdbError::validation(format!(
                        "path {full} navigates a field of a non-map value"
                    )))
                }
            };
            if tail.is_empty() {
                map.insert(name.clone(), value);
                return Ok(());
            }
            let slot = map
                .entry(name.clone())
                .or_insert_with(|| AttributeValue::M(Item::new()));
            set_nested(slot, tail, value, full)
        }
        PathSegment::Index(idx) => {
            let list = match current {
                AttributeValue::L(list) => list,
                _ => {
                    return Err(PdbError::validation(format!(
                        "path {full} indexes into a non-list value"
                    )))
                }
            };
            let idx = *idx as usize;
            if tail.is_empty() {
                if idx < list.len() {
                    list[idx] = value;
                } else {
                    list.push(value);
                }
                return Ok(());
            }
            let slot = list.get_mut(idx).ok_or_else(|| {
                PdbError::validation(format!("path {full} indexes past the end of a list"))
            })?;
            set_nested(slot, tail, value, full)
        }
    }
}

/// Remove the value at a path. Returns whether anything was removed.
fn remove_path(item: &mut Item, path: &DocumentPath) -> bool {
    let mut segments = path.segments.iter();
    let root = match segments.next() {
        Some(PathSegment::Field(name)) => name,
        _ => return false,
    };
    let rest: Vec<_> = segments.collect();
    if rest.is_empty() {
        return item.remove(root).is_some();
    }
    match item.get_mut(root) {
        Some(value) => remove_nested(value, &rest),
        None => false,
    }
}

fn remove_nested(current: &mut AttributeValue, rest: &[&PathSegment]) -> bool {
    let (segment, tail) = match rest.split_first() {
        Some(parts) => parts,
        None => return false,
    };
    match (segment, current) {
        (PathSegment::Field(name), AttributeValue::M(map)) => {
            if tail.is_empty() {
                map.remove(name.as_str()).is_some()
            } else {
                match map.get_mut(name.as_str()) {
                    Some(next) => remove_nested(next, tail),
                    None => false,
                }
            }
        }
        (PathSegment::Index(idx), AttributeValue::L(list)) => {
            let idx = *idx as usize;
            if tail.is_empty() {
                if idx < list.len() {
                    list.remove(idx);
                    true
                } else {
                    false
                }
            } else {
                match list.get_mut(idx) {
                    Some(next) => remove_nested(next, tail),
                    None => false,
                }
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::ExpressionParser;
    use std::collections::HashMap;

    fn apply(expr: &str, pre: &Item, vals: &[(&str, AttributeValue)]) -> UpdateOutcome {
        let values: HashMap<String, AttributeValue> = vals
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut parser = ExpressionParser::new(None, Some(&values));
        let update = parser.parse_update(expr).expect("parse");
        apply_update(&update, pre).expect("apply")
    }

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_set_creates_and_overwrites() {
        let pre = item(&[("a", AttributeValue::N("1".into()))]);
        let out = apply(
            "SET a = :x, b = :y",
            &pre,
            &[
                ("x", AttributeValue::N("2".into())),
                ("y", AttributeValue::S("new".into())),
            ],
        );
        assert_eq!(out.post.get("a"), Some(&AttributeValue::N("2".into())));
        assert_eq!(out.post.get("b"), Some(&AttributeValue::S("new".into())));
        assert_eq!(
            out.changed.iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_set_arithmetic_uses_pre_image() {
        let pre = item(&[("balance", AttributeValue::N("500".into()))]);
        let out = apply(
            "SET balance = balance - :amount",
            &pre,
            &[("amount", AttributeValue::N("100".into()))],
        );
        assert_eq!(
            out.post.get("balance"),
            Some(&AttributeValue::N("400".into()))
        );
    }

    #[test]
    fn test_add_number_and_set_and_remove() {
        let pre = item(&[
            ("counter", AttributeValue::N("10".into())),
            (
                "tags",
                AttributeValue::Ss(vec!["a".into(), "b".into()]),
            ),
            ("unused", AttributeValue::S("x".into())),
        ]);
        let out = apply(
            "ADD counter :five, tags :more REMOVE unused",
            &pre,
            &[
                ("five", AttributeValue::N("5".into())),
                ("more", AttributeValue::Ss(vec!["c".into()])),
            ],
        );
        assert_eq!(
            out.post.get("counter"),
            Some(&AttributeValue::N("15".into()))
        );
        assert_eq!(
            out.post.get("tags"),
            Some(&AttributeValue::Ss(vec![
                "a".into(),
                "b".into(),
                "c".into()
            ]))
        );
        assert!(!out.post.contains_key("unused"));
    }

    #[test]
    fn test_add_creates_missing_number_and_set() {
        let pre = Item::new();
        let out = apply(
            "ADD counter :n, tags :s",
            &pre,
            &[
                ("n", AttributeValue::N("3".into())),
                ("s", AttributeValue::Ss(vec!["x".into()])),
            ],
        );
        assert_eq!(out.post.get("counter"), Some(&AttributeValue::N("3".into())));
        assert_eq!(
            out.post.get("tags"),
            Some(&AttributeValue::Ss(vec!["x".into()]))
        );
    }

    #[test]
    fn test_delete_set_difference_and_emptying() {
        let pre = item(&[(
            "tags",
            AttributeValue::Ss(vec!["a".into(), "b".into()]),
        )]);
        let out = apply(
            "DELETE tags :remove",
            &pre,
            &[("remove", AttributeValue::Ss(vec!["a".into()]))],
        );
        assert_eq!(
            out.post.get("tags"),
            Some(&AttributeValue::Ss(vec!["b".into()]))
        );

        let out = apply(
            "DELETE tags :remove",
            &pre,
            &[(
                "remove",
                AttributeValue::Ss(vec!["a".into(), "b".into()]),
            )],
        );
        assert!(!out.post.contains_key("tags"));
    }

    #[test]
    fn test_nested_set_creates_intermediate_maps() {
        let pre = Item::new();
        let out = apply(
            "SET profile.address.city = :c",
            &pre,
            &[("c", AttributeValue::S("berlin".into()))],
        );
        let profile = match out.post.get("profile") {
            Some(AttributeValue::M(m)) => m,
            other => panic!("expected map, got {other:?}"),
        };
        let address = match profile.get("address") {
            Some(AttributeValue::M(m)) => m,
            other => panic!("expected map, got {other:?}"),
        };
        assert_eq!(
            address.get("city"),
            Some(&AttributeValue::S("berlin".into()))
        );
    }

    #[test]
    fn test_list_set_and_remove_by_index() {
        let pre = item(&[(
            "log",
            AttributeValue::L(vec![
                AttributeValue::N("1".into()),
                AttributeValue::N("2".into()),
            ]),
        )]);
        let out = apply(
            "SET log[0] = :v REMOVE log[5]",
            &pre,
            &[("v", AttributeValue::N("9".into()))],
        );
        assert_eq!(
            out.post.get("log"),
            Some(&AttributeValue::L(vec![
                AttributeValue::N("9".into()),
                AttributeValue::N("2".into()),
            ]))
        );
        // Removing past the end is a no-op, so "log" changed only via SET.
        assert!(out.changed.contains("log"));
    }

    #[test]
    fn test_if_not_exists_fallback() {
        let pre = Item::new();
        let out = apply(
            "SET hits = if_not_exists(hits, :zero)",
            &pre,
            &[("zero", AttributeValue::N("0".into()))],
        );
        assert_eq!(out.post.get("hits"), Some(&AttributeValue::N("0".into())));

        let pre = item(&[("hits", AttributeValue::N("7".into()))]);
        let out = apply(
            "SET hits = if_not_exists(hits, :zero)",
            &pre,
            &[("zero", AttributeValue::N("0".into()))],
        );
        assert_eq!(out.post.get("hits"), Some(&AttributeValue::N("7".into())));
    }

    #[test]
    fn test_remove_missing_is_not_a_change() {
        let pre = Item::new();
        let out = apply("REMOVE ghost", &pre, &[]);
        assert!(out.changed.is_empty());
    }

    #[test]
    fn test_add_type_mismatch_is_validation_error() {
        let values: HashMap<String, AttributeValue> =
            [("v".to_string(), AttributeValue::S("oops".into()))].into();
        let mut parser = ExpressionParser::new(None, Some(&values));
        let update = parser.parse_update("ADD counter :v").unwrap();
        let pre = item(&[("counter", AttributeValue::N("1".into()))]);
        let err = apply_update(&update, &pre).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }
}
