//! Projection-expression application.

use crate::expression::ast::{DocumentPath, PathSegment};
use crate::types::attribute::{AttributeValue, Item};

/// Restrict an item to the given paths, preserving nested structure.
/// Projected list indexes keep their relative order; gaps collapse.
pub fn project_item(item: &Item, paths: &[DocumentPath]) -> Item {
    let mut out = Item::new();
    for path in paths {
        graft(item, &mut out, path);
    }
    out
}

fn graft(source: &Item, target: &mut Item, path: &DocumentPath) {
    let mut segments = path.segments.iter();
    let root = match segments.next() {
        Some(PathSegment::Field(name)) => name,
        _ => return,
    };
    let Some(value) = source.get(root) else {
        return;
    };
    let rest: Vec<_> = segments.collect();
    if rest.is_empty() {
        target.insert(root.clone(), value.clone());
        return;
    }
    let slot = target
        .entry(root.clone())
        .or_insert_with(|| empty_like(value));
    graft_nested(value, slot, &rest);
}

fn empty_like(value: &AttributeValue) -> AttributeValue {
    match value {
        AttributeValue::L(_) => AttributeValue::L(Vec::new()),
        _ => AttributeValue::M(Item::new()),
    }
}

fn graft_nested(source: &AttributeValue, target: &mut AttributeValue, rest: &[&PathSegment]) {
    let (segment, tail) = match rest.split_first() {
        Some(parts) => parts,
        None => return,
    };
    match (segment, source) {
        (PathSegment::Field(name), AttributeValue::M(source_map)) => {
            let Some(inner) = source_map.get(name.as_str()) else {
                return;
            };
            let target_map = match target {
                AttributeValue::M(map) => map,
                _ => return,
            };
            if tail.is_empty() {
                target_map.insert(name.clone(), inner.clone());
                return;
            }
            let slot = target_map
                .entry(name.clone())
                .or_insert_with(|| empty_like(inner));
            graft_nested(inner, slot, tail);
        }
        (PathSegment::Index(idx), AttributeValue::L(source_list)) => {
            let Some(inner) = source_list.get(*idx as usize) else {
                return;
            };
            let target_list = match target {
                AttributeValue::L(list) => list,
                _ => return,
            };
            if tail.is_empty() {
                target_list.push(inner.clone());
                return;
            }
            let mut slot = empty_like(inner);
            graft_nested(inner, &mut slot, tail);
            target_list.push(slot);
        }
        _ => {}
    }
}
