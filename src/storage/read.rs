//! Query and Scan execution.
//!
//! Candidate rows are read from the base table or a GSI projection in key
//! order, honoring `ExclusiveStartKey` and `Limit` at the SQL level; the
//! filter expression applies only after the limit cut, exactly like
//! DynamoDB. `LastEvaluatedKey` is present iff the read stopped at the
//! limit.

use sea_query::{Expr, ExprTrait, LikeExpr, Order, Query, SelectStatement};

use crate::error::{PdbError, Result};
use crate::expression::ast::Condition;
use crate::expression::eval::eval_condition;
use crate::expression::key_condition::{KeyCondition, RangeCondition};
use crate::expression::{project_item, DocumentPath};
use crate::pagination::{decode_start_key, last_key_for_index, last_key_for_table};
use crate::storage::item_store::ItemStore;
use crate::storage::keys::KeyColumns;
use crate::storage::schema::{GsiProjections, Items};
use crate::types::attribute::{item_from_string, Item};
use crate::types::schema::{GsiSchema, KeyAttribute, KeyType, TableSchema};

/// Result page of a Query or Scan.
#[derive(Debug)]
pub struct ReadPage {
    pub items: Vec<Item>,
    pub count: usize,
    pub scanned_count: usize,
    pub last_evaluated_key: Option<Item>,
}

/// Query parameters after expression compilation.
pub struct QueryParams<'a> {
    pub schema: &'a TableSchema,
    pub index: Option<&'a GsiSchema>,
    pub key_condition: KeyCondition,
    pub filter: Option<&'a Condition>,
    pub projection: Option<&'a [DocumentPath]>,
    pub scan_index_forward: bool,
    pub limit: Option<u32>,
    pub start_key: Option<&'a Item>,
}

/// Scan parameters after expression compilation.
pub struct ScanParams<'a> {
    pub schema: &'a TableSchema,
    pub index: Option<&'a GsiSchema>,
    pub filter: Option<&'a Condition>,
    pub projection: Option<&'a [DocumentPath]>,
    pub limit: Option<u32>,
    pub start_key: Option<&'a Item>,
    pub segment: Option<(u32, u32)>,
}

fn order(forward: bool) -> Order {
    if forward {
        Order::Asc
    } else {
        Order::Desc
    }
}

/// Typed column triple for a key position on either relation.
struct KeyCols {
    s: Items,
    n: Items,
    b: Items,
}

struct GsiKeyCols {
    s: GsiProjections,
    n: GsiProjections,
    b: GsiProjections,
}

const BASE_HASH: KeyCols = KeyCols {
    s: Items::HashS,
    n: Items::HashN,
    b: Items::HashB,
};
const BASE_RANGE: KeyCols = KeyCols {
    s: Items::RangeS,
    n: Items::RangeN,
    b: Items::RangeB,
};
const GSI_HASH: GsiKeyCols = GsiKeyCols {
    s: GsiProjections::GsiHashS,
    n: GsiProjections::GsiHashN,
    b: GsiProjections::GsiHashB,
};
const GSI_RANGE: GsiKeyCols = GsiKeyCols {
    s: GsiProjections::GsiRangeS,
    n: GsiProjections::GsiRangeN,
    b: GsiProjections::GsiRangeB,
};

impl ItemStore {
    /// Execute a compiled Query against the base table or a GSI.
    pub async fn query(&self, params: QueryParams<'_>) -> Result<ReadPage> {
        match params.index {
            Some(gsi) => self.query_gsi(&params, gsi).await,
            None => self.query_base(&params).await,
        }
    }

    async fn query_base(&self, params: &QueryParams<'_>) -> Result<ReadPage> {
        let schema = params.schema;
        let key = &schema.key;
        if !key.hash.key_type.matches(&params.key_condition.hash_value) {
            return Err(PdbError::validation("hash key value has the wrong type"));
        }

        let mut stmt = Query::select()
            .columns([Items::PayloadJson, Items::KeyJson])
            .from(Items::Table)
            .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
            .to_owned();
        key_equals_base(&mut stmt, &key.hash, &params.key_condition.hash_value, &BASE_HASH)?;

        let range_attr = key.range.as_ref();
        if let Some(range_cond) = &params.key_condition.range {
            let range_attr = range_attr.ok_or_else(|| {
                PdbError::validation("key condition constrains a range key the table lacks")
            })?;
            apply_range_condition_base(&mut stmt, range_attr, range_cond)?;
        }

        // Cursor: the range key is unique within a hash, so a strict
        // inequality on it resumes after the last returned row.
        if let Some(start) = params.start_key {
            let cursor = decode_start_key(schema, None, start)?;
            match (range_attr, cursor.range_value) {
                (Some(range_attr), Some(value)) => {
                    let cols = KeyColumns::from_value(&value)?;
                    let col = base_col_for(&range_attr.key_type, &BASE_RANGE);
                    if params.scan_index_forward {
                        stmt.and_where(key_col_expr(col, &cols).1);
                    } else {
                        stmt.and_where(key_col_expr(col, &cols).0);
                    }
                }
                _ => {
                    // Hash-only table: the single item was already served.
                    return Ok(ReadPage {
                        items: vec![],
                        count: 0,
                        scanned_count: 0,
                        last_evaluated_key: None,
                    });
                }
            }
        }

        if let Some(range_attr) = range_attr {
            stmt.order_by(
                base_col_for(&range_attr.key_type, &BASE_RANGE),
                order(params.scan_index_forward),
            );
        }
        if let Some(limit) = params.limit {
            stmt.limit(u64::from(limit));
        }

        let rows = self
            .executor()
            .fetch_all(&self.dialect().select(&stmt)?)
            .await?;
        let mut scanned = Vec::with_capacity(rows.len());
        for row in &rows {
            scanned.push(self.decode_payload(&schema.table_name, row.text("payload_json")?)?);
        }

        let last_evaluated_key = last_key_if_limited(params.limit, &scanned, |item| {
            last_key_for_table(schema, item)
        })?;
        finish_page(scanned, params.filter, params.projection, last_evaluated_key)
    }

    async fn query_gsi(&self, params: &QueryParams<'_>, gsi: &GsiSchema) -> Result<ReadPage> {
        let schema = params.schema;
        if !gsi.key.hash.key_type.matches(&params.key_condition.hash_value) {
            return Err(PdbError::validation("hash key value has the wrong type"));
        }

        let mut stmt = Query::select()
            .columns([GsiProjections::PayloadJson, GsiProjections::BaseKeyJson])
            .from(GsiProjections::Table)
            .and_where(Expr::col(GsiProjections::TableName).eq(schema.table_name.as_str()))
            .and_where(Expr::col(GsiProjections::IndexName).eq(gsi.index_name.as_str()))
            .to_owned();
        key_equals_gsi(&mut stmt, &gsi.key.hash, &params.key_condition.hash_value, &GSI_HASH)?;

        let range_attr = gsi.key.range.as_ref();
        if let Some(range_cond) = &params.key_condition.range {
            let range_attr = range_attr.ok_or_else(|| {
                PdbError::validation("key condition constrains a range key the index lacks")
            })?;
            apply_range_condition_gsi(&mut stmt, range_attr, range_cond)?;
        }

        // GSI keys are not unique, so the cursor is the tuple
        // (range, base key); without a range key it is the base key alone.
        if let Some(start) = params.start_key {
            let cursor = decode_start_key(schema, Some(gsi), start)?;
            let base_start = cursor.base_key_json;
            match (range_attr, cursor.range_value) {
                (Some(range_attr), Some(value)) => {
                    let cols = KeyColumns::from_value(&value)?;
                    let col = gsi_col_for(&range_attr.key_type, &GSI_RANGE);
                    let (less, greater) = key_col_expr(col, &cols);
                    let eq = key_col_eq(col, &cols);
                    let tiebreak = if params.scan_index_forward {
                        Expr::col(GsiProjections::BaseKeyJson).gt(base_start.as_str())
                    } else {
                        Expr::col(GsiProjections::BaseKeyJson).lt(base_start.as_str())
                    };
                    let beyond = if params.scan_index_forward { greater } else { less };
                    stmt.and_where(beyond.or(eq.and(tiebreak)));
                }
                _ => {
                    let tiebreak = if params.scan_index_forward {
                        Expr::col(GsiProjections::BaseKeyJson).gt(base_start.as_str())
                    } else {
                        Expr::col(GsiProjections::BaseKeyJson).lt(base_start.as_str())
                    };
                    stmt.and_where(tiebreak);
                }
            }
        }

        if let Some(range_attr) = range_attr {
            stmt.order_by(
                gsi_col_for(&range_attr.key_type, &GSI_RANGE),
                order(params.scan_index_forward),
            );
        }
        stmt.order_by(GsiProjections::BaseKeyJson, order(params.scan_index_forward));
        if let Some(limit) = params.limit {
            stmt.limit(u64::from(limit));
        }

        let rows = self
            .executor()
            .fetch_all(&self.dialect().select(&stmt)?)
            .await?;
        let mut scanned = Vec::with_capacity(rows.len());
        let mut base_keys = Vec::with_capacity(rows.len());
        for row in &rows {
            scanned.push(self.decode_payload(&schema.table_name, row.text("payload_json")?)?);
            base_keys.push(item_from_string(row.text("base_key_json")?)?);
        }

        let last_evaluated_key = match (params.limit, scanned.last()) {
            (Some(limit), Some(last)) if scanned.len() as u32 == limit => {
                // GSI cursors carry both the index keys and the base key.
                let base = base_keys.last().cloned().expect("aligned with scanned");
                Some(last_key_for_index(gsi, base, last))
            }
            _ => None,
        };
        finish_page(scanned, params.filter, params.projection, last_evaluated_key)
    }

    /// Execute a compiled Scan over the base table or a GSI, in
    /// deterministic key order.
    pub async fn scan(&self, params: ScanParams<'_>) -> Result<ReadPage> {
        if let Some((segment, total)) = params.segment {
            if total == 0 || segment >= total {
                return Err(PdbError::validation(
                    "segment must be less than total segments",
                ));
            }
            if params.index.is_some() {
                return Err(PdbError::validation(
                    "segmented scans are not supported on secondary indexes",
                ));
            }
        }
        match params.index {
            Some(gsi) => self.scan_gsi(&params, gsi).await,
            None => self.scan_base(&params).await,
        }
    }

    async fn scan_base(&self, params: &ScanParams<'_>) -> Result<ReadPage> {
        let schema = params.schema;
        let mut stmt = Query::select()
            .columns([Items::PayloadJson, Items::KeyJson])
            .from(Items::Table)
            .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
            .order_by(Items::KeyJson, Order::Asc)
            .to_owned();
        if let Some((segment, total)) = params.segment {
            stmt.and_where(Expr::cust_with_values(
                "segment_hash % ? = ?",
                [i64::from(total), i64::from(segment)],
            ));
        }
        if let Some(start) = params.start_key {
            let cursor = decode_start_key(schema, None, start)?;
            stmt.and_where(Expr::col(Items::KeyJson).gt(cursor.base_key_json));
        }
        if let Some(limit) = params.limit {
            stmt.limit(u64::from(limit));
        }

        let rows = self
            .executor()
            .fetch_all(&self.dialect().select(&stmt)?)
            .await?;
        let mut scanned = Vec::with_capacity(rows.len());
        let mut row_keys = Vec::with_capacity(rows.len());
        for row in &rows {
            scanned.push(self.decode_payload(&schema.table_name, row.text("payload_json")?)?);
            row_keys.push(item_from_string(row.text("key_json")?)?);
        }

        let last_evaluated_key = match (params.limit, row_keys.last()) {
            (Some(limit), Some(last)) if scanned.len() as u32 == limit => Some(last.clone()),
            _ => None,
        };
        finish_page(scanned, params.filter, params.projection, last_evaluated_key)
    }

    async fn scan_gsi(&self, params: &ScanParams<'_>, gsi: &GsiSchema) -> Result<ReadPage> {
        let schema = params.schema;
        let mut stmt = Query::select()
            .columns([GsiProjections::PayloadJson, GsiProjections::BaseKeyJson])
            .from(GsiProjections::Table)
            .and_where(Expr::col(GsiProjections::TableName).eq(schema.table_name.as_str()))
            .and_where(Expr::col(GsiProjections::IndexName).eq(gsi.index_name.as_str()))
            .order_by(GsiProjections::BaseKeyJson, Order::Asc)
            .to_owned();
        if let Some(start) = params.start_key {
            let cursor = decode_start_key(schema, None, start)?;
            stmt.and_where(Expr::col(GsiProjections::BaseKeyJson).gt(cursor.base_key_json));
        }
        if let Some(limit) = params.limit {
            stmt.limit(u64::from(limit));
        }

        let rows = self
            .executor()
            .fetch_all(&self.dialect().select(&stmt)?)
            .await?;
        let mut scanned = Vec::with_capacity(rows.len());
        let mut base_keys = Vec::with_capacity(rows.len());
        for row in &rows {
            scanned.push(self.decode_payload(&schema.table_name, row.text("payload_json")?)?);
            base_keys.push(item_from_string(row.text("base_key_json")?)?);
        }

        let last_evaluated_key = match (params.limit, base_keys.last(), scanned.last()) {
            (Some(limit), Some(base), Some(item)) if scanned.len() as u32 == limit => {
                Some(last_key_for_index(gsi, base.clone(), item))
            }
            _ => None,
        };
        finish_page(scanned, params.filter, params.projection, last_evaluated_key)
    }
}

/// Filter after the limit cut, then project.
fn finish_page(
    scanned: Vec<Item>,
    filter: Option<&Condition>,
    projection: Option<&[DocumentPath]>,
    last_evaluated_key: Option<Item>,
) -> Result<ReadPage> {
    let scanned_count = scanned.len();
    let mut items = Vec::with_capacity(scanned.len());
    for item in scanned {
        let keep = match filter {
            Some(filter) => eval_condition(filter, &item)?,
            None => true,
        };
        if keep {
            items.push(match projection {
                Some(paths) => project_item(&item, paths),
                None => item,
            });
        }
    }
    Ok(ReadPage {
        count: items.len(),
        items,
        scanned_count,
        last_evaluated_key,
    })
}

fn last_key_if_limited(
    limit: Option<u32>,
    scanned: &[Item],
    key_of: impl Fn(&Item) -> Result<Item>,
) -> Result<Option<Item>> {
    match (limit, scanned.last()) {
        (Some(limit), Some(last)) if scanned.len() as u32 == limit => Ok(Some(key_of(last)?)),
        _ => Ok(None),
    }
}

fn base_col_for(key_type: &KeyType, cols: &KeyCols) -> Items {
    match key_type {
        KeyType::S => cols.s,
        KeyType::N => cols.n,
        KeyType::B => cols.b,
    }
}

fn gsi_col_for(key_type: &KeyType, cols: &GsiKeyCols) -> GsiProjections {
    match key_type {
        KeyType::S => cols.s,
        KeyType::N => cols.n,
        KeyType::B => cols.b,
    }
}

/// `(col < value, col > value)` comparison pair for a key value.
fn key_col_expr<C: sea_query::IntoColumnRef + Copy>(
    col: C,
    cols: &KeyColumns,
) -> (sea_query::SimpleExpr, sea_query::SimpleExpr) {
    if let Some(s) = &cols.s {
        (
            Expr::col(col).lt(s.as_str()),
            Expr::col(col).gt(s.as_str()),
        )
    } else if let Some(n) = &cols.n {
        (
            Expr::col(col).lt(n.clone()),
            Expr::col(col).gt(n.clone()),
        )
    } else if let Some(b) = &cols.b {
        (
            Expr::col(col).lt(b.as_str()),
            Expr::col(col).gt(b.as_str()),
        )
    } else {
        unreachable!("key columns always carry one value")
    }
}

fn key_col_eq<C: sea_query::IntoColumnRef + Copy>(
    col: C,
    cols: &KeyColumns,
) -> sea_query::SimpleExpr {
    if let Some(s) = &cols.s {
        Expr::col(col).eq(s.as_str())
    } else if let Some(n) = &cols.n {
        Expr::col(col).eq(n.clone())
    } else if let Some(b) = &cols.b {
        Expr::col(col).eq(b.as_str())
    } else {
        unreachable!("key columns always carry one value")
    }
}

fn key_equals_base(
    stmt: &mut SelectStatement,
    attr: &KeyAttribute,
    value: &crate::types::AttributeValue,
    cols: &KeyCols,
) -> Result<()> {
    let key_cols = KeyColumns::from_value(value)?;
    stmt.and_where(key_col_eq(base_col_for(&attr.key_type, cols), &key_cols));
    Ok(())
}

fn key_equals_gsi(
    stmt: &mut SelectStatement,
    attr: &KeyAttribute,
    value: &crate::types::AttributeValue,
    cols: &GsiKeyCols,
) -> Result<()> {
    let key_cols = KeyColumns::from_value(value)?;
    stmt.and_where(key_col_eq(gsi_col_for(&attr.key_type, cols), &key_cols));
    Ok(())
}

fn apply_range_condition_base(
    stmt: &mut SelectStatement,
    attr: &KeyAttribute,
    cond: &RangeCondition,
) -> Result<()> {
    let col = base_col_for(&attr.key_type, &BASE_RANGE);
    apply_range_condition(stmt, col, attr, cond)
}

fn apply_range_condition_gsi(
    stmt: &mut SelectStatement,
    attr: &KeyAttribute,
    cond: &RangeCondition,
) -> Result<()> {
    let col = gsi_col_for(&attr.key_type, &GSI_RANGE);
    apply_range_condition(stmt, col, attr, cond)
}

fn apply_range_condition<C: sea_query::IntoColumnRef + Copy>(
    stmt: &mut SelectStatement,
    col: C,
    attr: &KeyAttribute,
    cond: &RangeCondition,
) -> Result<()> {
    match cond {
        RangeCondition::Eq(v) => {
            stmt.and_where(key_col_eq(col, &KeyColumns::from_value(v)?));
        }
        RangeCondition::Lt(v) => {
            stmt.and_where(key_col_expr(col, &KeyColumns::from_value(v)?).0);
        }
        RangeCondition::Gt(v) => {
            stmt.and_where(key_col_expr(col, &KeyColumns::from_value(v)?).1);
        }
        RangeCondition::Le(v) => {
            let cols = KeyColumns::from_value(v)?;
            let (less, _) = key_col_expr(col, &cols);
            stmt.and_where(less.or(key_col_eq(col, &cols)));
        }
        RangeCondition::Ge(v) => {
            let cols = KeyColumns::from_value(v)?;
            let (_, greater) = key_col_expr(col, &cols);
            stmt.and_where(greater.or(key_col_eq(col, &cols)));
        }
        RangeCondition::Between(lo, hi) => {
            let lo_cols = KeyColumns::from_value(lo)?;
            let hi_cols = KeyColumns::from_value(hi)?;
            let (_, greater) = key_col_expr(col, &lo_cols);
            let (less, _) = key_col_expr(col, &hi_cols);
            stmt.and_where(greater.or(key_col_eq(col, &lo_cols)));
            stmt.and_where(less.or(key_col_eq(col, &hi_cols)));
        }
        RangeCondition::BeginsWith(v) => {
            let pattern = match (&attr.key_type, v) {
                (KeyType::S, crate::types::AttributeValue::S(prefix)) => {
                    format!("{}%", escape_like(prefix))
                }
                (KeyType::B, crate::types::AttributeValue::B(prefix)) => {
                    format!("{}%", hex::encode(prefix))
                }
                _ => {
                    return Err(PdbError::validation(
                        "begins_with requires a string or binary range key",
                    ))
                }
            };
            stmt.and_where(Expr::col(col).like(LikeExpr::new(pattern).escape('\\')));
        }
    }
    Ok(())
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off\\x"), "50\\%\\_off\\\\x");
    }
}
