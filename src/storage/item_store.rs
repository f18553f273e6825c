//! Item store: PutItem, GetItem, UpdateItem, DeleteItem.
//!
//! Every mutation runs as one SQL transaction: lock the existing row,
//! evaluate the condition against the pre-image, persist the item row,
//! maintain GSI projection rows, append the stream record, commit. Partial
//! visibility is impossible. Transient backend failures retry the whole
//! transaction with backoff.

use std::collections::BTreeSet;
use std::sync::Arc;

use backon::Retryable;
use sea_query::{Expr, ExprTrait, OnConflict, Query};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::encryption::AttributeEncryption;
use crate::error::{PdbError, Result};
use crate::expression::ast::Condition;
use crate::expression::eval::eval_condition;
use crate::expression::{project_item, DocumentPath, UpdateExpression};
use crate::storage::executor::{SqlDialect, SqlExecutor, SqlTx};
use crate::storage::keys::{self, KeyColumns};
use crate::storage::retry;
use crate::storage::schema::{GsiProjections, Items};
use crate::streams::{self, CaptureContext, StreamEvent, UserIdentity};
use crate::types::attribute::{
    item_from_string, item_size_bytes, item_to_string, validate_item, AttributeValue, Item,
};
use crate::types::schema::{
    GsiSchema, ProjectionType, ReturnValues, TableSchema,
};

/// DynamoDB's 400 KB item ceiling, applied to the serialized payload.
pub const MAX_ITEM_BYTES: usize = 400 * 1024;

/// SQL-backed item store.
pub struct ItemStore {
    executor: Arc<dyn SqlExecutor>,
    encryption: Arc<dyn AttributeEncryption>,
    clock: Arc<dyn Clock>,
}

impl ItemStore {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        encryption: Arc<dyn AttributeEncryption>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            encryption,
            clock,
        }
    }

    pub(crate) fn executor(&self) -> &Arc<dyn SqlExecutor> {
        &self.executor
    }

    pub(crate) fn dialect(&self) -> SqlDialect {
        self.executor.dialect()
    }

    pub(crate) fn encode_payload(&self, table: &str, item: &Item) -> Result<String> {
        self.encryption.encrypt(table, item_to_string(item))
    }

    pub(crate) fn decode_payload(&self, table: &str, text: &str) -> Result<Item> {
        let plain = self.encryption.decrypt(table, text.to_string())?;
        item_from_string(&plain)
    }

    // ---- public operations ----

    /// Full-replacement put. Returns the pre/post image slice selected by
    /// `return_values`.
    pub async fn put_item(
        &self,
        schema: &TableSchema,
        item: Item,
        condition: Option<&Condition>,
        return_values: ReturnValues,
    ) -> Result<Option<Item>> {
        validate_item(&item)?;
        guard_item_size(&item)?;
        validate_gsi_key_types(schema, &item)?;
        let key = schema.extract_key(&item)?;
        let key_json = keys::key_json(schema, &key);
        let key_item = schema.key_item(&key);

        let pre = (|| self.put_once(schema, &item, &key_json, &key_item, condition))
            .retry(retry::write_backoff())
            .when(PdbError::is_transient)
            .notify(|err: &PdbError, delay| {
                warn!(error = %err, delay = ?delay, "Retrying put after transient failure");
            })
            .await
            .map_err(PdbError::demote_transient)?;

        let changed = changed_attributes(pre.as_ref(), Some(&item));
        Ok(apply_return_values(
            return_values,
            pre.as_ref(),
            Some(&item),
            &changed,
        ))
    }

    async fn put_once(
        &self,
        schema: &TableSchema,
        item: &Item,
        key_json: &str,
        key_item: &Item,
        condition: Option<&Condition>,
    ) -> Result<Option<Item>> {
        let mut tx = self.executor.begin(false).await?;
        let pre = self.lock_preimage(tx.as_mut(), schema, key_json).await?;
        check_condition(condition, pre.as_ref())?;
        self.persist_item(tx.as_mut(), schema, key_json, pre.as_ref(), item)
            .await?;
        let event = if pre.is_some() {
            StreamEvent::Modify
        } else {
            StreamEvent::Insert
        };
        self.capture(tx.as_mut(), schema, event, key_item, pre.as_ref(), Some(item), None)
            .await?;
        tx.commit().await?;
        Ok(pre)
    }

    /// Point read by primary key. A missing item is an empty result, not
    /// an error.
    pub async fn get_item(
        &self,
        schema: &TableSchema,
        key_map: &Item,
        projection: Option<&[DocumentPath]>,
    ) -> Result<Option<Item>> {
        let key = schema.validate_key_map(key_map)?;
        let key_json = keys::key_json(schema, &key);
        let query = {
            let stmt = Query::select()
                .column(Items::PayloadJson)
                .from(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                .and_where(Expr::col(Items::KeyJson).eq(key_json.as_str()))
                .to_owned();
            self.dialect().select(&stmt)?
        };
        let row = self.executor.fetch_optional(&query).await?;
        let item = match row {
            Some(row) => Some(self.decode_payload(&schema.table_name, row.text("payload_json")?)?),
            None => None,
        };
        Ok(match (item, projection) {
            (Some(item), Some(paths)) => Some(project_item(&item, paths)),
            (item, _) => item,
        })
    }

    /// Apply an update expression with upsert semantics: an absent item
    /// evaluates as empty, and the key attributes join the post-image.
    pub async fn update_item(
        &self,
        schema: &TableSchema,
        key_map: &Item,
        update: &UpdateExpression,
        condition: Option<&Condition>,
        return_values: ReturnValues,
    ) -> Result<Option<Item>> {
        let key = schema.validate_key_map(key_map)?;
        for action in &update.actions {
            if schema.key.contains(action.path().root_name()) {
                return Err(PdbError::validation(format!(
                    "update expression may not modify key attribute {}",
                    action.path().root_name()
                )));
            }
        }
        let key_json = keys::key_json(schema, &key);
        let key_item = schema.key_item(&key);

        let (pre, post, changed) =
            (|| self.update_once(schema, update, &key_json, &key_item, condition))
                .retry(retry::write_backoff())
                .when(PdbError::is_transient)
                .notify(|err: &PdbError, delay| {
                    warn!(error = %err, delay = ?delay, "Retrying update after transient failure");
                })
                .await
                .map_err(PdbError::demote_transient)?;

        Ok(apply_return_values(
            return_values,
            pre.as_ref(),
            Some(&post),
            &changed,
        ))
    }

    async fn update_once(
        &self,
        schema: &TableSchema,
        update: &UpdateExpression,
        key_json: &str,
        key_item: &Item,
        condition: Option<&Condition>,
    ) -> Result<(Option<Item>, Item, BTreeSet<String>)> {
        let mut tx = self.executor.begin(false).await?;
        let pre = self.lock_preimage(tx.as_mut(), schema, key_json).await?;
        check_condition(condition, pre.as_ref())?;

        let base = pre.clone().unwrap_or_default();
        let outcome = crate::expression::apply_update(update, &base)?;
        let mut post = outcome.post;
        for (name, value) in key_item {
            post.insert(name.clone(), value.clone());
        }
        validate_item(&post)?;
        guard_item_size(&post)?;
        validate_gsi_key_types(schema, &post)?;

        self.persist_item(tx.as_mut(), schema, key_json, pre.as_ref(), &post)
            .await?;
        let event = if pre.is_some() {
            StreamEvent::Modify
        } else {
            StreamEvent::Insert
        };
        self.capture(tx.as_mut(), schema, event, key_item, pre.as_ref(), Some(&post), None)
            .await?;
        tx.commit().await?;
        Ok((pre, post, outcome.changed))
    }

    /// Delete by primary key. Deleting a non-existent item succeeds and
    /// emits no stream record, unless a condition demands existence.
    pub async fn delete_item(
        &self,
        schema: &TableSchema,
        key_map: &Item,
        condition: Option<&Condition>,
        return_values: ReturnValues,
    ) -> Result<Option<Item>> {
        let key = schema.validate_key_map(key_map)?;
        let key_json = keys::key_json(schema, &key);
        let key_item = schema.key_item(&key);

        let pre = (|| self.delete_once(schema, &key_json, &key_item, condition))
            .retry(retry::write_backoff())
            .when(PdbError::is_transient)
            .notify(|err: &PdbError, delay| {
                warn!(error = %err, delay = ?delay, "Retrying delete after transient failure");
            })
            .await
            .map_err(PdbError::demote_transient)?;

        let changed = changed_attributes(pre.as_ref(), None);
        Ok(apply_return_values(return_values, pre.as_ref(), None, &changed))
    }

    async fn delete_once(
        &self,
        schema: &TableSchema,
        key_json: &str,
        key_item: &Item,
        condition: Option<&Condition>,
    ) -> Result<Option<Item>> {
        let mut tx = self.executor.begin(false).await?;
        let pre = self.lock_preimage(tx.as_mut(), schema, key_json).await?;
        check_condition(condition, pre.as_ref())?;
        if let Some(pre_image) = &pre {
            self.remove_item(tx.as_mut(), schema, key_json).await?;
            self.capture(
                tx.as_mut(),
                schema,
                StreamEvent::Remove,
                key_item,
                Some(pre_image),
                None,
                None,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(pre)
    }

    /// TTL-originated delete: re-checks expiry under the row lock so a
    /// concurrent update that pushed the expiry out wins. Returns whether
    /// the item was removed.
    pub async fn ttl_delete(
        &self,
        schema: &TableSchema,
        key_map: &Item,
        now_seconds: i64,
        principal: &str,
    ) -> Result<bool> {
        let key = schema.validate_key_map(key_map)?;
        let key_json = keys::key_json(schema, &key);
        let key_item = schema.key_item(&key);
        let Some(ttl_attr) = schema.ttl_attribute().map(str::to_string) else {
            return Ok(false);
        };

        let removed = (|| async {
            let mut tx = self.executor.begin(false).await?;
            let pre = self.lock_preimage(tx.as_mut(), schema, &key_json).await?;
            let Some(pre_image) = pre else {
                tx.commit().await?;
                return Ok(false);
            };
            let still_expired = keys::ttl_epoch_of(pre_image.get(ttl_attr.as_str()))
                .is_some_and(|epoch| epoch <= now_seconds);
            if !still_expired {
                tx.commit().await?;
                return Ok(false);
            }
            self.remove_item(tx.as_mut(), schema, &key_json).await?;
            self.capture(
                tx.as_mut(),
                schema,
                StreamEvent::Remove,
                &key_item,
                Some(&pre_image),
                None,
                Some(UserIdentity::service(principal)),
            )
            .await?;
            tx.commit().await?;
            Ok(true)
        })
        .retry(retry::write_backoff())
        .when(PdbError::is_transient)
        .await
        .map_err(PdbError::demote_transient)?;

        if removed {
            debug!(table = %schema.table_name, "TTL removed expired item");
        }
        Ok(removed)
    }

    // ---- transaction-scoped primitives (shared with the coordinator) ----

    /// Plain (unlocked) read of a key inside an open transaction.
    pub(crate) async fn read_in_tx(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        key_json: &str,
    ) -> Result<Option<Item>> {
        let query = {
            let stmt = Query::select()
                .column(Items::PayloadJson)
                .from(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                .and_where(Expr::col(Items::KeyJson).eq(key_json))
                .to_owned();
            self.dialect().select(&stmt)?
        };
        let row = tx.fetch_optional(&query).await?;
        match row {
            Some(row) => Ok(Some(
                self.decode_payload(&schema.table_name, row.text("payload_json")?)?,
            )),
            None => Ok(None),
        }
    }

    /// Read and row-lock the current image of a key.
    pub(crate) async fn lock_preimage(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        key_json: &str,
    ) -> Result<Option<Item>> {
        let stmt = Query::select()
            .column(Items::PayloadJson)
            .from(Items::Table)
            .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
            .and_where(Expr::col(Items::KeyJson).eq(key_json))
            .to_owned();
        let row = tx
            .fetch_optional(&self.dialect().select_locked(stmt)?)
            .await?;
        match row {
            Some(row) => Ok(Some(
                self.decode_payload(&schema.table_name, row.text("payload_json")?)?,
            )),
            None => Ok(None),
        }
    }

    /// Upsert the item row and bring GSI projections in line.
    pub(crate) async fn persist_item(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        key_json: &str,
        pre: Option<&Item>,
        post: &Item,
    ) -> Result<()> {
        let key = schema.extract_key(post)?;
        let hash_cols = KeyColumns::from_value(&key.hash)?;
        let range_cols = match &key.range {
            Some(range) => KeyColumns::from_value(range)?,
            None => KeyColumns::none(),
        };
        let ttl_epoch = schema
            .ttl_attribute()
            .and_then(|attr| keys::ttl_epoch_of(post.get(attr)));
        let payload = self.encode_payload(&schema.table_name, post)?;

        let query = {
            let stmt = Query::insert()
                .into_table(Items::Table)
                .columns([
                    Items::TableName,
                    Items::KeyJson,
                    Items::HashS,
                    Items::HashN,
                    Items::HashB,
                    Items::RangeS,
                    Items::RangeN,
                    Items::RangeB,
                    Items::PayloadJson,
                    Items::TtlEpoch,
                    Items::SegmentHash,
                ])
                .values_panic([
                    schema.table_name.as_str().into(),
                    key_json.into(),
                    hash_cols.s.into(),
                    hash_cols.n.into(),
                    hash_cols.b.into(),
                    range_cols.s.into(),
                    range_cols.n.into(),
                    range_cols.b.into(),
                    payload.into(),
                    ttl_epoch.into(),
                    keys::segment_hash(key_json).into(),
                ])
                .on_conflict(
                    OnConflict::columns([Items::TableName, Items::KeyJson])
                        .update_columns([Items::PayloadJson, Items::TtlEpoch])
                        .to_owned(),
                )
                .to_owned();
            self.dialect().insert(&stmt)?
        };
        tx.execute(&query).await?;

        self.maintain_gsis(tx, schema, key_json, pre, Some(post)).await
    }

    /// Delete the item row and all of its GSI projections.
    pub(crate) async fn remove_item(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        key_json: &str,
    ) -> Result<()> {
        let query = {
            let stmt = Query::delete()
                .from_table(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                .and_where(Expr::col(Items::KeyJson).eq(key_json))
                .to_owned();
            self.dialect().delete(&stmt)?
        };
        tx.execute(&query).await?;

        let query = {
            let stmt = Query::delete()
                .from_table(GsiProjections::Table)
                .and_where(Expr::col(GsiProjections::TableName).eq(schema.table_name.as_str()))
                .and_where(Expr::col(GsiProjections::BaseKeyJson).eq(key_json))
                .to_owned();
            self.dialect().delete(&stmt)?
        };
        tx.execute(&query).await?;
        Ok(())
    }

    /// GSI row existence follows presence of the GSI key attributes on the
    /// new image; the projection row is keyed by the base key, so a key
    /// change is a plain upsert.
    async fn maintain_gsis(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        base_key_json: &str,
        pre: Option<&Item>,
        post: Option<&Item>,
    ) -> Result<()> {
        for gsi in &schema.gsis {
            let old_keys = pre.and_then(|item| gsi_key_values(gsi, item).ok().flatten());
            let new_keys = match post {
                Some(item) => gsi_key_values(gsi, item)?,
                None => None,
            };
            match new_keys {
                Some((gsi_hash, gsi_range)) => {
                    let post = post.expect("new keys imply a post image");
                    let payload = self.encode_payload(
                        &schema.table_name,
                        &projection_payload(schema, gsi, post),
                    )?;
                    let hash_cols = KeyColumns::from_value(&gsi_hash)?;
                    let range_cols = match &gsi_range {
                        Some(range) => KeyColumns::from_value(range)?,
                        None => KeyColumns::none(),
                    };
                    let query = {
                        let stmt = Query::insert()
                            .into_table(GsiProjections::Table)
                            .columns([
                                GsiProjections::TableName,
                                GsiProjections::IndexName,
                                GsiProjections::BaseKeyJson,
                                GsiProjections::GsiHashS,
                                GsiProjections::GsiHashN,
                                GsiProjections::GsiHashB,
                                GsiProjections::GsiRangeS,
                                GsiProjections::GsiRangeN,
                                GsiProjections::GsiRangeB,
                                GsiProjections::PayloadJson,
                            ])
                            .values_panic([
                                schema.table_name.as_str().into(),
                                gsi.index_name.as_str().into(),
                                base_key_json.into(),
                                hash_cols.s.into(),
                                hash_cols.n.into(),
                                hash_cols.b.into(),
                                range_cols.s.into(),
                                range_cols.n.into(),
                                range_cols.b.into(),
                                payload.into(),
                            ])
                            .on_conflict(
                                OnConflict::columns([
                                    GsiProjections::TableName,
                                    GsiProjections::IndexName,
                                    GsiProjections::BaseKeyJson,
                                ])
                                .update_columns([
                                    GsiProjections::GsiHashS,
                                    GsiProjections::GsiHashN,
                                    GsiProjections::GsiHashB,
                                    GsiProjections::GsiRangeS,
                                    GsiProjections::GsiRangeN,
                                    GsiProjections::GsiRangeB,
                                    GsiProjections::PayloadJson,
                                ])
                                .to_owned(),
                            )
                            .to_owned();
                        self.dialect().insert(&stmt)?
                    };
                    tx.execute(&query).await?;
                }
                None if old_keys.is_some() => {
                    let query = {
                        let stmt = Query::delete()
                            .from_table(GsiProjections::Table)
                            .and_where(
                                Expr::col(GsiProjections::TableName)
                                    .eq(schema.table_name.as_str()),
                            )
                            .and_where(
                                Expr::col(GsiProjections::IndexName).eq(gsi.index_name.as_str()),
                            )
                            .and_where(Expr::col(GsiProjections::BaseKeyJson).eq(base_key_json))
                            .to_owned();
                        self.dialect().delete(&stmt)?
                    };
                    tx.execute(&query).await?;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Append the stream record for a mutation, when the table streams.
    pub(crate) async fn capture(
        &self,
        tx: &mut dyn SqlTx,
        schema: &TableSchema,
        event: StreamEvent,
        key_item: &Item,
        old_image: Option<&Item>,
        new_image: Option<&Item>,
        user_identity: Option<UserIdentity>,
    ) -> Result<()> {
        let (Some(view), Some(stream_id)) = (schema.stream_view, schema.stream_id.as_deref())
        else {
            return Ok(());
        };
        let ctx = CaptureContext {
            table: &schema.table_name,
            stream_id,
            view,
            encryption: self.encryption.as_ref(),
            user_identity,
            now_millis: self.clock.now_millis(),
        };
        streams::capture_record(tx, self.dialect(), &ctx, event, key_item, old_image, new_image)
            .await?;
        Ok(())
    }
}

/// Evaluate a condition against the pre-image (absent means empty).
pub(crate) fn check_condition(condition: Option<&Condition>, pre: Option<&Item>) -> Result<()> {
    if let Some(condition) = condition {
        let empty = Item::new();
        let subject = pre.unwrap_or(&empty);
        if !eval_condition(condition, subject)? {
            return Err(PdbError::ConditionalCheckFailed(
                "the conditional request failed".to_string(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn guard_item_size(item: &Item) -> Result<()> {
    let size = item_size_bytes(item);
    if size > MAX_ITEM_BYTES {
        return Err(PdbError::validation(format!(
            "item size {size} exceeds the {MAX_ITEM_BYTES}-byte limit"
        )));
    }
    Ok(())
}

/// GSI key attributes carried by an item: `Ok(None)` when the item does
/// not qualify for the index, an error when a key attribute is present
/// with the wrong type.
pub(crate) fn gsi_key_values(
    gsi: &GsiSchema,
    item: &Item,
) -> Result<Option<(AttributeValue, Option<AttributeValue>)>> {
    let Some(hash) = item.get(&gsi.key.hash.name) else {
        return Ok(None);
    };
    if !gsi.key.hash.key_type.matches(hash) {
        return Err(PdbError::validation(format!(
            "attribute {} must be of type {} for index {}",
            gsi.key.hash.name,
            gsi.key.hash.key_type.name(),
            gsi.index_name
        )));
    }
    let range = match &gsi.key.range {
        Some(range_attr) => {
            let Some(value) = item.get(&range_attr.name) else {
                return Ok(None);
            };
            if !range_attr.key_type.matches(value) {
                return Err(PdbError::validation(format!(
                    "attribute {} must be of type {} for index {}",
                    range_attr.name,
                    range_attr.key_type.name(),
                    gsi.index_name
                )));
            }
            Some(value.clone())
        }
        None => None,
    };
    Ok(Some((hash.clone(), range)))
}

pub(crate) fn validate_gsi_key_types(schema: &TableSchema, item: &Item) -> Result<()> {
    for gsi in &schema.gsis {
        gsi_key_values(gsi, item)?;
    }
    Ok(())
}

/// The attribute set a GSI stores for one item, per its projection type.
pub(crate) fn projection_payload(schema: &TableSchema, gsi: &GsiSchema, item: &Item) -> Item {
    match gsi.projection {
        ProjectionType::All => item.clone(),
        ProjectionType::KeysOnly => {
            let mut names: Vec<&str> = schema.key.attribute_names();
            names.extend(gsi.key.attribute_names());
            restrict(item, &names)
        }
        ProjectionType::Include => {
            let mut names: Vec<&str> = schema.key.attribute_names();
            names.extend(gsi.key.attribute_names());
            names.extend(gsi.non_key_attributes.iter().map(String::as_str));
            restrict(item, &names)
        }
    }
}

fn restrict(item: &Item, names: &[&str]) -> Item {
    item.iter()
        .filter(|(name, _)| names.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Top-level attributes whose value differs between two images.
pub(crate) fn changed_attributes(pre: Option<&Item>, post: Option<&Item>) -> BTreeSet<String> {
    let empty = Item::new();
    let pre = pre.unwrap_or(&empty);
    let post = post.unwrap_or(&empty);
    let mut changed = BTreeSet::new();
    for name in pre.keys().chain(post.keys()) {
        if pre.get(name) != post.get(name) {
            changed.insert(name.clone());
        }
    }
    changed
}

/// Uniform return-value selection across mutating operations.
pub(crate) fn apply_return_values(
    return_values: ReturnValues,
    pre: Option<&Item>,
    post: Option<&Item>,
    changed: &BTreeSet<String>,
) -> Option<Item> {
    match return_values {
        ReturnValues::None => None,
        ReturnValues::AllOld => Some(pre.cloned().unwrap_or_default()),
        ReturnValues::AllNew => Some(post.cloned().unwrap_or_default()),
        ReturnValues::UpdatedOld => Some(restrict_to_changed(pre, changed)),
        ReturnValues::UpdatedNew => Some(restrict_to_changed(post, changed)),
    }
}

fn restrict_to_changed(image: Option<&Item>, changed: &BTreeSet<String>) -> Item {
    match image {
        Some(image) => image
            .iter()
            .filter(|(name, _)| changed.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        None => Item::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::schema::{KeyAttribute, KeySchema, KeyType};

    fn schema_with_gsi(projection: ProjectionType, non_key: Vec<String>) -> TableSchema {
        TableSchema {
            table_name: "t".into(),
            key: KeySchema {
                hash: KeyAttribute {
                    name: "id".into(),
                    key_type: KeyType::S,
                },
                range: None,
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
                projection,
                non_key_attributes: non_key,
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
    fn test_gsi_key_values_qualification() {
        let schema = schema_with_gsi(ProjectionType::All, vec![]);
        let gsi = &schema.gsis[0];

        let qualifying = item(&[
            ("id", AttributeValue::S("a".into())),
            ("status", AttributeValue::S("pending".into())),
        ]);
        assert!(gsi_key_values(gsi, &qualifying).unwrap().is_some());

        let lacking = item(&[("id", AttributeValue::S("a".into()))]);
        assert!(gsi_key_values(gsi, &lacking).unwrap().is_none());

        let mistyped = item(&[
            ("id", AttributeValue::S("a".into())),
            ("status", AttributeValue::N("1".into())),
        ]);
        assert!(gsi_key_values(gsi, &mistyped).is_err());
    }

    #[test]
    fn test_projection_payload_keys_only() {
        let schema = schema_with_gsi(ProjectionType::KeysOnly, vec![]);
        let full = item(&[
            ("id", AttributeValue::S("a".into())),
            ("status", AttributeValue::S("x".into())),
            ("name", AttributeValue::S("n".into())),
        ]);
        let projected = projection_payload(&schema, &schema.gsis[0], &full);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("id"));
        assert!(projected.contains_key("status"));
        assert!(!projected.contains_key("name"));
    }

    #[test]
    fn test_projection_payload_include() {
        let schema = schema_with_gsi(ProjectionType::Include, vec!["qty".into()]);
        let full = item(&[
            ("id", AttributeValue::S("a".into())),
            ("status", AttributeValue::S("x".into())),
            ("qty", AttributeValue::N("2".into())),
            ("name", AttributeValue::S("n".into())),
        ]);
        let projected = projection_payload(&schema, &schema.gsis[0], &full);
        assert_eq!(projected.len(), 3);
        assert!(projected.contains_key("qty"));
        assert!(!projected.contains_key("name"));
    }

    #[test]
    fn test_changed_attributes_diff() {
        let pre = item(&[
            ("a", AttributeValue::N("1".into())),
            ("b", AttributeValue::S("same".into())),
        ]);
        let post = item(&[
            ("a", AttributeValue::N("2".into())),
            ("b", AttributeValue::S("same".into())),
            ("c", AttributeValue::Bool(true)),
        ]);
        let changed = changed_attributes(Some(&pre), Some(&post));
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_return_values_selection() {
        let pre = item(&[("a", AttributeValue::N("1".into()))]);
        let post = item(&[("a", AttributeValue::N("2".into()))]);
        let changed = changed_attributes(Some(&pre), Some(&post));

        assert!(apply_return_values(ReturnValues::None, Some(&pre), Some(&post), &changed)
            .is_none());
        assert_eq!(
            apply_return_values(ReturnValues::AllOld, Some(&pre), Some(&post), &changed),
            Some(pre.clone())
        );
        assert_eq!(
            apply_return_values(ReturnValues::UpdatedNew, Some(&pre), Some(&post), &changed),
            Some(post.clone())
        );
        // No pre-image: ALL_OLD is an empty map.
        assert_eq!(
            apply_return_values(ReturnValues::AllOld, None, Some(&post), &changed),
            Some(Item::new())
        );
    }

    #[test]
    fn test_item_size_guard() {
        let small = item(&[("id", AttributeValue::S("a".into()))]);
        assert!(guard_item_size(&small).is_ok());

        let big = item(&[(
            "blob",
            AttributeValue::S("x".repeat(MAX_ITEM_BYTES + 1)),
        )]);
        assert!(guard_item_size(&big).is_err());
    }
}
