//! Transaction coordinator: TransactWriteItems / TransactGetItems.
//!
//! All target rows are locked in a deterministic order (sorted by table
//! name, then key bytes) before any condition is evaluated, so
//! concurrent transactions cannot deadlock. Every condition is evaluated
//! even after one fails, so the cancellation reason list covers each item.
//! If anything fails, the SQL transaction rolls back whole: no partial
//! mutation, no stream records.

use std::collections::HashSet;
use std::sync::Arc;

use backon::Retryable;
use tracing::warn;

use crate::error::{CancellationCode, CancellationReason, PdbError, Result};
use crate::expression::ast::Condition;
use crate::expression::eval::eval_condition;
use crate::expression::{apply_update, DocumentPath, UpdateExpression};
use crate::storage::item_store::{
    guard_item_size, validate_gsi_key_types, ItemStore, MAX_ITEM_BYTES,
};
use crate::storage::keys;
use crate::storage::retry;
use crate::streams::StreamEvent;
use crate::types::attribute::{item_size_bytes, validate_item, Item};
use crate::types::schema::TableSchema;

/// Ceiling on items per transaction, matching DynamoDB.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// One entry of a TransactWriteItems call, already resolved against the
/// catalog and with its expressions compiled.
pub enum TransactWriteOp {
    Put {
        schema: Arc<TableSchema>,
        item: Item,
        condition: Option<Condition>,
    },
    Update {
        schema: Arc<TableSchema>,
        key: Item,
        update: UpdateExpression,
        condition: Option<Condition>,
    },
    Delete {
        schema: Arc<TableSchema>,
        key: Item,
        condition: Option<Condition>,
    },
    /// No-op write that only asserts a predicate.
    ConditionCheck {
        schema: Arc<TableSchema>,
        key: Item,
        condition: Condition,
    },
}

impl TransactWriteOp {
    fn schema(&self) -> &TableSchema {
        match self {
            TransactWriteOp::Put { schema, .. }
            | TransactWriteOp::Update { schema, .. }
            | TransactWriteOp::Delete { schema, .. }
            | TransactWriteOp::ConditionCheck { schema, .. } => schema,
        }
    }

    fn condition(&self) -> Option<&Condition> {
        match self {
            TransactWriteOp::Put { condition, .. }
            | TransactWriteOp::Update { condition, .. }
            | TransactWriteOp::Delete { condition, .. } => condition.as_ref(),
            TransactWriteOp::ConditionCheck { condition, .. } => Some(condition),
        }
    }
}

/// One entry of a TransactGetItems call.
pub struct TransactGetOp {
    pub schema: Arc<TableSchema>,
    pub key: Item,
    pub projection: Option<Vec<DocumentPath>>,
}

struct Prepared {
    key_json: String,
    key_item: Item,
}

/// Runs multi-item transactions through the item store's primitives.
pub struct TransactionCoordinator {
    store: Arc<ItemStore>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<ItemStore>) -> Self {
        Self { store }
    }

    /// Atomically apply up to 100 writes and condition checks.
    pub async fn transact_write(&self, ops: &[TransactWriteOp]) -> Result<()> {
        if ops.is_empty() || ops.len() > MAX_TRANSACT_ITEMS {
            return Err(PdbError::validation(format!(
                "transactions accept between 1 and {MAX_TRANSACT_ITEMS} items, got {}",
                ops.len()
            )));
        }

        let prepared = prepare(ops)?;

        // Deterministic lock order across concurrent transactions.
        let mut order: Vec<usize> = (0..ops.len()).collect();
        order.sort_by(|&a, &b| {
            (ops[a].schema().table_name.as_str(), prepared[a].key_json.as_str())
                .cmp(&(ops[b].schema().table_name.as_str(), prepared[b].key_json.as_str()))
        });

        (|| self.attempt_write(ops, &prepared, &order))
            .retry(retry::write_backoff())
            .when(PdbError::is_transient)
            .notify(|err: &PdbError, delay| {
                warn!(error = %err, delay = ?delay, "Retrying transaction after transient failure");
            })
            .await
            .map_err(PdbError::demote_transient)
    }

    async fn attempt_write(
        &self,
        ops: &[TransactWriteOp],
        prepared: &[Prepared],
        order: &[usize],
    ) -> Result<()> {
        let mut tx = self.store.executor().begin(false).await?;

        let mut pres: Vec<Option<Item>> = Vec::with_capacity(ops.len());
        pres.resize_with(ops.len(), || None);
        for &i in order {
            pres[i] = self
                .store
                .lock_preimage(tx.as_mut(), ops[i].schema(), &prepared[i].key_json)
                .await?;
        }

        // Evaluate everything before mutating anything, collecting one
        // reason per item.
        let mut reasons = Vec::with_capacity(ops.len());
        let mut posts: Vec<Option<Item>> = Vec::with_capacity(ops.len());
        let mut any_failed = false;
        for (i, op) in ops.iter().enumerate() {
            let empty = Item::new();
            let subject = pres[i].as_ref().unwrap_or(&empty);
            let mut post = None;

            let reason = match op.condition().map(|c| eval_condition(c, subject)) {
                Some(Ok(false)) => Some(CancellationReason::failed(
                    CancellationCode::ConditionalCheckFailed,
                    "the conditional request failed",
                )),
                Some(Err(err)) => Some(CancellationReason::failed(
                    CancellationCode::ValidationError,
                    err.to_string(),
                )),
                Some(Ok(true)) | None => None,
            };

            let reason = match reason {
                Some(reason) => Some(reason),
                None => match op {
                    TransactWriteOp::Update { update, .. } => {
                        match self.compute_update_post(op.schema(), update, subject, &prepared[i]) {
                            Ok(computed) => {
                                post = Some(computed);
                                None
                            }
                            Err(err) => Some(update_failure_reason(err)),
                        }
                    }
                    _ => None,
                },
            };

            any_failed |= reason.is_some();
            reasons.push(reason.unwrap_or_else(CancellationReason::none));
            posts.push(post);
        }

        if any_failed {
            tx.rollback().await?;
            return Err(PdbError::TransactionCanceled { reasons });
        }

        // Apply in input order; locks are already held.
        for (i, op) in ops.iter().enumerate() {
            let pre = pres[i].as_ref();
            match op {
                TransactWriteOp::Put { schema, item, .. } => {
                    self.store
                        .persist_item(tx.as_mut(), schema, &prepared[i].key_json, pre, item)
                        .await?;
                    let event = stream_event(pre.is_some());
                    self.store
                        .capture(tx.as_mut(), schema, event, &prepared[i].key_item, pre, Some(item), None)
                        .await?;
                }
                TransactWriteOp::Update { schema, .. } => {
                    let post = posts[i].as_ref().expect("update post-image computed");
                    self.store
                        .persist_item(tx.as_mut(), schema, &prepared[i].key_json, pre, post)
                        .await?;
                    let event = stream_event(pre.is_some());
                    self.store
                        .capture(tx.as_mut(), schema, event, &prepared[i].key_item, pre, Some(post), None)
                        .await?;
                }
                TransactWriteOp::Delete { schema, .. } => {
                    if let Some(pre_image) = pre {
                        self.store
                            .remove_item(tx.as_mut(), schema, &prepared[i].key_json)
                            .await?;
                        self.store
                            .capture(
                                tx.as_mut(),
                                schema,
                                StreamEvent::Remove,
                                &prepared[i].key_item,
                                Some(pre_image),
                                None,
                                None,
                            )
                            .await?;
                    }
                }
                TransactWriteOp::ConditionCheck { .. } => {}
            }
        }

        tx.commit().await?;
        Ok(())
    }

    fn compute_update_post(
        &self,
        schema: &TableSchema,
        update: &UpdateExpression,
        pre: &Item,
        prepared: &Prepared,
    ) -> Result<Item> {
        let outcome = apply_update(update, pre)?;
        let mut post = outcome.post;
        for (name, value) in &prepared.key_item {
            post.insert(name.clone(), value.clone());
        }
        validate_item(&post)?;
        if item_size_bytes(&post) > MAX_ITEM_BYTES {
            return Err(PdbError::ItemCollectionSizeLimitExceeded(format!(
                "post-image exceeds the {MAX_ITEM_BYTES}-byte limit"
            )));
        }
        validate_gsi_key_types(schema, &post)?;
        Ok(post)
    }

    /// Snapshot reads under one transaction, results in input order.
    pub async fn transact_get(&self, gets: &[TransactGetOp]) -> Result<Vec<Option<Item>>> {
        if gets.is_empty() || gets.len() > MAX_TRANSACT_ITEMS {
            return Err(PdbError::validation(format!(
                "transactions accept between 1 and {MAX_TRANSACT_ITEMS} items, got {}",
                gets.len()
            )));
        }
        for get in gets {
            get.schema.validate_key_map(&get.key)?;
        }

        let mut tx = self.store.executor().begin(true).await?;
        let mut results = Vec::with_capacity(gets.len());
        for get in gets {
            let key = get.schema.validate_key_map(&get.key)?;
            let key_json = keys::key_json(&get.schema, &key);
            let item = self
                .store
                .read_in_tx(tx.as_mut(), &get.schema, &key_json)
                .await?;
            results.push(match (item, get.projection.as_deref()) {
                (Some(item), Some(paths)) => Some(crate::expression::project_item(&item, paths)),
                (item, _) => item,
            });
        }
        tx.commit().await?;
        Ok(results)
    }
}

fn stream_event(had_pre: bool) -> StreamEvent {
    if had_pre {
        StreamEvent::Modify
    } else {
        StreamEvent::Insert
    }
}

fn update_failure_reason(err: PdbError) -> CancellationReason {
    match &err {
        PdbError::ItemCollectionSizeLimitExceeded(msg) => CancellationReason::failed(
            CancellationCode::ItemCollectionSizeLimitExceeded,
            msg.clone(),
        ),
        other => {
            CancellationReason::failed(CancellationCode::ValidationError, other.to_string())
        }
    }
}

/// Upfront shape validation shared by every attempt: keys extracted, items
/// validated, duplicates rejected.
fn prepare(ops: &[TransactWriteOp]) -> Result<Vec<Prepared>> {
    let mut prepared = Vec::with_capacity(ops.len());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for op in ops {
        let schema = op.schema();
        let key = match op {
            TransactWriteOp::Put { item, .. } => {
                validate_item(item)?;
                guard_item_size(item)?;
                validate_gsi_key_types(schema, item)?;
                schema.extract_key(item)?
            }
            TransactWriteOp::Update { key, update, .. } => {
                for action in &update.actions {
                    if schema.key.contains(action.path().root_name()) {
                        return Err(PdbError::validation(format!(
                            "update expression may not modify key attribute {}",
                            action.path().root_name()
                        )));
                    }
                }
                schema.validate_key_map(key)?
            }
            TransactWriteOp::Delete { key, .. } | TransactWriteOp::ConditionCheck { key, .. } => {
                schema.validate_key_map(key)?
            }
        };
        let key_json = keys::key_json(schema, &key);
        if !seen.insert((schema.table_name.clone(), key_json.clone())) {
            return Err(PdbError::validation(
                "transaction references the same key more than once",
            ));
        }
        prepared.push(Prepared {
            key_json,
            key_item: schema.key_item(&key),
        });
    }
    Ok(prepared)
}
