//! BatchGetItem / BatchWriteItem: non-atomic fan-out.
//!
//! Each sub-request succeeds or fails independently; entries that hit a
//! transient backend failure or the size guard come back as unprocessed
//! for the caller to retry. Shape violations fail the whole call up front,
//! matching DynamoDB's validation behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::error::{PdbError, Result};
use crate::expression::DocumentPath;
use crate::storage::item_store::{guard_item_size, ItemStore};
use crate::storage::keys;
use crate::types::attribute::Item;
use crate::types::schema::{ReturnValues, TableSchema};

/// Ceiling on keys per BatchGetItem call.
pub const MAX_BATCH_GET: usize = 100;
/// Ceiling on write requests per BatchWriteItem call.
pub const MAX_BATCH_WRITE: usize = 25;

/// One get, already resolved against the catalog.
pub struct BatchGetEntry {
    pub schema: Arc<TableSchema>,
    pub key: Item,
    pub projection: Option<Vec<DocumentPath>>,
}

/// One write, already resolved against the catalog.
pub struct BatchWriteEntry {
    pub schema: Arc<TableSchema>,
    pub op: BatchWriteOp,
}

pub enum BatchWriteOp {
    Put(Item),
    Delete(Item),
}

impl BatchWriteEntry {
    fn key_map(&self) -> Result<Item> {
        match &self.op {
            BatchWriteOp::Put(item) => {
                let key = self.schema.extract_key(item)?;
                Ok(self.schema.key_item(&key))
            }
            BatchWriteOp::Delete(key_map) => {
                let key = self.schema.validate_key_map(key_map)?;
                Ok(self.schema.key_item(&key))
            }
        }
    }
}

/// BatchGetItem output: per-table responses plus unprocessed entries.
pub struct BatchGetOutcome {
    pub responses: HashMap<String, Vec<Item>>,
    pub unprocessed: Vec<BatchGetEntry>,
}

/// BatchWriteItem output: unprocessed entries only (writes return no data).
pub struct BatchWriteOutcome {
    pub unprocessed: Vec<BatchWriteEntry>,
}

/// Fan out point reads. Keys that fail on backend errors are returned
/// unprocessed.
pub async fn batch_get(store: &ItemStore, entries: Vec<BatchGetEntry>) -> Result<BatchGetOutcome> {
    if entries.len() > MAX_BATCH_GET {
        return Err(PdbError::validation(format!(
            "batch get accepts at most {MAX_BATCH_GET} keys, got {}",
            entries.len()
        )));
    }
    let mut responses: HashMap<String, Vec<Item>> = HashMap::new();
    let mut unprocessed = Vec::new();
    for entry in entries {
        let result = store
            .get_item(&entry.schema, &entry.key, entry.projection.as_deref())
            .await;
        match result {
            Ok(Some(item)) => responses
                .entry(entry.schema.table_name.clone())
                .or_default()
                .push(item),
            Ok(None) => {}
            Err(err) if matches!(err, PdbError::Internal(_) | PdbError::Transient(_)) => {
                warn!(table = %entry.schema.table_name, error = %err, "Batch get entry unprocessed");
                unprocessed.push(entry);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(BatchGetOutcome {
        responses,
        unprocessed,
    })
}

/// Fan out writes. Duplicate keys within the call are rejected; oversized
/// items and backend failures come back unprocessed.
pub async fn batch_write(
    store: &ItemStore,
    entries: Vec<BatchWriteEntry>,
) -> Result<BatchWriteOutcome> {
    if entries.len() > MAX_BATCH_WRITE {
        return Err(PdbError::validation(format!(
            "batch write accepts at most {MAX_BATCH_WRITE} requests, got {}",
            entries.len()
        )));
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    for entry in &entries {
        let key_map = entry.key_map()?;
        let identity = (
            entry.schema.table_name.clone(),
            keys::key_item_json(&key_map),
        );
        if !seen.insert(identity) {
            return Err(PdbError::validation(
                "batch write contains duplicate keys for one table",
            ));
        }
    }

    let mut unprocessed = Vec::new();
    for entry in entries {
        match &entry.op {
            BatchWriteOp::Put(item) => {
                if guard_item_size(item).is_err() {
                    unprocessed.push(entry);
                    continue;
                }
                let result = store
                    .put_item(&entry.schema, item.clone(), None, ReturnValues::None)
                    .await;
                match result {
                    Ok(_) => {}
                    Err(err) if matches!(err, PdbError::Internal(_) | PdbError::Transient(_)) => {
                        warn!(table = %entry.schema.table_name, error = %err, "Batch put unprocessed");
                        unprocessed.push(entry);
                    }
                    Err(err) => return Err(err),
                }
            }
            BatchWriteOp::Delete(key_map) => {
                let result = store
                    .delete_item(&entry.schema, key_map, None, ReturnValues::None)
                    .await;
                match result {
                    Ok(_) => {}
                    Err(err) if matches!(err, PdbError::Internal(_) | PdbError::Transient(_)) => {
                        warn!(table = %entry.schema.table_name, error = %err, "Batch delete unprocessed");
                        unprocessed.push(entry);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
    Ok(BatchWriteOutcome { unprocessed })
}
