//! Streams subsystem: capture inside the write transaction, consumer API,
//! and retention pruning.
//!
//! Every mutation appends its record in the same SQL transaction that
//! mutated the item; sequence numbers come from `UPDATE pdb_streams SET
//! next_seq = next_seq + 1 ... RETURNING next_seq`, which is collision-free
//! under concurrent transactions.

pub mod iterator;

use std::sync::Arc;
use std::time::Duration;

use sea_query::{Alias, Expr, ExprTrait, Order, Query};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::encryption::AttributeEncryption;
use crate::error::{PdbError, Result};
use crate::storage::executor::{SqlDialect, SqlExecutor, SqlRow, SqlTx};
use crate::storage::schema::{StreamRecords, Streams};
use crate::types::attribute::{item_from_string, item_to_string, Item};
use crate::types::schema::StreamViewType;

pub use iterator::{ShardIterator, ShardIteratorType, SHARD_ID};

/// Mutation kind captured on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    Insert,
    Modify,
    Remove,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Insert => "INSERT",
            StreamEvent::Modify => "MODIFY",
            StreamEvent::Remove => "REMOVE",
        }
    }

    fn parse(text: &str) -> Result<Self> {
        match text {
            "INSERT" => Ok(StreamEvent::Insert),
            "MODIFY" => Ok(StreamEvent::Modify),
            "REMOVE" => Ok(StreamEvent::Remove),
            other => Err(PdbError::Internal(format!("unknown stream event {other}"))),
        }
    }
}

/// Origin marker on records not produced by a caller (TTL sweeps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(rename = "type")]
    pub identity_type: String,
    #[serde(rename = "principalId")]
    pub principal_id: String,
}

impl UserIdentity {
    /// Marker for service-initiated deletes.
    pub fn service(principal_id: impl Into<String>) -> Self {
        Self {
            identity_type: "Service".to_string(),
            principal_id: principal_id.into(),
        }
    }
}

/// One captured mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub sequence_number: i64,
    pub event: StreamEvent,
    pub keys: Item,
    pub old_image: Option<Item>,
    pub new_image: Option<Item>,
    pub approximate_creation_millis: i64,
    pub user_identity: Option<UserIdentity>,
}

/// Stream lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Enabled,
    Disabled,
}

impl StreamStatus {
    fn name(&self) -> &'static str {
        match self {
            StreamStatus::Enabled => "ENABLED",
            StreamStatus::Disabled => "DISABLED",
        }
    }

    fn parse(text: &str) -> Result<Self> {
        match text {
            "ENABLED" => Ok(StreamStatus::Enabled),
            "DISABLED" => Ok(StreamStatus::Disabled),
            other => Err(PdbError::Internal(format!("unknown stream status {other}"))),
        }
    }
}

/// Entry returned by `ListStreams`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub stream_id: String,
    pub table_name: String,
}

/// The one logical shard of a stream and its sequence range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: String,
    pub starting_sequence_number: Option<i64>,
    pub ending_sequence_number: Option<i64>,
}

/// `DescribeStream` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub stream_id: String,
    pub table_name: String,
    pub view_type: StreamViewType,
    pub status: StreamStatus,
    pub shards: Vec<ShardInfo>,
}

/// `GetRecords` output.
#[derive(Debug)]
pub struct GetRecordsOutput {
    pub records: Vec<StreamRecord>,
    /// Absent once a disabled stream is exhausted.
    pub next_iterator: Option<String>,
}

fn parse_view_type(text: &str) -> Result<StreamViewType> {
    match text {
        "KEYS_ONLY" => Ok(StreamViewType::KeysOnly),
        "NEW_IMAGE" => Ok(StreamViewType::NewImage),
        "OLD_IMAGE" => Ok(StreamViewType::OldImage),
        "NEW_AND_OLD_IMAGES" => Ok(StreamViewType::NewAndOldImages),
        other => Err(PdbError::Internal(format!("unknown view type {other}"))),
    }
}

// ---- capture (runs inside the mutating transaction) ----

/// Everything a capture needs besides the mutation itself.
pub struct CaptureContext<'a> {
    pub table: &'a str,
    pub stream_id: &'a str,
    pub view: StreamViewType,
    pub encryption: &'a dyn AttributeEncryption,
    pub user_identity: Option<UserIdentity>,
    pub now_millis: i64,
}

/// Append one stream record inside the caller's transaction. Returns the
/// assigned sequence number.
pub async fn capture_record(
    tx: &mut dyn SqlTx,
    dialect: SqlDialect,
    ctx: &CaptureContext<'_>,
    event: StreamEvent,
    keys: &Item,
    old_image: Option<&Item>,
    new_image: Option<&Item>,
) -> Result<i64> {
    let query = {
        let stmt = Query::update()
            .table(Streams::Table)
            .value(Streams::NextSeq, Expr::col(Streams::NextSeq).add(1))
            .and_where(Expr::col(Streams::StreamId).eq(ctx.stream_id))
            .returning(Query::returning().column(Streams::NextSeq))
            .to_owned();
        dialect.update(&stmt)?
    };
    let row = tx
        .fetch_optional(&query)
        .await?
        .ok_or_else(|| {
            PdbError::Internal(format!("stream {} has no sequence row", ctx.stream_id))
        })?;
    let sequence = row.int("next_seq")?;

    let old_json = match old_image.filter(|_| ctx.view.wants_old()) {
        Some(image) => Some(ctx.encryption.encrypt(ctx.table, item_to_string(image))?),
        None => None,
    };
    let new_json = match new_image.filter(|_| ctx.view.wants_new()) {
        Some(image) => Some(ctx.encryption.encrypt(ctx.table, item_to_string(image))?),
        None => None,
    };
    let identity_json = ctx
        .user_identity
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let query = {
        let stmt = Query::insert()
            .into_table(StreamRecords::Table)
            .columns([
                StreamRecords::StreamId,
                StreamRecords::SequenceNo,
                StreamRecords::EventName,
                StreamRecords::KeysJson,
                StreamRecords::OldImageJson,
                StreamRecords::NewImageJson,
                StreamRecords::UserIdentityJson,
                StreamRecords::CreatedAt,
            ])
            .values_panic([
                ctx.stream_id.into(),
                sequence.into(),
                event.name().into(),
                item_to_string(keys).into(),
                old_json.into(),
                new_json.into(),
                identity_json.into(),
                ctx.now_millis.into(),
            ])
            .to_owned();
        dialect.insert(&stmt)?
    };
    tx.execute(&query).await?;
    Ok(sequence)
}

/// Provision the stream head row for a new stream.
pub async fn create_stream(
    tx: &mut dyn SqlTx,
    dialect: SqlDialect,
    stream_id: &str,
    table_name: &str,
    view: StreamViewType,
    now_millis: i64,
) -> Result<()> {
    let query = {
        let stmt = Query::insert()
            .into_table(Streams::Table)
            .columns([
                Streams::StreamId,
                Streams::TableName,
                Streams::ViewType,
                Streams::Status,
                Streams::NextSeq,
                Streams::CreatedAt,
            ])
            .values_panic([
                stream_id.into(),
                table_name.into(),
                view.name().into(),
                StreamStatus::Enabled.name().into(),
                0i64.into(),
                now_millis.into(),
            ])
            .to_owned();
        dialect.insert(&stmt)?
    };
    tx.execute(&query).await?;
    Ok(())
}

/// Flip a stream's status (UpdateTable enable/disable), optionally
/// changing the view type on re-enable.
pub async fn set_stream_status(
    tx: &mut dyn SqlTx,
    dialect: SqlDialect,
    stream_id: &str,
    status: StreamStatus,
    view: Option<StreamViewType>,
) -> Result<()> {
    let query = {
        let mut stmt = Query::update()
            .table(Streams::Table)
            .value(Streams::Status, status.name())
            .and_where(Expr::col(Streams::StreamId).eq(stream_id))
            .to_owned();
        if let Some(view) = view {
            stmt.value(Streams::ViewType, view.name());
        }
        dialect.update(&stmt)?
    };
    tx.execute(&query).await?;
    Ok(())
}

/// Drop all streams of a table together with their retained records
/// (DeleteTable cascade).
pub async fn delete_streams_for_table(
    tx: &mut dyn SqlTx,
    dialect: SqlDialect,
    table_name: &str,
) -> Result<()> {
    let select_query = {
        let select_ids = Query::select()
            .column(Streams::StreamId)
            .from(Streams::Table)
            .and_where(Expr::col(Streams::TableName).eq(table_name))
            .to_owned();
        dialect.select(&select_ids)?
    };
    let rows = tx.fetch_all(&select_query).await?;
    for row in rows {
        let stream_id = row.text("stream_id")?.to_string();
        let query = {
            let stmt = Query::delete()
                .from_table(StreamRecords::Table)
                .and_where(Expr::col(StreamRecords::StreamId).eq(stream_id.as_str()))
                .to_owned();
            dialect.delete(&stmt)?
        };
        tx.execute(&query).await?;
    }
    let query = {
        let stmt = Query::delete()
            .from_table(Streams::Table)
            .and_where(Expr::col(Streams::TableName).eq(table_name))
            .to_owned();
        dialect.delete(&stmt)?
    };
    tx.execute(&query).await?;
    Ok(())
}

// ---- consumer API ----

/// Read-side store for the consumer operations and retention pruning.
pub struct StreamStore {
    executor: Arc<dyn SqlExecutor>,
    encryption: Arc<dyn AttributeEncryption>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl StreamStore {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        encryption: Arc<dyn AttributeEncryption>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            executor,
            encryption,
            clock,
            retention,
        }
    }

    fn dialect(&self) -> SqlDialect {
        self.executor.dialect()
    }

    /// List stream identifiers, optionally restricted to one table.
    pub async fn list_streams(&self, table_name: Option<&str>) -> Result<Vec<StreamSummary>> {
        let query = {
            let mut stmt = Query::select()
                .columns([Streams::StreamId, Streams::TableName])
                .from(Streams::Table)
                .order_by(Streams::StreamId, Order::Asc)
                .to_owned();
            if let Some(table) = table_name {
                stmt.and_where(Expr::col(Streams::TableName).eq(table));
            }
            self.dialect().select(&stmt)?
        };
        let rows = self.executor.fetch_all(&query).await?;
        rows.iter()
            .map(|row| {
                Ok(StreamSummary {
                    stream_id: row.text("stream_id")?.to_string(),
                    table_name: row.text("table_name")?.to_string(),
                })
            })
            .collect()
    }

    async fn stream_head(&self, stream_id: &str) -> Result<(String, StreamViewType, StreamStatus, i64)> {
        let query = {
            let stmt = Query::select()
                .columns([
                    Streams::TableName,
                    Streams::ViewType,
                    Streams::Status,
                    Streams::NextSeq,
                ])
                .from(Streams::Table)
                .and_where(Expr::col(Streams::StreamId).eq(stream_id))
                .to_owned();
            self.dialect().select(&stmt)?
        };
        let row = self
            .executor
            .fetch_optional(&query)
            .await?
            .ok_or_else(|| PdbError::ResourceNotFound(format!("stream {stream_id}")))?;
        Ok((
            row.text("table_name")?.to_string(),
            parse_view_type(row.text("view_type")?)?,
            StreamStatus::parse(row.text("status")?)?,
            row.int("next_seq")?,
        ))
    }

    /// Describe the stream and its single logical shard.
    pub async fn describe_stream(&self, stream_id: &str) -> Result<StreamDescription> {
        let (table_name, view_type, status, _next_seq) = self.stream_head(stream_id).await?;

        let query = {
            let stmt = Query::select()
                .expr_as(Expr::col(StreamRecords::SequenceNo).min(), Alias::new("min_seq"))
                .expr_as(Expr::col(StreamRecords::SequenceNo).max(), Alias::new("max_seq"))
                .from(StreamRecords::Table)
                .and_where(Expr::col(StreamRecords::StreamId).eq(stream_id))
                .to_owned();
            self.dialect().select(&stmt)?
        };
        let row = self.executor.fetch_optional(&query).await?;
        let (min_seq, max_seq) = match &row {
            Some(row) => (row.opt_int("min_seq")?, row.opt_int("max_seq")?),
            None => (None, None),
        };

        Ok(StreamDescription {
            stream_id: stream_id.to_string(),
            table_name,
            view_type,
            status,
            shards: vec![ShardInfo {
                shard_id: SHARD_ID.to_string(),
                starting_sequence_number: min_seq,
                ending_sequence_number: match status {
                    StreamStatus::Disabled => max_seq,
                    StreamStatus::Enabled => None,
                },
            }],
        })
    }

    /// Issue an opaque iterator for the stream's shard.
    pub async fn get_shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &str,
        kind: ShardIteratorType,
        sequence_number: Option<i64>,
    ) -> Result<String> {
        if shard_id != SHARD_ID {
            return Err(PdbError::ResourceNotFound(format!("shard {shard_id}")));
        }
        let (_, _, _, next_seq) = self.stream_head(stream_id).await?;
        let after = match kind {
            ShardIteratorType::TrimHorizon => 0,
            ShardIteratorType::Latest => next_seq,
            ShardIteratorType::AtSequenceNumber => {
                let seq = sequence_number.ok_or_else(|| {
                    PdbError::validation("AT_SEQUENCE_NUMBER requires a sequence number")
                })?;
                seq - 1
            }
            ShardIteratorType::AfterSequenceNumber => sequence_number.ok_or_else(|| {
                PdbError::validation("AFTER_SEQUENCE_NUMBER requires a sequence number")
            })?,
        };
        Ok(ShardIterator {
            stream_id: stream_id.to_string(),
            after,
        }
        .encode())
    }

    /// Read up to `limit` records at the iterator position. An iterator
    /// past the last record yields an empty batch with a still-valid next
    /// iterator; consumers poll.
    pub async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput> {
        let state = ShardIterator::decode(iterator)?;
        let (table_name, _, status, _) = self.stream_head(&state.stream_id).await?;
        let limit = limit.unwrap_or(1000).min(1000) as u64;

        let query = {
            let stmt = Query::select()
                .columns([
                    StreamRecords::SequenceNo,
                    StreamRecords::EventName,
                    StreamRecords::KeysJson,
                    StreamRecords::OldImageJson,
                    StreamRecords::NewImageJson,
                    StreamRecords::UserIdentityJson,
                    StreamRecords::CreatedAt,
                ])
                .from(StreamRecords::Table)
                .and_where(Expr::col(StreamRecords::StreamId).eq(state.stream_id.as_str()))
                .and_where(Expr::col(StreamRecords::SequenceNo).gt(state.after))
                .order_by(StreamRecords::SequenceNo, Order::Asc)
                .limit(limit)
                .to_owned();
            self.dialect().select(&stmt)?
        };
        let rows = self.executor.fetch_all(&query).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.record_from_row(&table_name, row)?);
        }
        let exhausted = (records.len() as u64) < limit;
        let last_seq = records
            .last()
            .map(|r| r.sequence_number)
            .unwrap_or(state.after);

        let next_iterator = match status {
            StreamStatus::Disabled if exhausted => None,
            _ => Some(
                ShardIterator {
                    stream_id: state.stream_id,
                    after: last_seq,
                }
                .encode(),
            ),
        };

        Ok(GetRecordsOutput {
            records,
            next_iterator,
        })
    }

    fn record_from_row(&self, table: &str, row: &SqlRow) -> Result<StreamRecord> {
        let decrypt_image = |json: Option<&str>| -> Result<Option<Item>> {
            match json {
                Some(text) => {
                    let plain = self.encryption.decrypt(table, text.to_string())?;
                    Ok(Some(item_from_string(&plain)?))
                }
                None => Ok(None),
            }
        };
        Ok(StreamRecord {
            sequence_number: row.int("sequence_no")?,
            event: StreamEvent::parse(row.text("event_name")?)?,
            keys: item_from_string(row.text("keys_json")?)?,
            old_image: decrypt_image(row.opt_text("old_image_json")?)?,
            new_image: decrypt_image(row.opt_text("new_image_json")?)?,
            approximate_creation_millis: row.int("created_at")?,
            user_identity: row
                .opt_text("user_identity_json")?
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| PdbError::Internal(format!("corrupt user identity: {e}")))?,
        })
    }

    /// Delete records older than the retention window. Returns the number
    /// pruned.
    pub async fn prune_expired(&self) -> Result<u64> {
        let cutoff = self.clock.now_millis() - self.retention.as_millis() as i64;
        let query = {
            let stmt = Query::delete()
                .from_table(StreamRecords::Table)
                .and_where(Expr::col(StreamRecords::CreatedAt).lt(cutoff))
                .to_owned();
            self.dialect().delete(&stmt)?
        };
        let pruned = self.executor.execute(&query).await?;
        if pruned > 0 {
            debug!(pruned, "Pruned expired stream records");
        }
        Ok(pruned)
    }
}
