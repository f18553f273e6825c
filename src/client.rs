//! In-process client facade.
//!
//! `PretenderDb` wires the catalog, item store, transaction coordinator,
//! streams, and background workers from a `Config` through explicit
//! constructor injection; no globals. Operations are local async methods
//! over the wire shapes in [`crate::api`].
//!
//! # Example
//!
//! ```ignore
//! use pretenderdb::{Config, PretenderDb};
//!
//! let db = PretenderDb::builder(Config::in_memory()).build().await?;
//! db.create_table(create_request).await?;
//! db.put_item(put_request).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{
    self, BatchGetItemOutput, BatchGetItemRequest, BatchWriteItemOutput, BatchWriteItemRequest,
    CreateTableRequest, DeleteItemRequest, GetItemOutput, GetItemRequest, GetRecordsRequest,
    GetShardIteratorRequest, ItemOutput, ItemResponse, KeysAndAttributes, ListStreamsRequest,
    ListTablesOutput, ListTablesRequest, PutItemRequest, QueryOutput, QueryRequest, ScanRequest,
    TableDescription, TransactGetItemsOutput, TransactGetItemsRequest, TransactWriteItem,
    TransactWriteItemsRequest, UpdateItemRequest, UpdateTableRequest, UpdateTimeToLiveRequest,
    WriteRequest,
};
use crate::catalog::{StreamChange, TableCatalog, TableDefinition, TableUpdate};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DatabaseBackend};
use crate::encryption::{AttributeEncryption, NoOpEncryption};
use crate::error::{PdbError, Result};
use crate::expression::{extract_key_condition, ExpressionParser};
use crate::services::{StreamPruner, TtlSweeper};
use crate::storage::batch::{
    batch_get, batch_write, BatchGetEntry, BatchWriteEntry, BatchWriteOp,
};
use crate::storage::{
    self, ItemStore, PgExecutor, QueryParams, ScanParams, SqlExecutor, SqliteExecutor,
};
use crate::streams::{
    GetRecordsOutput, StreamDescription, StreamStore, StreamSummary,
};
use crate::txn::{TransactGetOp, TransactWriteOp, TransactionCoordinator};
use crate::types::schema::TtlSettings;

/// Builder for [`PretenderDb`]; supply a clock or encryption to override
/// the defaults.
pub struct PretenderDbBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    encryption: Option<Arc<dyn AttributeEncryption>>,
}

impl PretenderDbBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            encryption: None,
        }
    }

    /// Inject a clock (tests pin "now" through this).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Inject a payload encryption implementation.
    pub fn with_encryption(mut self, encryption: Arc<dyn AttributeEncryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Connect, provision the schema, wire the components, and spawn the
    /// background workers when configured.
    pub async fn build(self) -> Result<PretenderDb> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let encryption = self
            .encryption
            .unwrap_or_else(|| Arc::new(NoOpEncryption));

        let executor: Arc<dyn SqlExecutor> = match config.database.backend {
            DatabaseBackend::Sqlite => {
                let options = SqliteConnectOptions::from_str(&config.database.url)
                    .map_err(|e| PdbError::Internal(format!("invalid database url: {e}")))?
                    .create_if_missing(true)
                    // begins_with compiles to LIKE, which must stay
                    // case-sensitive.
                    .pragma("case_sensitive_like", "true");
                // One connection that never recycles: the embedded backend
                // serializes writers, and an in-memory database would be
                // lost if the pool closed its connection.
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?;
                Arc::new(SqliteExecutor::new(pool))
            }
            DatabaseBackend::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections.max(1))
                    .connect(&config.database.url)
                    .await?;
                Arc::new(PgExecutor::new(pool))
            }
        };
        info!(backend = ?config.database.backend, "Connected to storage backend");
        storage::provision(&executor).await?;

        let catalog = Arc::new(TableCatalog::new(
            executor.clone(),
            clock.clone(),
            encryption.clone(),
            config.streams.default_view_type,
        ));
        let store = Arc::new(ItemStore::new(
            executor.clone(),
            encryption.clone(),
            clock.clone(),
        ));
        let coordinator = TransactionCoordinator::new(store.clone());
        let streams = Arc::new(StreamStore::new(
            executor.clone(),
            encryption.clone(),
            clock.clone(),
            Duration::from_secs(config.streams.retention_hours * 3600),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        if config.background_workers {
            let sweeper = TtlSweeper::new(
                catalog.clone(),
                store.clone(),
                clock.clone(),
                config.ttl.clone(),
                config.streams.ttl_principal.clone(),
            );
            workers.push(tokio::spawn(sweeper.run(shutdown_rx.clone())));

            let pruner = StreamPruner::new(
                streams.clone(),
                Duration::from_secs(config.streams.prune_interval_secs),
            );
            workers.push(tokio::spawn(pruner.run(shutdown_rx)));
        }

        Ok(PretenderDb {
            deadline: config.request_timeout_ms.map(Duration::from_millis),
            catalog,
            store,
            coordinator,
            streams,
            clock,
            config,
            shutdown_tx,
            workers: parking_lot::Mutex::new(workers),
        })
    }
}

/// The DynamoDB operation set over a SQL backend.
pub struct PretenderDb {
    catalog: Arc<TableCatalog>,
    store: Arc<ItemStore>,
    coordinator: TransactionCoordinator,
    streams: Arc<StreamStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    deadline: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PretenderDb {
    pub fn builder(config: Config) -> PretenderDbBuilder {
        PretenderDbBuilder::new(config)
    }

    /// Direct consumer access to the streams subsystem.
    pub fn streams(&self) -> &Arc<StreamStore> {
        &self.streams
    }

    /// A TTL sweeper over this instance's components, for embedders that
    /// drive sweeps themselves instead of running the background worker.
    pub fn ttl_sweeper(&self) -> TtlSweeper {
        TtlSweeper::new(
            self.catalog.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.config.ttl.clone(),
            self.config.streams.ttl_principal.clone(),
        )
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| PdbError::RequestTimeout)?,
            None => fut.await,
        }
    }

    /// Signal background workers and wait for them to finish their
    /// current batch.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }

    // ---- table lifecycle ----

    pub async fn create_table(&self, req: CreateTableRequest) -> Result<TableDescription> {
        self.bounded(async {
            let key = api::build_key_schema(&req.key_schema, &req.attribute_definitions)?;
            let gsis = req
                .global_secondary_indexes
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|spec| api::build_gsi(spec, &req.attribute_definitions))
                .collect::<Result<Vec<_>>>()?;
            let stream_view = match &req.stream_specification {
                Some(spec) if spec.stream_enabled => Some(spec.stream_view_type.ok_or_else(
                    || PdbError::validation("an enabled stream requires a view type"),
                )?),
                _ => None,
            };
            let schema = self
                .catalog
                .create_table(TableDefinition {
                    table_name: req.table_name,
                    key,
                    gsis,
                    stream_view,
                })
                .await?;
            Ok(api::describe(&schema))
        })
        .await
    }

    pub async fn describe_table(&self, table_name: &str) -> Result<TableDescription> {
        self.bounded(async {
            let schema = self.catalog.describe_table(table_name).await?;
            Ok(api::describe(&schema))
        })
        .await
    }

    pub async fn delete_table(&self, table_name: &str) -> Result<()> {
        self.bounded(self.catalog.delete_table(table_name)).await
    }

    pub async fn list_tables(&self, req: ListTablesRequest) -> Result<ListTablesOutput> {
        self.bounded(async {
            let listing = self
                .catalog
                .list_tables(
                    req.prefix.as_deref(),
                    req.limit,
                    req.exclusive_start_table_name.as_deref(),
                )
                .await?;
            Ok(ListTablesOutput {
                table_names: listing.table_names,
                last_evaluated_table_name: listing.last_evaluated_table_name,
            })
        })
        .await
    }

    pub async fn update_table(&self, req: UpdateTableRequest) -> Result<TableDescription> {
        self.bounded(async {
            let stream = match &req.stream_specification {
                Some(spec) if spec.stream_enabled => {
                    Some(StreamChange::Enable(spec.stream_view_type.ok_or_else(
                        || PdbError::validation("an enabled stream requires a view type"),
                    )?))
                }
                Some(_) => Some(StreamChange::Disable),
                None => None,
            };
            let schema = self
                .catalog
                .update_table(&req.table_name, TableUpdate { ttl: None, stream })
                .await?;
            Ok(api::describe(&schema))
        })
        .await
    }

    pub async fn update_time_to_live(&self, req: UpdateTimeToLiveRequest) -> Result<()> {
        self.bounded(async {
            let ttl = TtlSettings::from(&req.time_to_live_specification);
            self.catalog
                .update_table(
                    &req.table_name,
                    TableUpdate {
                        ttl: Some(ttl),
                        stream: None,
                    },
                )
                .await?;
            Ok(())
        })
        .await
    }

    // ---- item operations ----

    pub async fn put_item(&self, req: PutItemRequest) -> Result<ItemOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let mut parser = ExpressionParser::new(
                req.expression_attribute_names.as_ref(),
                req.expression_attribute_values.as_ref(),
            );
            let condition = req
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            let attributes = self
                .store
                .put_item(
                    &schema,
                    req.item,
                    condition.as_ref(),
                    req.return_values.unwrap_or_default(),
                )
                .await?;
            Ok(ItemOutput { attributes })
        })
        .await
    }

    pub async fn get_item(&self, req: GetItemRequest) -> Result<GetItemOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let mut parser =
                ExpressionParser::new(req.expression_attribute_names.as_ref(), None);
            let projection = req
                .projection_expression
                .as_deref()
                .map(|text| parser.parse_projection(text))
                .transpose()?;
            parser.finish()?;
            let item = self
                .store
                .get_item(&schema, &req.key, projection.as_deref())
                .await?;
            Ok(GetItemOutput { item })
        })
        .await
    }

    pub async fn update_item(&self, req: UpdateItemRequest) -> Result<ItemOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let mut parser = ExpressionParser::new(
                req.expression_attribute_names.as_ref(),
                req.expression_attribute_values.as_ref(),
            );
            let update = parser.parse_update(&req.update_expression)?;
            let condition = req
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            let attributes = self
                .store
                .update_item(
                    &schema,
                    &req.key,
                    &update,
                    condition.as_ref(),
                    req.return_values.unwrap_or_default(),
                )
                .await?;
            Ok(ItemOutput { attributes })
        })
        .await
    }

    pub async fn delete_item(&self, req: DeleteItemRequest) -> Result<ItemOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let mut parser = ExpressionParser::new(
                req.expression_attribute_names.as_ref(),
                req.expression_attribute_values.as_ref(),
            );
            let condition = req
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            let attributes = self
                .store
                .delete_item(
                    &schema,
                    &req.key,
                    condition.as_ref(),
                    req.return_values.unwrap_or_default(),
                )
                .await?;
            Ok(ItemOutput { attributes })
        })
        .await
    }

    pub async fn query(&self, req: QueryRequest) -> Result<QueryOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let gsi = match &req.index_name {
                Some(name) => Some(schema.gsi(name)?),
                None => None,
            };
            let key_schema = gsi.map(|g| &g.key).unwrap_or(&schema.key);

            let mut parser = ExpressionParser::new(
                req.expression_attribute_names.as_ref(),
                req.expression_attribute_values.as_ref(),
            );
            let key_ast = parser.parse_condition(&req.key_condition_expression)?;
            let key_condition = extract_key_condition(&key_ast, key_schema)?;
            let filter = req
                .filter_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            let projection = req
                .projection_expression
                .as_deref()
                .map(|text| parser.parse_projection(text))
                .transpose()?;
            parser.finish()?;

            let page = self
                .store
                .query(QueryParams {
                    schema: &schema,
                    index: gsi,
                    key_condition,
                    filter: filter.as_ref(),
                    projection: projection.as_deref(),
                    scan_index_forward: req.scan_index_forward.unwrap_or(true),
                    limit: req.limit,
                    start_key: req.exclusive_start_key.as_ref(),
                })
                .await?;
            Ok(QueryOutput {
                items: page.items,
                count: page.count,
                scanned_count: page.scanned_count,
                last_evaluated_key: page.last_evaluated_key,
            })
        })
        .await
    }

    pub async fn scan(&self, req: ScanRequest) -> Result<QueryOutput> {
        self.bounded(async {
            let schema = self.catalog.get(&req.table_name).await?;
            let gsi = match &req.index_name {
                Some(name) => Some(schema.gsi(name)?),
                None => None,
            };
            let segment = match (req.segment, req.total_segments) {
                (Some(segment), Some(total)) => Some((segment, total)),
                (None, None) => None,
                _ => {
                    return Err(PdbError::validation(
                        "segment and total segments must be supplied together",
                    ))
                }
            };

            let mut parser = ExpressionParser::new(
                req.expression_attribute_names.as_ref(),
                req.expression_attribute_values.as_ref(),
            );
            let filter = req
                .filter_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            let projection = req
                .projection_expression
                .as_deref()
                .map(|text| parser.parse_projection(text))
                .transpose()?;
            parser.finish()?;

            let page = self
                .store
                .scan(ScanParams {
                    schema: &schema,
                    index: gsi,
                    filter: filter.as_ref(),
                    projection: projection.as_deref(),
                    limit: req.limit,
                    start_key: req.exclusive_start_key.as_ref(),
                    segment,
                })
                .await?;
            Ok(QueryOutput {
                items: page.items,
                count: page.count,
                scanned_count: page.scanned_count,
                last_evaluated_key: page.last_evaluated_key,
            })
        })
        .await
    }

    // ---- batch operations ----

    pub async fn batch_get_item(&self, req: BatchGetItemRequest) -> Result<BatchGetItemOutput> {
        self.bounded(async {
            let mut entries = Vec::new();
            let mut table_specs: HashMap<String, KeysAndAttributes> = HashMap::new();
            for (table_name, spec) in req.request_items {
                let schema = self.catalog.get(&table_name).await?;
                let mut parser =
                    ExpressionParser::new(spec.expression_attribute_names.as_ref(), None);
                let projection = spec
                    .projection_expression
                    .as_deref()
                    .map(|text| parser.parse_projection(text))
                    .transpose()?;
                parser.finish()?;
                for key in &spec.keys {
                    entries.push(BatchGetEntry {
                        schema: schema.clone(),
                        key: key.clone(),
                        projection: projection.clone(),
                    });
                }
                table_specs.insert(table_name, spec);
            }

            let outcome = batch_get(&self.store, entries).await?;

            let mut unprocessed_keys: HashMap<String, KeysAndAttributes> = HashMap::new();
            for entry in outcome.unprocessed {
                let spec = table_specs
                    .get(entry.schema.table_name.as_str())
                    .expect("entries derive from request tables");
                unprocessed_keys
                    .entry(entry.schema.table_name.clone())
                    .or_insert_with(|| KeysAndAttributes {
                        keys: Vec::new(),
                        projection_expression: spec.projection_expression.clone(),
                        expression_attribute_names: spec.expression_attribute_names.clone(),
                        consistent_read: spec.consistent_read,
                    })
                    .keys
                    .push(entry.key);
            }
            Ok(BatchGetItemOutput {
                responses: outcome.responses,
                unprocessed_keys,
            })
        })
        .await
    }

    pub async fn batch_write_item(
        &self,
        req: BatchWriteItemRequest,
    ) -> Result<BatchWriteItemOutput> {
        self.bounded(async {
            let mut entries = Vec::new();
            for (table_name, writes) in req.request_items {
                let schema = self.catalog.get(&table_name).await?;
                for write in writes {
                    let op = match (write.put_request, write.delete_request) {
                        (Some(put), None) => BatchWriteOp::Put(put.item),
                        (None, Some(delete)) => BatchWriteOp::Delete(delete.key),
                        _ => {
                            return Err(PdbError::validation(
                                "each write request must contain exactly one of PutRequest or DeleteRequest",
                            ))
                        }
                    };
                    entries.push(BatchWriteEntry {
                        schema: schema.clone(),
                        op,
                    });
                }
            }

            let outcome = batch_write(&self.store, entries).await?;

            let mut unprocessed_items: HashMap<String, Vec<WriteRequest>> = HashMap::new();
            for entry in outcome.unprocessed {
                let write = match entry.op {
                    BatchWriteOp::Put(item) => WriteRequest {
                        put_request: Some(api::PutRequest { item }),
                        delete_request: None,
                    },
                    BatchWriteOp::Delete(key) => WriteRequest {
                        put_request: None,
                        delete_request: Some(api::DeleteRequest { key }),
                    },
                };
                unprocessed_items
                    .entry(entry.schema.table_name.clone())
                    .or_default()
                    .push(write);
            }
            Ok(BatchWriteItemOutput { unprocessed_items })
        })
        .await
    }

    // ---- transactions ----

    pub async fn transact_write_items(&self, req: TransactWriteItemsRequest) -> Result<()> {
        self.bounded(async {
            let mut ops = Vec::with_capacity(req.transact_items.len());
            for item in &req.transact_items {
                ops.push(self.build_transact_write_op(item).await?);
            }
            self.coordinator.transact_write(&ops).await
        })
        .await
    }

    async fn build_transact_write_op(&self, item: &TransactWriteItem) -> Result<TransactWriteOp> {
        let set_count = [
            item.put.is_some(),
            item.update.is_some(),
            item.delete.is_some(),
            item.condition_check.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if set_count != 1 {
            return Err(PdbError::validation(
                "each transact item must contain exactly one operation",
            ));
        }

        if let Some(put) = &item.put {
            let schema = self.catalog.get(&put.table_name).await?;
            let mut parser = ExpressionParser::new(
                put.expression_attribute_names.as_ref(),
                put.expression_attribute_values.as_ref(),
            );
            let condition = put
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            return Ok(TransactWriteOp::Put {
                schema,
                item: put.item.clone(),
                condition,
            });
        }
        if let Some(update) = &item.update {
            let schema = self.catalog.get(&update.table_name).await?;
            let mut parser = ExpressionParser::new(
                update.expression_attribute_names.as_ref(),
                update.expression_attribute_values.as_ref(),
            );
            let parsed = parser.parse_update(&update.update_expression)?;
            let condition = update
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            return Ok(TransactWriteOp::Update {
                schema,
                key: update.key.clone(),
                update: parsed,
                condition,
            });
        }
        if let Some(delete) = &item.delete {
            let schema = self.catalog.get(&delete.table_name).await?;
            let mut parser = ExpressionParser::new(
                delete.expression_attribute_names.as_ref(),
                delete.expression_attribute_values.as_ref(),
            );
            let condition = delete
                .condition_expression
                .as_deref()
                .map(|text| parser.parse_condition(text))
                .transpose()?;
            parser.finish()?;
            return Ok(TransactWriteOp::Delete {
                schema,
                key: delete.key.clone(),
                condition,
            });
        }
        let check = item
            .condition_check
            .as_ref()
            .expect("variant count checked above");
        let schema = self.catalog.get(&check.table_name).await?;
        let mut parser = ExpressionParser::new(
            check.expression_attribute_names.as_ref(),
            check.expression_attribute_values.as_ref(),
        );
        let condition = parser.parse_condition(&check.condition_expression)?;
        parser.finish()?;
        Ok(TransactWriteOp::ConditionCheck {
            schema,
            key: check.key.clone(),
            condition,
        })
    }

    pub async fn transact_get_items(
        &self,
        req: TransactGetItemsRequest,
    ) -> Result<TransactGetItemsOutput> {
        self.bounded(async {
            let mut gets = Vec::with_capacity(req.transact_items.len());
            for item in &req.transact_items {
                let get = &item.get;
                let schema = self.catalog.get(&get.table_name).await?;
                let mut parser =
                    ExpressionParser::new(get.expression_attribute_names.as_ref(), None);
                let projection = get
                    .projection_expression
                    .as_deref()
                    .map(|text| parser.parse_projection(text))
                    .transpose()?;
                parser.finish()?;
                gets.push(TransactGetOp {
                    schema,
                    key: get.key.clone(),
                    projection,
                });
            }
            let results = self.coordinator.transact_get(&gets).await?;
            Ok(TransactGetItemsOutput {
                responses: results
                    .into_iter()
                    .map(|item| ItemResponse { item })
                    .collect(),
            })
        })
        .await
    }

    // ---- streams ----

    pub async fn list_streams(&self, req: ListStreamsRequest) -> Result<Vec<StreamSummary>> {
        self.bounded(self.streams.list_streams(req.table_name.as_deref()))
            .await
    }

    pub async fn describe_stream(&self, stream_id: &str) -> Result<StreamDescription> {
        self.bounded(self.streams.describe_stream(stream_id)).await
    }

    pub async fn get_shard_iterator(&self, req: GetShardIteratorRequest) -> Result<String> {
        self.bounded(async {
            let sequence_number = req
                .sequence_number
                .as_deref()
                .map(|text| {
                    text.parse::<i64>().map_err(|_| {
                        PdbError::validation(format!("invalid sequence number {text:?}"))
                    })
                })
                .transpose()?;
            self.streams
                .get_shard_iterator(
                    &req.stream_id,
                    &req.shard_id,
                    req.shard_iterator_type,
                    sequence_number,
                )
                .await
        })
        .await
    }

    pub async fn get_records(&self, req: GetRecordsRequest) -> Result<GetRecordsOutput> {
        self.bounded(self.streams.get_records(&req.shard_iterator, req.limit))
            .await
    }
}
