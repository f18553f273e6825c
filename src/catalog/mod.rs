//! Table metadata catalog.
//!
//! One row per table in `pdb_tables`, with the whole schema serialized as
//! JSON. Reads go through an in-memory cache invalidated by CreateTable,
//! UpdateTable and DeleteTable; the cache hands out `Arc<TableSchema>` so a
//! running operation keeps a consistent view.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sea_query::{Expr, ExprTrait, Order, Query};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::encryption::AttributeEncryption;
use crate::error::{PdbError, Result};
use crate::storage::executor::{SqlExecutor, SqlTx};
use crate::storage::keys;
use crate::storage::schema::{GsiProjections, Items, Tables};
use crate::streams::{self, StreamStatus};
use crate::types::attribute::item_from_string;
use crate::types::schema::{
    GsiSchema, KeySchema, ProjectionType, StreamViewType, TableSchema, TtlSettings,
};

/// CreateTable input.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub table_name: String,
    pub key: KeySchema,
    pub gsis: Vec<GsiSchema>,
    pub stream_view: Option<StreamViewType>,
}

/// UpdateTable input: TTL and stream settings only.
#[derive(Debug, Clone, Default)]
pub struct TableUpdate {
    pub ttl: Option<TtlSettings>,
    pub stream: Option<StreamChange>,
}

/// Stream setting change carried by UpdateTable.
#[derive(Debug, Clone)]
pub enum StreamChange {
    Enable(StreamViewType),
    Disable,
}

/// ListTables output page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableListing {
    pub table_names: Vec<String>,
    pub last_evaluated_table_name: Option<String>,
}

/// Persistent catalog plus its read-through cache.
pub struct TableCatalog {
    executor: Arc<dyn SqlExecutor>,
    clock: Arc<dyn Clock>,
    encryption: Arc<dyn AttributeEncryption>,
    default_stream_view: Option<StreamViewType>,
    cache: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl TableCatalog {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        clock: Arc<dyn Clock>,
        encryption: Arc<dyn AttributeEncryption>,
        default_stream_view: Option<StreamViewType>,
    ) -> Self {
        Self {
            executor,
            clock,
            encryption,
            default_stream_view,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Create a table and provision its stream, if one is requested (or
    /// configured as the default).
    pub async fn create_table(&self, def: TableDefinition) -> Result<Arc<TableSchema>> {
        validate_definition(&def)?;
        let now = self.clock.now_millis();
        let view = def.stream_view.or(self.default_stream_view);
        let schema = TableSchema {
            table_name: def.table_name.clone(),
            key: def.key,
            gsis: def.gsis,
            ttl: None,
            stream_view: view,
            stream_id: view.map(|_| new_stream_id(&def.table_name)),
            created_at: now,
        };

        let mut tx = self.executor.begin(false).await?;
        let dialect = self.executor.dialect();
        let query = {
            let stmt = Query::insert()
                .into_table(Tables::Table)
                .columns([Tables::TableName, Tables::SchemaJson, Tables::CreatedAt])
                .values_panic([
                    schema.table_name.as_str().into(),
                    serde_json::to_string(&schema)?.into(),
                    now.into(),
                ])
                .to_owned();
            dialect.insert(&stmt)?
        };
        if let Err(err) = tx.execute(&query).await {
            return Err(translate_duplicate(err, &schema.table_name));
        }
        if let (Some(view), Some(stream_id)) = (schema.stream_view, schema.stream_id.as_deref()) {
            streams::create_stream(
                tx.as_mut(),
                dialect,
                stream_id,
                &schema.table_name,
                view,
                now,
            )
            .await?;
        }
        tx.commit().await?;

        info!(table = %schema.table_name, "Created table");
        let schema = Arc::new(schema);
        self.cache
            .write()
            .insert(schema.table_name.clone(), schema.clone());
        Ok(schema)
    }

    /// Cached schema lookup.
    pub async fn get(&self, table_name: &str) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.cache.read().get(table_name) {
            return Ok(schema.clone());
        }
        let schema = self.load(table_name).await?;
        self.cache
            .write()
            .insert(table_name.to_string(), schema.clone());
        Ok(schema)
    }

    async fn load(&self, table_name: &str) -> Result<Arc<TableSchema>> {
        let query = {
            let stmt = Query::select()
                .column(Tables::SchemaJson)
                .from(Tables::Table)
                .and_where(Expr::col(Tables::TableName).eq(table_name))
                .to_owned();
            self.executor.dialect().select(&stmt)?
        };
        let row = self
            .executor
            .fetch_optional(&query)
            .await?
            .ok_or_else(|| PdbError::ResourceNotFound(format!("table {table_name}")))?;
        let schema: TableSchema = serde_json::from_str(row.text("schema_json")?)
            .map_err(|e| PdbError::Internal(format!("corrupt table schema: {e}")))?;
        Ok(Arc::new(schema))
    }

    /// DescribeTable: always reads through to the backend.
    pub async fn describe_table(&self, table_name: &str) -> Result<Arc<TableSchema>> {
        let schema = self.load(table_name).await?;
        self.cache
            .write()
            .insert(table_name.to_string(), schema.clone());
        Ok(schema)
    }

    /// Every table schema, fresh from the backend. Used by the background
    /// sweepers, which must see tables created by other processes.
    pub async fn all_tables(&self) -> Result<Vec<Arc<TableSchema>>> {
        let query = {
            let stmt = Query::select()
                .column(Tables::SchemaJson)
                .from(Tables::Table)
                .order_by(Tables::TableName, Order::Asc)
                .to_owned();
            self.executor.dialect().select(&stmt)?
        };
        let rows = self.executor.fetch_all(&query).await?;
        let mut schemas = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema: TableSchema = serde_json::from_str(row.text("schema_json")?)
                .map_err(|e| PdbError::Internal(format!("corrupt table schema: {e}")))?;
            schemas.push(Arc::new(schema));
        }
        Ok(schemas)
    }

    /// List table names with optional prefix filter and pagination.
    pub async fn list_tables(
        &self,
        prefix: Option<&str>,
        limit: Option<u32>,
        exclusive_start: Option<&str>,
    ) -> Result<TableListing> {
        let query = {
            let stmt = Query::select()
                .column(Tables::TableName)
                .from(Tables::Table)
                .order_by(Tables::TableName, Order::Asc)
                .to_owned();
            self.executor.dialect().select(&stmt)?
        };
        let rows = self.executor.fetch_all(&query).await?;
        let mut names: Vec<String> = Vec::new();
        for row in &rows {
            names.push(row.text("table_name")?.to_string());
        }
        let names = names
            .into_iter()
            .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
            .filter(|name| exclusive_start.map_or(true, |start| name.as_str() > start))
            .collect::<Vec<_>>();

        let limit = limit.unwrap_or(100).max(1) as usize;
        let truncated = names.len() > limit;
        let mut page: Vec<String> = names.into_iter().take(limit).collect();
        let last = if truncated { page.last().cloned() } else { None };
        page.shrink_to_fit();
        Ok(TableListing {
            table_names: page,
            last_evaluated_table_name: last,
        })
    }

    /// Delete a table, its items, its GSI projections, and its streams in
    /// one transaction.
    pub async fn delete_table(&self, table_name: &str) -> Result<()> {
        // Existence check up front so callers get ResourceNotFound.
        self.get(table_name).await?;

        let dialect = self.executor.dialect();
        let mut tx = self.executor.begin(false).await?;

        let query = {
            let stmt = Query::delete()
                .from_table(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(table_name))
                .to_owned();
            dialect.delete(&stmt)?
        };
        tx.execute(&query).await?;

        let query = {
            let stmt = Query::delete()
                .from_table(GsiProjections::Table)
                .and_where(Expr::col(GsiProjections::TableName).eq(table_name))
                .to_owned();
            dialect.delete(&stmt)?
        };
        tx.execute(&query).await?;

        streams::delete_streams_for_table(tx.as_mut(), dialect, table_name).await?;

        let query = {
            let stmt = Query::delete()
                .from_table(Tables::Table)
                .and_where(Expr::col(Tables::TableName).eq(table_name))
                .to_owned();
            dialect.delete(&stmt)?
        };
        tx.execute(&query).await?;
        tx.commit().await?;

        self.cache.write().remove(table_name);
        info!(table = %table_name, "Deleted table");
        Ok(())
    }

    /// Adjust TTL and stream settings.
    pub async fn update_table(
        &self,
        table_name: &str,
        update: TableUpdate,
    ) -> Result<Arc<TableSchema>> {
        let current = self.get(table_name).await?;
        let mut schema = (*current).clone();

        let ttl_newly_enabled = match &update.ttl {
            Some(ttl) => {
                let was = schema.ttl_attribute().map(str::to_string);
                schema.ttl = Some(ttl.clone());
                ttl.enabled && was.as_deref() != Some(ttl.attribute_name.as_str())
            }
            None => false,
        };

        let dialect = self.executor.dialect();
        let mut tx = self.executor.begin(false).await?;

        match &update.stream {
            Some(StreamChange::Enable(view)) => {
                schema.stream_view = Some(*view);
                match schema.stream_id.as_deref() {
                    Some(stream_id) => {
                        streams::set_stream_status(
                            tx.as_mut(),
                            dialect,
                            stream_id,
                            StreamStatus::Enabled,
                            Some(*view),
                        )
                        .await?;
                    }
                    None => {
                        let stream_id = new_stream_id(table_name);
                        streams::create_stream(
                            tx.as_mut(),
                            dialect,
                            &stream_id,
                            table_name,
                            *view,
                            self.clock.now_millis(),
                        )
                        .await?;
                        schema.stream_id = Some(stream_id);
                    }
                }
            }
            Some(StreamChange::Disable) => {
                schema.stream_view = None;
                if let Some(stream_id) = schema.stream_id.as_deref() {
                    streams::set_stream_status(
                        tx.as_mut(),
                        dialect,
                        stream_id,
                        StreamStatus::Disabled,
                        None,
                    )
                    .await?;
                }
            }
            None => {}
        }

        let query = {
            let stmt = Query::update()
                .table(Tables::Table)
                .value(Tables::SchemaJson, serde_json::to_string(&schema)?)
                .and_where(Expr::col(Tables::TableName).eq(table_name))
                .to_owned();
            dialect.update(&stmt)?
        };
        tx.execute(&query).await?;

        if ttl_newly_enabled {
            self.backfill_ttl_epochs(tx.as_mut(), &schema).await?;
        }
        tx.commit().await?;

        let schema = Arc::new(schema);
        self.cache
            .write()
            .insert(table_name.to_string(), schema.clone());
        info!(table = %table_name, "Updated table settings");
        Ok(schema)
    }

    /// Recompute the indexed `ttl_epoch` column for existing rows after
    /// TTL is enabled on a populated table.
    async fn backfill_ttl_epochs(&self, tx: &mut dyn SqlTx, schema: &TableSchema) -> Result<()> {
        let Some(ttl_attr) = schema.ttl_attribute() else {
            return Ok(());
        };
        let dialect = self.executor.dialect();
        let query = {
            let stmt = Query::select()
                .columns([Items::KeyJson, Items::PayloadJson])
                .from(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                .to_owned();
            dialect.select(&stmt)?
        };
        let rows = tx.fetch_all(&query).await?;
        for row in rows {
            let payload = self
                .encryption
                .decrypt(&schema.table_name, row.text("payload_json")?.to_string())?;
            let item = item_from_string(&payload)?;
            let epoch = keys::ttl_epoch_of(item.get(ttl_attr));
            let query = {
                let stmt = Query::update()
                    .table(Items::Table)
                    .value(Items::TtlEpoch, epoch)
                    .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                    .and_where(Expr::col(Items::KeyJson).eq(row.text("key_json")?))
                    .to_owned();
                dialect.update(&stmt)?
            };
            tx.execute(&query).await?;
        }
        Ok(())
    }
}

fn new_stream_id(table_name: &str) -> String {
    format!("{}/stream/{}", table_name, Uuid::new_v4())
}

fn translate_duplicate(err: PdbError, table_name: &str) -> PdbError {
    let text = err.to_string().to_ascii_lowercase();
    if text.contains("unique") || text.contains("duplicate") {
        PdbError::TableAlreadyExists(table_name.to_string())
    } else {
        err
    }
}

fn validate_definition(def: &TableDefinition) -> Result<()> {
    if def.table_name.is_empty() {
        return Err(PdbError::validation("table name must not be empty"));
    }
    if let Some(range) = &def.key.range {
        if range.name == def.key.hash.name {
            return Err(PdbError::validation(
                "hash and range key must be distinct attributes",
            ));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for gsi in &def.gsis {
        if gsi.index_name.is_empty() {
            return Err(PdbError::validation("index name must not be empty"));
        }
        if !seen.insert(gsi.index_name.as_str()) {
            return Err(PdbError::validation(format!(
                "duplicate index name {}",
                gsi.index_name
            )));
        }
        if gsi.projection != ProjectionType::Include && !gsi.non_key_attributes.is_empty() {
            return Err(PdbError::validation(
                "non-key attributes are only valid with an INCLUDE projection",
            ));
        }
        if gsi.projection == ProjectionType::Include && gsi.non_key_attributes.is_empty() {
            return Err(PdbError::validation(
                "INCLUDE projection requires non-key attributes",
            ));
        }
    }
    Ok(())
}
