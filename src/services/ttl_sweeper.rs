//! TTL sweeper.
//!
//! Periodically removes items whose TTL attribute holds an epoch-seconds
//! value at or before "now". Each removal goes through the standard delete
//! pipeline (row lock, expiry re-check, GSI cleanup, `REMOVE` stream record
//! with a service user identity), so a concurrent update that extends the
//! expiry wins. Best-effort: while the worker is down, expired items stay
//! queryable.

use std::sync::Arc;
use std::time::Duration;

use sea_query::{Expr, ExprTrait, Order, Query};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::catalog::TableCatalog;
use crate::clock::Clock;
use crate::config::TtlConfig;
use crate::error::Result;
use crate::storage::schema::Items;
use crate::storage::ItemStore;
use crate::types::attribute::item_from_string;
use crate::types::schema::TableSchema;

/// Background worker that physically removes expired items.
pub struct TtlSweeper {
    catalog: Arc<TableCatalog>,
    store: Arc<ItemStore>,
    clock: Arc<dyn Clock>,
    config: TtlConfig,
    principal: String,
}

impl TtlSweeper {
    pub fn new(
        catalog: Arc<TableCatalog>,
        store: Arc<ItemStore>,
        clock: Arc<dyn Clock>,
        config: TtlConfig,
        principal: String,
    ) -> Self {
        Self {
            catalog,
            store,
            clock,
            config,
            principal,
        }
    }

    /// Run until the shutdown signal flips. An in-flight sweep finishes
    /// its current batch before exiting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            batch_size = self.config.batch_size,
            "Starting TTL sweeper"
        );
        let mut ticker = interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "TTL sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A closed channel means the owner is gone; stop too.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("TTL sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every TTL-enabled table. Returns the number of items
    /// removed.
    pub async fn sweep_once(&self) -> Result<u64> {
        let now_seconds = self.clock.now_seconds();
        let mut removed = 0;
        for schema in self.catalog.all_tables().await? {
            if schema.ttl_attribute().is_none() {
                continue;
            }
            match self.sweep_table(&schema, now_seconds).await {
                Ok(count) => removed += count,
                Err(err) => {
                    warn!(table = %schema.table_name, error = %err, "Sweep failed for table");
                }
            }
        }
        if removed > 0 {
            debug!(removed, "TTL sweep removed expired items");
        }
        Ok(removed)
    }

    async fn sweep_table(&self, schema: &TableSchema, now_seconds: i64) -> Result<u64> {
        let executor = self.store.executor();
        let query = {
            let stmt = Query::select()
                .column(Items::KeyJson)
                .from(Items::Table)
                .and_where(Expr::col(Items::TableName).eq(schema.table_name.as_str()))
                .and_where(Expr::col(Items::TtlEpoch).is_not_null())
                .and_where(Expr::col(Items::TtlEpoch).lte(now_seconds))
                .order_by(Items::TtlEpoch, Order::Asc)
                .limit(u64::from(self.config.batch_size))
                .to_owned();
            executor.dialect().select(&stmt)?
        };
        let rows = executor.fetch_all(&query).await?;

        let mut removed = 0;
        for row in &rows {
            let key_map = item_from_string(row.text("key_json")?)?;
            if self
                .store
                .ttl_delete(schema, &key_map, now_seconds, &self.principal)
                .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
