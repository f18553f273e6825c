//! Storage layer: executor abstraction, physical schema, and the item
//! store with its read and batch paths.

pub mod batch;
pub mod executor;
pub mod item_store;
pub mod keys;
pub mod read;
pub mod retry;
pub mod schema;

pub use executor::{PgExecutor, SqlDialect, SqlExecutor, SqliteExecutor};
pub use item_store::ItemStore;
pub use read::{QueryParams, ReadPage, ScanParams};

use std::sync::Arc;

use crate::error::Result;

/// Provision the physical schema. Idempotent; runs at client build time.
pub async fn provision(executor: &Arc<dyn SqlExecutor>) -> Result<()> {
    for statement in schema::DDL {
        executor.execute_ddl(statement).await?;
    }
    Ok(())
}
