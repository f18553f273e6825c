//! SQL executor abstraction.
//!
//! The core talks to the database through `SqlExecutor`/`SqlTx` trait
//! objects so the same store code runs on PostgreSQL and embedded SQLite.
//! Statements are built with sea-query, rendered per dialect with bind
//! placeholders, and rows come back as backend-neutral `SqlRow`s.
//!
//! Only text and integer columns are ever selected; numeric key columns
//! exist purely for native ordering and never travel back to the
//! application (items are reconstructed from their JSON payloads).

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use sea_query::{
    DeleteStatement, InsertStatement, PostgresQueryBuilder, SelectStatement, SqliteQueryBuilder,
    UpdateStatement, Value, Values,
};
use sqlx::{Column, PgPool, Row, SqlitePool, TypeInfo, ValueRef};

use crate::error::{PdbError, Result};

/// A bind parameter. Options keep the SQL type attached to NULLs.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Text(Option<String>),
    I64(Option<i64>),
    Decimal(Option<BigDecimal>),
}

/// One column value read back from the database.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
}

/// A row as named columns.
#[derive(Debug, Clone)]
pub struct SqlRow {
    cols: Vec<(String, SqlValue)>,
}

impl SqlRow {
    fn value(&self, name: &str) -> Result<&SqlValue> {
        self.cols
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
            .ok_or_else(|| PdbError::Internal(format!("missing column {name}")))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.value(name)? {
            SqlValue::Text(text) => Ok(text),
            other => Err(PdbError::Internal(format!(
                "column {name} is not text: {other:?}"
            ))),
        }
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<&str>> {
        match self.value(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(text) => Ok(Some(text)),
            other => Err(PdbError::Internal(format!(
                "column {name} is not text: {other:?}"
            ))),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.value(name)? {
            SqlValue::Int(value) => Ok(*value),
            other => Err(PdbError::Internal(format!(
                "column {name} is not an integer: {other:?}"
            ))),
        }
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.value(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(value) => Ok(Some(*value)),
            other => Err(PdbError::Internal(format!(
                "column {name} is not an integer: {other:?}"
            ))),
        }
    }
}

/// Rendered statement plus its bind parameters.
pub type BoundSql = (String, Vec<SqlParam>);

/// Statement rendering per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn select(&self, stmt: &SelectStatement) -> Result<BoundSql> {
        let (sql, values) = match self {
            SqlDialect::Postgres => stmt.build(PostgresQueryBuilder),
            SqlDialect::Sqlite => stmt.build(SqliteQueryBuilder),
        };
        Ok((sql, convert_values(values)?))
    }

    /// Render a select with a row lock where the backend supports one.
    /// SQLite admits a single writer, so the clause is omitted there.
    pub fn select_locked(&self, mut stmt: SelectStatement) -> Result<BoundSql> {
        if matches!(self, SqlDialect::Postgres) {
            stmt.lock(sea_query::LockType::Update);
        }
        self.select(&stmt)
    }

    pub fn insert(&self, stmt: &InsertStatement) -> Result<BoundSql> {
        let (sql, values) = match self {
            SqlDialect::Postgres => stmt.build(PostgresQueryBuilder),
            SqlDialect::Sqlite => stmt.build(SqliteQueryBuilder),
        };
        Ok((sql, convert_values(values)?))
    }

    pub fn update(&self, stmt: &UpdateStatement) -> Result<BoundSql> {
        let (sql, values) = match self {
            SqlDialect::Postgres => stmt.build(PostgresQueryBuilder),
            SqlDialect::Sqlite => stmt.build(SqliteQueryBuilder),
        };
        Ok((sql, convert_values(values)?))
    }

    pub fn delete(&self, stmt: &DeleteStatement) -> Result<BoundSql> {
        let (sql, values) = match self {
            SqlDialect::Postgres => stmt.build(PostgresQueryBuilder),
            SqlDialect::Sqlite => stmt.build(SqliteQueryBuilder),
        };
        Ok((sql, convert_values(values)?))
    }
}

fn convert_values(values: Values) -> Result<Vec<SqlParam>> {
    values.into_iter().map(convert_value).collect()
}

fn convert_value(value: Value) -> Result<SqlParam> {
    Ok(match value {
        Value::Bool(v) => SqlParam::I64(v.map(i64::from)),
        Value::TinyInt(v) => SqlParam::I64(v.map(i64::from)),
        Value::SmallInt(v) => SqlParam::I64(v.map(i64::from)),
        Value::Int(v) => SqlParam::I64(v.map(i64::from)),
        Value::BigInt(v) => SqlParam::I64(v),
        Value::TinyUnsigned(v) => SqlParam::I64(v.map(i64::from)),
        Value::SmallUnsigned(v) => SqlParam::I64(v.map(i64::from)),
        Value::Unsigned(v) => SqlParam::I64(v.map(i64::from)),
        Value::BigUnsigned(v) => SqlParam::I64(match v {
            Some(v) => Some(i64::try_from(v).map_err(|_| {
                PdbError::Internal("unsigned bind parameter out of range".into())
            })?),
            None => None,
        }),
        Value::String(v) => SqlParam::Text(v.map(|s| *s)),
        Value::BigDecimal(v) => SqlParam::Decimal(v.map(|d| *d)),
        other => {
            return Err(PdbError::Internal(format!(
                "unsupported bind parameter: {other:?}"
            )))
        }
    })
}

/// Executes statements against a connection pool.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn fetch_all(&self, sql: &BoundSql) -> Result<Vec<SqlRow>>;
    async fn fetch_optional(&self, sql: &BoundSql) -> Result<Option<SqlRow>>;
    async fn execute(&self, sql: &BoundSql) -> Result<u64>;
    /// Run one raw DDL statement (schema provisioning).
    async fn execute_ddl(&self, sql: &str) -> Result<()>;
    /// Open a transaction. `snapshot` requests repeatable-read isolation
    /// where the backend distinguishes it.
    async fn begin(&self, snapshot: bool) -> Result<Box<dyn SqlTx>>;
    fn dialect(&self) -> SqlDialect;
}

/// An open transaction. Dropping without commit rolls back.
#[async_trait]
pub trait SqlTx: Send {
    async fn fetch_all(&mut self, sql: &BoundSql) -> Result<Vec<SqlRow>>;
    async fn fetch_optional(&mut self, sql: &BoundSql) -> Result<Option<SqlRow>>;
    async fn execute(&mut self, sql: &BoundSql) -> Result<u64>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

// ---- PostgreSQL ----

/// PostgreSQL-backed executor.
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_pg<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::I64(v) => query.bind(*v),
            SqlParam::Decimal(v) => query.bind(v.clone()),
        };
    }
    query
}

fn pg_row(row: &sqlx::postgres::PgRow) -> Result<SqlRow> {
    let mut cols = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match column.type_info().name() {
                "INT8" => SqlValue::Int(row.try_get::<i64, _>(i)?),
                "INT4" => SqlValue::Int(i64::from(row.try_get::<i32, _>(i)?)),
                "INT2" => SqlValue::Int(i64::from(row.try_get::<i16, _>(i)?)),
                "BOOL" => SqlValue::Int(i64::from(row.try_get::<bool, _>(i)?)),
                _ => SqlValue::Text(row.try_get::<String, _>(i)?),
            }
        };
        cols.push((column.name().to_string(), value));
    }
    Ok(SqlRow { cols })
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn fetch_all(&self, bound: &BoundSql) -> Result<Vec<SqlRow>> {
        let (sql, params) = bound;
        let rows = bind_pg(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pg_row).collect()
    }

    async fn fetch_optional(&self, bound: &BoundSql) -> Result<Option<SqlRow>> {
        let (sql, params) = bound;
        let row = bind_pg(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pg_row).transpose()
    }

    async fn execute(&self, bound: &BoundSql) -> Result<u64> {
        let (sql, params) = bound;
        let result = bind_pg(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self, snapshot: bool) -> Result<Box<dyn SqlTx>> {
        let mut tx = self.pool.begin().await?;
        if snapshot {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PgTx { tx }))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl SqlTx for PgTx {
    async fn fetch_all(&mut self, bound: &BoundSql) -> Result<Vec<SqlRow>> {
        let (sql, params) = bound;
        let rows = bind_pg(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(pg_row).collect()
    }

    async fn fetch_optional(&mut self, bound: &BoundSql) -> Result<Option<SqlRow>> {
        let (sql, params) = bound;
        let row = bind_pg(sqlx::query(sql), params)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(pg_row).transpose()
    }

    async fn execute(&mut self, bound: &BoundSql) -> Result<u64> {
        let (sql, params) = bound;
        let result = bind_pg(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---- SQLite ----

/// SQLite-backed executor (embedded backend).
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn bind_sqlite<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::I64(v) => query.bind(*v),
            // SQLite has no exact decimal type; numeric key columns take
            // its NUMERIC affinity. Arithmetic never happens in SQL.
            SqlParam::Decimal(v) => query.bind(v.as_ref().and_then(|d| d.to_f64())),
        };
    }
    query
}

fn sqlite_row(row: &sqlx::sqlite::SqliteRow) -> Result<SqlRow> {
    let mut cols = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get::<i64, _>(i)?),
                "REAL" => SqlValue::Text(row.try_get::<f64, _>(i)?.to_string()),
                _ => SqlValue::Text(row.try_get::<String, _>(i)?),
            }
        };
        cols.push((column.name().to_string(), value));
    }
    Ok(SqlRow { cols })
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn fetch_all(&self, bound: &BoundSql) -> Result<Vec<SqlRow>> {
        let (sql, params) = bound;
        let rows = bind_sqlite(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sqlite_row).collect()
    }

    async fn fetch_optional(&self, bound: &BoundSql) -> Result<Option<SqlRow>> {
        let (sql, params) = bound;
        let row = bind_sqlite(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sqlite_row).transpose()
    }

    async fn execute(&self, bound: &BoundSql) -> Result<u64> {
        let (sql, params) = bound;
        let result = bind_sqlite(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self, _snapshot: bool) -> Result<Box<dyn SqlTx>> {
        // SQLite transactions are always serializable.
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }
}

struct SqliteTx {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl SqlTx for SqliteTx {
    async fn fetch_all(&mut self, bound: &BoundSql) -> Result<Vec<SqlRow>> {
        let (sql, params) = bound;
        let rows = bind_sqlite(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(sqlite_row).collect()
    }

    async fn fetch_optional(&mut self, bound: &BoundSql) -> Result<Option<SqlRow>> {
        let (sql, params) = bound;
        let row = bind_sqlite(sqlx::query(sql), params)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(sqlite_row).transpose()
    }

    async fn execute(&mut self, bound: &BoundSql) -> Result<u64> {
        let (sql, params) = bound;
        let result = bind_sqlite(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
