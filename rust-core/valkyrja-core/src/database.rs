//! # Database Module
//!
//! SQLx connectivity for SQLite and PostgreSQL, and the SQL-backed
//! [`Repository`] used to resolve entity route parameters.
//!
//! Table and column names cannot be bound as query parameters, so they are
//! checked against a strict identifier grammar before being spliced into
//! the statement. Lookup values are always bound.

use crate::dispatch::BoxFuture;
use crate::error::{Error, Result};
use crate::resolver::{Entity, Repository, PRIMARY_KEY};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A row keyed by column name
pub type DbRow = BTreeMap<String, DbValue>;

/// Database connection pool supporting multiple backends
#[derive(Clone)]
pub enum DatabasePool {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
}

impl DatabasePool {
    /// Connect to whichever backend the URL scheme names
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unknown scheme or `Error::Database`
    /// if the connection fails.
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Self::connect_sqlite(url, max_connections).await
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url, max_connections).await
        } else {
            Err(Error::Config {
                message: format!("unsupported database URL scheme: {url}"),
            })
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Arguments
    ///
    /// * `url` - Database URL (e.g., "sqlite:app.db" or "sqlite::memory:")
    /// * `max_connections` - Maximum pool size (default: 10)
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool_size = max_connections.unwrap_or(10);
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("SQLite connection failed: {e}"),
            })?;

        info!(pool_size, "Connected to SQLite");
        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection fails.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool_size = max_connections.unwrap_or(10);
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("PostgreSQL connection failed: {e}"),
            })?;

        info!(pool_size, "Connected to PostgreSQL");
        Ok(Self::Postgres(pool))
    }

    /// Execute a statement that returns no rows
    ///
    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the statement fails.
    pub async fn execute(&self, query: &str) -> Result<u64> {
        let result = match self {
            Self::Sqlite(pool) => sqlx::query(query).execute(pool).await.map(|r| r.rows_affected()),
            Self::Postgres(pool) => sqlx::query(query).execute(pool).await.map(|r| r.rows_affected()),
        };
        result.map_err(query_error)
    }

    /// Fetch the first row of `table` whose `column` equals `value`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for an unsafe identifier or
    /// `Error::Database` if the query fails.
    pub async fn find_where(&self, table: &str, column: &str, value: &str) -> Result<Option<DbRow>> {
        check_identifier(table)?;
        check_identifier(column)?;

        match self {
            Self::Sqlite(pool) => {
                let sql = format!("SELECT * FROM {table} WHERE {column} = ? LIMIT 1");
                let row: Option<SqliteRow> = sqlx::query(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_error)?;
                Ok(row.map(|r| sqlite_row_to_map(&r)))
            }
            Self::Postgres(pool) => {
                let sql = format!(r#"SELECT * FROM "{table}" WHERE "{column}"::text = $1 LIMIT 1"#);
                let row: Option<PgRow> = sqlx::query(&sql)
                    .bind(value)
                    .fetch_optional(pool)
                    .await
                    .map_err(query_error)?;
                Ok(row.map(|r| pg_row_to_map(&r)))
            }
        }
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(_) => f.write_str("DatabasePool::Sqlite"),
            Self::Postgres(_) => f.write_str("DatabasePool::Postgres"),
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn query_error(e: sqlx::Error) -> Error {
    Error::Database {
        message: format!("Query error: {e}"),
    }
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`
fn check_identifier(identifier: &str) -> Result<()> {
    let mut chars = identifier.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("unsafe SQL identifier `{identifier}`")))
    }
}

/// Column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DbValue {
    /// Render the value the way it would appear in a URL segment
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Convert SQLite row to a column map
fn sqlite_row_to_map(row: &SqliteRow) -> DbRow {
    let mut map = DbRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" => row.try_get::<i64, _>(i).map(DbValue::Int),
            "REAL" => row.try_get::<f64, _>(i).map(DbValue::Float),
            "BOOLEAN" => row.try_get::<bool, _>(i).map(DbValue::Bool),
            "BLOB" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
            _ => row.try_get::<String, _>(i).map(DbValue::String),
        };
        map.insert(column.name().to_string(), value.unwrap_or(DbValue::Null));
    }

    map
}

/// Convert PostgreSQL row to a column map
fn pg_row_to_map(row: &PgRow) -> DbRow {
    let mut map = DbRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<i16, _>(i).map(|v| DbValue::Int(v.into())),
            "INT4" => row.try_get::<i32, _>(i).map(|v| DbValue::Int(v.into())),
            "INT8" => row.try_get::<i64, _>(i).map(DbValue::Int),
            "FLOAT4" => row.try_get::<f32, _>(i).map(|v| DbValue::Float(v.into())),
            "FLOAT8" => row.try_get::<f64, _>(i).map(DbValue::Float),
            "BOOL" => row.try_get::<bool, _>(i).map(DbValue::Bool),
            "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
            _ => row.try_get::<String, _>(i).map(DbValue::String),
        };
        map.insert(column.name().to_string(), value.unwrap_or(DbValue::Null));
    }

    map
}

/// Repository backed by a SQL pool; entity names are table names
#[derive(Debug, Clone)]
pub struct SqlRepository {
    pool: DatabasePool,
    primary_key: String,
}

impl SqlRepository {
    /// Repository whose tables use `id` as primary key
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            primary_key: PRIMARY_KEY.to_string(),
        }
    }

    /// Use another primary key column
    #[must_use]
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

impl Repository for SqlRepository {
    fn find<'a>(
        &'a self,
        entity: &'a str,
        column: Option<&'a str>,
        value: &'a str,
    ) -> BoxFuture<'a, Result<Option<Entity>>> {
        Box::pin(async move {
            let column = column.unwrap_or(self.primary_key.as_str());
            debug!(table = entity, column, "Entity lookup");
            let row = self.pool.find_where(entity, column, value).await?;
            Ok(row.map(|fields| Entity::new(entity, fields)))
        })
    }
}
