//! SQLite backend executor.
//!
//! Opens the database **read-only** through a lazily connected
//! `sqlx::SqlitePool`, so the validator is not the only thing standing
//! between a query and the data. A missing file surfaces on first use as
//! `BackendUnavailable`, not at startup.
//!
//! Rows are streamed. A result larger than `max_rows` is abandoned as soon
//! as the limit is crossed and reported as an execution failure, so one
//! unbounded `SELECT *` cannot load a whole table into memory.
//!
//! Values are converted by SQLite storage class:
//!
//! | Storage class | JSON |
//! |---------------|------|
//! | `INTEGER` | number |
//! | `REAL` | number (`null` if not finite) |
//! | `TEXT` | string |
//! | `BLOB` | `"<N bytes>"` |
//! | `NULL` | `null` |

use anyhow::Result;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::path::Path;

use askdata_core::backend::{Backend, BackendError};
use askdata_core::models::{QueryResult, Row};

/// Row limit used by [`SqliteBackend::open`].
pub const DEFAULT_MAX_ROWS: usize = 10_000;

pub struct SqliteBackend {
    pool: SqlitePool,
    max_rows: usize,
}

impl SqliteBackend {
    /// Create a read-only, lazily connected pool for the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            max_rows: DEFAULT_MAX_ROWS,
        })
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> &str {
        "sqlite"
    }

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError> {
        let mut stream = sqlx::query(query).fetch(&self.pool);
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();

        while let Some(row) = stream.try_next().await.map_err(classify_error)? {
            if rows.len() == self.max_rows {
                return Err(BackendError::Execution(format!(
                    "result has more than {} rows; add a filter or a LIMIT",
                    self.max_rows
                )));
            }
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            rows.push(convert_row(&row, &columns)?);
        }

        Ok(QueryResult::new(columns, rows).with_query_id(uuid::Uuid::new_v4().to_string()))
    }
}

/// Separate "could not talk to the database" from "the query itself failed".
fn classify_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) if is_open_failure(db.as_ref()) => {
            BackendError::Unavailable(db.message().to_string())
        }
        sqlx::Error::Database(db) => BackendError::Execution(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_) => BackendError::Execution(err.to_string()),
        _ => BackendError::Unavailable(err.to_string()),
    }
}

// SQLITE_CANTOPEN
fn is_open_failure(db: &dyn sqlx::error::DatabaseError) -> bool {
    db.code().as_deref() == Some("14") || db.message().contains("unable to open")
}

fn convert_row(row: &SqliteRow, columns: &[String]) -> Result<Row, BackendError> {
    let mut out = Row::new();
    for (idx, name) in columns.iter().enumerate() {
        out.insert(name.clone(), convert_value(row, idx)?);
    }
    Ok(out)
}

fn convert_value(row: &SqliteRow, idx: usize) -> Result<Value, BackendError> {
    let raw = row.try_get_raw(idx).map_err(classify_error)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(idx).map_err(classify_error)?),
        "REAL" | "NUMERIC" => {
            let f = row.try_get_unchecked::<f64, _>(idx).map_err(classify_error)?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx).map_err(classify_error)?;
            Value::String(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::String(row.try_get_unchecked::<String, _>(idx).map_err(classify_error)?),
    };
    Ok(value)
}
