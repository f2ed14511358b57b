//! Table-store capability used by every pipeline component.
//!
//! Components never write SQL. They describe reads with an immutable
//! [`Query`] (built once through [`Query::select`] and handed to
//! [`TableStore::select`]) and writes with plain [`Row`]s. Every operation
//! answers with the same [`QueryResult`] shape.
//!
//! Two implementations exist:
//! - [`sqlite::SqliteStore`]: Diesel over SQLite, embedded migrations,
//!   all values bound, identifiers checked against [`tables`].
//! - [`memory::MemoryStore`]: same contract kept in process, for tests and
//!   dry runs.
//!
//! Example:
//! ```
//! use asset_sync::store::{Query, TableStore, memory::MemoryStore, row, tables};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let r = row([("ticker", json!("BOVA11.SA")), ("name", json!("BOVA11"))]);
//! store.upsert(tables::SYMBOLS, &[r], &["ticker"]).unwrap();
//!
//! let q = Query::select(tables::SYMBOLS).eq("ticker", "BOVA11.SA").limit(1).build();
//! assert_eq!(store.select(&q).unwrap().data.len(), 1);
//! ```

pub mod memory;
pub mod query;
pub mod sqlite;
pub mod tables;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use query::{Filter, FilterOp, OrderBy, Query, QueryBuilder};

/// One table row: column name to JSON value, in column order.
pub type Row = IndexMap<String, Value>;

/// Uniform result of every store operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Rows read, or rows as stored after a write.
    pub data: Vec<Row>,
}

impl QueryResult {
    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.data.first()
    }

    /// `true` when no row came back.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Shorthand result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`TableStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database could not be reached or opened.
    #[error("storage unavailable: {0}")]
    Connection(String),

    /// Update and delete refuse to run without a filter.
    #[error("{op} on `{table}` requires at least one filter")]
    MissingFilter {
        /// Operation name.
        op: &'static str,
        /// Target table.
        table: String,
    },

    /// Table not declared in [`tables`].
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// Column not declared for the table.
    #[error("unknown column `{column}` on `{table}`")]
    UnknownColumn {
        /// Target table.
        table: String,
        /// Offending column.
        column: String,
    },

    /// A row written with upsert lacks one of the conflict keys.
    #[error("row for `{table}` is missing conflict key `{key}`")]
    MissingConflictKey {
        /// Target table.
        table: String,
        /// Missing key column.
        key: String,
    },

    /// A write with no columns.
    #[error("empty row for `{table}`")]
    EmptyRow {
        /// Target table.
        table: String,
    },

    /// The value cannot be stored in the column's type.
    #[error("unsupported value for `{column}`: {value}")]
    UnsupportedValue {
        /// Column name.
        column: String,
        /// Offending value, rendered as JSON.
        value: String,
    },

    /// Insert hit an existing primary key.
    #[error("duplicate key on `{table}`")]
    Duplicate {
        /// Target table.
        table: String,
    },

    /// Error reported by Diesel.
    #[error(transparent)]
    Database(#[from] diesel::result::Error),

    /// Pending migrations could not be applied.
    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored row could not be decoded into its model.
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Query-builder capability consumed by the pipeline.
///
/// Calls are synchronous and blocking. Implementations must be shareable
/// across the scheduler's worker tasks.
pub trait TableStore: Send + Sync {
    /// Reads rows matching `query`.
    fn select(&self, query: &Query) -> StoreResult<QueryResult>;

    /// Inserts one row; fails on an existing primary key.
    fn insert(&self, table: &str, row: Row) -> StoreResult<QueryResult>;

    /// Inserts `rows`, updating the provided non-key columns of rows whose
    /// `conflict_keys` already exist. One call is one transaction.
    fn upsert(&self, table: &str, rows: &[Row], conflict_keys: &[&str])
    -> StoreResult<QueryResult>;

    /// Sets the columns of `row` on every row matching all `filters`.
    fn update(&self, table: &str, row: Row, filters: &[Filter]) -> StoreResult<QueryResult>;

    /// Removes every row matching all `filters`.
    fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<QueryResult>;
}

/// Builds a [`Row`] from `(column, value)` pairs.
pub fn row<I, K, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

pub(crate) fn require_filters(op: &'static str, table: &str, filters: &[Filter]) -> StoreResult<()> {
    if filters.is_empty() {
        return Err(StoreError::MissingFilter {
            op,
            table: table.to_string(),
        });
    }
    Ok(())
}
