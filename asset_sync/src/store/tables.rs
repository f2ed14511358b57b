//! Declared tables and their columns.
//!
//! Stores only accept identifiers listed here, so table and column names
//! can be spliced into SQL while values are always bound.

use crate::store::{StoreError, StoreResult};

/// Symbol metadata table.
pub const SYMBOLS: &str = "symbols";
/// Daily observation table.
pub const OBSERVATIONS: &str = "observations";

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 text (also dates and timestamps).
    Text,
    /// 64-bit float.
    Real,
    /// 64-bit integer.
    Integer,
}

/// One declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage class.
    pub ty: ColumnType,
}

/// One declared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnDef],
    /// Primary key columns.
    pub primary_key: &'static [&'static str],
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef { name, ty }
}

static SYMBOLS_DEF: TableDef = TableDef {
    name: SYMBOLS,
    columns: &[
        col("ticker", ColumnType::Text),
        col("name", ColumnType::Text),
        col("current_price", ColumnType::Real),
        col("updated_at", ColumnType::Text),
    ],
    primary_key: &["ticker"],
};

static OBSERVATIONS_DEF: TableDef = TableDef {
    name: OBSERVATIONS,
    columns: &[
        col("ticker", ColumnType::Text),
        col("date", ColumnType::Text),
        col("open", ColumnType::Real),
        col("high", ColumnType::Real),
        col("low", ColumnType::Real),
        col("close", ColumnType::Real),
        col("volume", ColumnType::Real),
        col("daily_return", ColumnType::Real),
        col("ma20", ColumnType::Real),
        col("upper_band", ColumnType::Real),
        col("lower_band", ColumnType::Real),
        col("peak", ColumnType::Real),
        col("drawdown", ColumnType::Real),
    ],
    primary_key: &["ticker", "date"],
};

/// Looks up a declared table.
pub fn table_def(name: &str) -> StoreResult<&'static TableDef> {
    match name {
        SYMBOLS => Ok(&SYMBOLS_DEF),
        OBSERVATIONS => Ok(&OBSERVATIONS_DEF),
        other => Err(StoreError::UnknownTable(other.to_string())),
    }
}

impl TableDef {
    /// Looks up a declared column.
    pub fn column(&self, name: &str) -> StoreResult<&'static ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.to_string(),
                column: name.to_string(),
            })
    }

    /// Resolves a projection; an empty list means every column.
    pub fn projection(&self, names: &[String]) -> StoreResult<Vec<&'static ColumnDef>> {
        if names.is_empty() {
            return Ok(self.columns.iter().collect());
        }
        names.iter().map(|n| self.column(n)).collect()
    }
}
