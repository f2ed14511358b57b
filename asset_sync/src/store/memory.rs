//! In-process [`TableStore`].
//!
//! Follows the SQLite store's observable behavior: declared identifiers
//! only, rows returned with every declared column (missing ones as
//! `null`), primary keys enforced on insert, upsert merging only the
//! supplied columns.

use std::{cmp::Ordering, sync::RwLock};

use indexmap::IndexMap;
use serde_json::Value;

use crate::store::{
    Filter, Query, QueryResult, Row, StoreError, StoreResult, TableStore,
    query::compare_values,
    require_filters,
    tables::{TableDef, table_def},
};

/// Tables held in memory, keyed by table name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<IndexMap<String, Vec<Row>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|t| t.get(table).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn read<T>(&self, f: impl FnOnce(&IndexMap<String, Vec<Row>>) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self
            .tables
            .read()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".into()))?;
        f(&guard)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut IndexMap<String, Vec<Row>>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self
            .tables
            .write()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".into()))?;
        f(&mut guard)
    }
}

fn check_columns(def: &TableDef, row: &Row) -> StoreResult<()> {
    if row.is_empty() {
        return Err(StoreError::EmptyRow {
            table: def.name.to_string(),
        });
    }
    for (column, value) in row {
        def.column(column)?;
        if value.is_array() || value.is_object() {
            return Err(StoreError::UnsupportedValue {
                column: column.clone(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn check_filters(def: &TableDef, filters: &[Filter]) -> StoreResult<()> {
    filters.iter().try_for_each(|f| def.column(&f.column).map(|_| ()))
}

fn full_row(def: &TableDef, row: &Row) -> Row {
    def.columns
        .iter()
        .map(|c| {
            (
                c.name.to_string(),
                row.get(c.name).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

fn same_key(a: &Row, b: &Row, keys: &[&str]) -> bool {
    keys.iter().all(|k| match (a.get(*k), b.get(*k)) {
        (Some(x), Some(y)) => compare_values(x, y) == Some(Ordering::Equal),
        _ => false,
    })
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row.get(&f.column)))
}

fn order_rows(rows: &mut [Row], query: &Query) {
    rows.sort_by(|a, b| {
        for key in query.order() {
            let x = a.get(&key.column).unwrap_or(&Value::Null);
            let y = b.get(&key.column).unwrap_or(&Value::Null);
            // NULLs sort first, as in SQLite.
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_values(x, y).unwrap_or(Ordering::Equal),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

impl TableStore for MemoryStore {
    fn select(&self, query: &Query) -> StoreResult<QueryResult> {
        let def = table_def(query.table())?;
        let projection = def.projection(query.columns())?;
        check_filters(def, query.filters())?;
        for key in query.order() {
            def.column(&key.column)?;
        }

        self.read(|tables| {
            let mut rows: Vec<Row> = tables
                .get(def.name)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| matches_all(r, query.filters()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            order_rows(&mut rows, query);

            let data = rows
                .into_iter()
                .skip(query.offset().unwrap_or(0))
                .take(query.limit().unwrap_or(usize::MAX))
                .map(|r| {
                    projection
                        .iter()
                        .map(|c| {
                            (
                                c.name.to_string(),
                                r.get(c.name).cloned().unwrap_or(Value::Null),
                            )
                        })
                        .collect()
                })
                .collect();
            Ok(QueryResult { data })
        })
    }

    fn insert(&self, table: &str, row: Row) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        check_columns(def, &row)?;
        let stored = full_row(def, &row);

        self.write(|tables| {
            let rows = tables.entry(def.name.to_string()).or_default();
            if rows.iter().any(|r| same_key(r, &stored, def.primary_key)) {
                return Err(StoreError::Duplicate {
                    table: def.name.to_string(),
                });
            }
            rows.push(stored.clone());
            Ok(QueryResult { data: vec![stored] })
        })
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict_keys: &[&str],
    ) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        for key in conflict_keys {
            def.column(key)?;
        }
        for row in rows {
            check_columns(def, row)?;
            if let Some(key) = conflict_keys.iter().find(|k| !row.contains_key(**k)) {
                return Err(StoreError::MissingConflictKey {
                    table: def.name.to_string(),
                    key: key.to_string(),
                });
            }
        }

        self.write(|tables| {
            let stored = tables.entry(def.name.to_string()).or_default();
            let mut data = Vec::with_capacity(rows.len());
            for row in rows {
                match stored.iter_mut().find(|r| same_key(r, row, conflict_keys)) {
                    Some(existing) => {
                        for (column, value) in row {
                            existing.insert(column.clone(), value.clone());
                        }
                        data.push(existing.clone());
                    }
                    None => {
                        let fresh = full_row(def, row);
                        stored.push(fresh.clone());
                        data.push(fresh);
                    }
                }
            }
            Ok(QueryResult { data })
        })
    }

    fn update(&self, table: &str, row: Row, filters: &[Filter]) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        require_filters("update", table, filters)?;
        check_columns(def, &row)?;
        check_filters(def, filters)?;

        self.write(|tables| {
            let mut data = Vec::new();
            if let Some(stored) = tables.get_mut(def.name) {
                for existing in stored.iter_mut().filter(|r| matches_all(r, filters)) {
                    for (column, value) in &row {
                        existing.insert(column.clone(), value.clone());
                    }
                    data.push(existing.clone());
                }
            }
            Ok(QueryResult { data })
        })
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        require_filters("delete", table, filters)?;
        check_filters(def, filters)?;

        self.write(|tables| {
            let Some(stored) = tables.get_mut(def.name) else {
                return Ok(QueryResult::default());
            };
            let (removed, kept): (Vec<Row>, Vec<Row>) =
                stored.drain(..).partition(|r| matches_all(r, filters));
            *stored = kept;
            Ok(QueryResult { data: removed })
        })
    }
}
