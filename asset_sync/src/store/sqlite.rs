//! [`TableStore`] over a single Diesel SQLite connection.
//!
//! Statements are assembled from declared identifiers ([`tables`]) and bound
//! values. Rows come back through SQLite's `json_object`, one JSON text
//! column per row, which keeps decoding independent of the table shape.

use std::sync::{Mutex, MutexGuard};

use diesel::{
    Connection, QueryableByName, RunQueryDsl, SqliteConnection,
    query_builder::{BoxedSqlQuery, SqlQuery},
    result::{DatabaseErrorKind, Error as DieselError},
    sql_query,
    sql_types::{BigInt, Double, Nullable, Text},
    sqlite::Sqlite,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    db::{connection::connect_sqlite, migrate::run_pending},
    store::{
        Filter, Query, QueryResult, Row, StoreError, StoreResult, TableStore, require_filters,
        tables::{ColumnDef, ColumnType, TableDef, table_def},
    },
};

type Boxed<'a> = BoxedSqlQuery<'a, Sqlite, SqlQuery>;

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Text)]
    row: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Null(ColumnType),
    Text(String),
    Real(f64),
    Integer(i64),
}

/// SQLite-backed store. Access is serialized through one connection.
pub struct SqliteStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub fn open(database_url: &str) -> StoreResult<Self> {
        let mut conn =
            connect_sqlite(database_url).map_err(|e| StoreError::Connection(format!("{e:#}")))?;
        let applied = run_pending(&mut conn).map_err(|e| StoreError::Migration(format!("{e:#}")))?;
        if applied > 0 {
            debug!(applied, "applied pending migrations");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Round-trips a trivial statement.
    pub fn ping(&self) -> StoreResult<()> {
        let mut conn = self.lock()?;
        sql_query("SELECT 1").execute(&mut *conn)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connection("sqlite connection lock poisoned".into()))
    }
}

fn to_bind(column: &ColumnDef, value: &Value) -> StoreResult<Bind> {
    let unsupported = || StoreError::UnsupportedValue {
        column: column.name.to_string(),
        value: value.to_string(),
    };
    Ok(match (column.ty, value) {
        (ty, Value::Null) => Bind::Null(ty),
        (_, Value::Array(_) | Value::Object(_)) => return Err(unsupported()),
        (ColumnType::Text, Value::String(s)) => Bind::Text(s.clone()),
        (ColumnType::Text, other) => Bind::Text(other.to_string()),
        (ColumnType::Real, Value::Number(n)) => Bind::Real(n.as_f64().ok_or_else(unsupported)?),
        (ColumnType::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => Bind::Integer(i),
            None => return Err(unsupported()),
        },
        (ColumnType::Integer, Value::Bool(b)) => Bind::Integer(i64::from(*b)),
        _ => return Err(unsupported()),
    })
}

fn bind_all(mut query: Boxed<'static>, binds: Vec<Bind>) -> Boxed<'static> {
    for b in binds {
        query = match b {
            Bind::Text(s) => query.bind::<Text, _>(s),
            Bind::Real(f) => query.bind::<Double, _>(f),
            Bind::Integer(i) => query.bind::<BigInt, _>(i),
            Bind::Null(ColumnType::Text) => query.bind::<Nullable<Text>, _>(None::<String>),
            Bind::Null(ColumnType::Real) => query.bind::<Nullable<Double>, _>(None::<f64>),
            Bind::Null(ColumnType::Integer) => query.bind::<Nullable<BigInt>, _>(None::<i64>),
        };
    }
    query
}

fn json_projection(columns: &[&ColumnDef]) -> String {
    let pairs: Vec<String> = columns
        .iter()
        .map(|c| format!("'{0}', \"{0}\"", c.name))
        .collect();
    format!("json_object({}) AS row", pairs.join(", "))
}

fn where_clause(def: &TableDef, filters: &[Filter], binds: &mut Vec<Bind>) -> StoreResult<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(filters.len());
    for f in filters {
        let column = def.column(&f.column)?;
        parts.push(format!("\"{}\" {} ?", column.name, f.op.sql()));
        binds.push(to_bind(column, &f.value)?);
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn row_columns(def: &TableDef, row: &Row) -> StoreResult<Vec<(&'static ColumnDef, Bind)>> {
    if row.is_empty() {
        return Err(StoreError::EmptyRow {
            table: def.name.to_string(),
        });
    }
    row.iter()
        .map(|(name, value)| {
            let column = def.column(name)?;
            Ok((column, to_bind(column, value)?))
        })
        .collect()
}

fn all_columns(def: &TableDef) -> Vec<&'static ColumnDef> {
    def.columns.iter().collect()
}

fn select_sql(query: &Query) -> StoreResult<(String, Vec<Bind>)> {
    let def = table_def(query.table())?;
    let projection = def.projection(query.columns())?;
    let mut binds = Vec::new();
    let mut sql = format!("SELECT {} FROM \"{}\"", json_projection(&projection), def.name);
    sql.push_str(&where_clause(def, query.filters(), &mut binds)?);

    if !query.order().is_empty() {
        let keys = query
            .order()
            .iter()
            .map(|o| {
                def.column(&o.column).map(|c| {
                    format!("\"{}\" {}", c.name, if o.descending { "DESC" } else { "ASC" })
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
    }
    match (query.limit(), query.offset()) {
        (Some(l), Some(o)) => sql.push_str(&format!(" LIMIT {l} OFFSET {o}")),
        (Some(l), None) => sql.push_str(&format!(" LIMIT {l}")),
        (None, Some(o)) => sql.push_str(&format!(" LIMIT -1 OFFSET {o}")),
        (None, None) => {}
    }
    Ok((sql, binds))
}

fn upsert_sql(
    def: &TableDef,
    row: &Row,
    conflict_keys: &[&str],
) -> StoreResult<(String, Vec<Bind>)> {
    let columns = row_columns(def, row)?;
    let names: Vec<&str> = columns.iter().map(|(c, _)| c.name).collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    let updates: Vec<String> = names
        .iter()
        .filter(|n| !conflict_keys.contains(*n))
        .map(|n| format!("\"{n}\" = excluded.\"{n}\""))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT ({}) {} RETURNING {}",
        def.name,
        quoted(&names),
        placeholders,
        quoted(conflict_keys),
        action,
        json_projection(&all_columns(def)),
    );
    Ok((sql, columns.into_iter().map(|(_, b)| b).collect()))
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("\"{n}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn load_rows(conn: &mut SqliteConnection, sql: String, binds: Vec<Bind>) -> StoreResult<Vec<Row>> {
    let query: Boxed<'static> = sql_query(sql).into_boxed();
    let raw = bind_all(query, binds).load::<JsonRow>(conn)?;
    raw.into_iter()
        .map(|r| serde_json::from_str::<Row>(&r.row).map_err(StoreError::from))
        .collect()
}

impl TableStore for SqliteStore {
    fn select(&self, query: &Query) -> StoreResult<QueryResult> {
        let (sql, binds) = select_sql(query)?;
        let mut conn = self.lock()?;
        Ok(QueryResult {
            data: load_rows(&mut conn, sql, binds)?,
        })
    }

    fn insert(&self, table: &str, row: Row) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        let columns = row_columns(def, &row)?;
        let names: Vec<&str> = columns.iter().map(|(c, _)| c.name).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING {}",
            def.name,
            quoted(&names),
            vec!["?"; names.len()].join(", "),
            json_projection(&all_columns(def)),
        );
        let binds = columns.into_iter().map(|(_, b)| b).collect();
        let mut conn = self.lock()?;
        let data = load_rows(&mut conn, sql, binds).map_err(|e| match e {
            StoreError::Database(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            )) => StoreError::Duplicate {
                table: def.name.to_string(),
            },
            other => other,
        })?;
        Ok(QueryResult { data })
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
        let mut statements = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(key) = conflict_keys.iter().find(|k| !row.contains_key(**k)) {
                return Err(StoreError::MissingConflictKey {
                    table: def.name.to_string(),
                    key: key.to_string(),
                });
            }
            statements.push(upsert_sql(def, row, conflict_keys)?);
        }

        let mut conn = self.lock()?;
        let data = conn.immediate_transaction::<_, StoreError, _>(|conn| {
            let mut data = Vec::with_capacity(statements.len());
            for (sql, binds) in statements {
                data.extend(load_rows(conn, sql, binds)?);
            }
            Ok(data)
        })?;
        Ok(QueryResult { data })
    }

    fn update(&self, table: &str, row: Row, filters: &[Filter]) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        require_filters("update", table, filters)?;
        let columns = row_columns(def, &row)?;
        let sets: Vec<String> = columns
            .iter()
            .map(|(c, _)| format!("\"{}\" = ?", c.name))
            .collect();
        let mut binds: Vec<Bind> = columns.into_iter().map(|(_, b)| b).collect();
        let filter_sql = where_clause(def, filters, &mut binds)?;
        let sql = format!(
            "UPDATE \"{}\" SET {}{} RETURNING {}",
            def.name,
            sets.join(", "),
            filter_sql,
            json_projection(&all_columns(def)),
        );
        let mut conn = self.lock()?;
        Ok(QueryResult {
            data: load_rows(&mut conn, sql, binds)?,
        })
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<QueryResult> {
        let def = table_def(table)?;
        require_filters("delete", table, filters)?;
        let mut binds = Vec::new();
        let filter_sql = where_clause(def, filters, &mut binds)?;
        let sql = format!(
            "DELETE FROM \"{}\"{} RETURNING {}",
            def.name,
            filter_sql,
            json_projection(&all_columns(def)),
        );
        let mut conn = self.lock()?;
        Ok(QueryResult {
            data: load_rows(&mut conn, sql, binds)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tables;

    #[test]
    fn select_sql_binds_values_and_inlines_paging() {
        let q = Query::select(tables::OBSERVATIONS)
            .columns(&["date", "close"])
            .eq("ticker", "CDI")
            .gte("date", "2024-01-01")
            .order_desc("date")
            .offset(10)
            .build();
        let (sql, binds) = select_sql(&q).unwrap();
        assert_eq!(
            sql,
            "SELECT json_object('date', \"date\", 'close', \"close\") AS row FROM \"observations\" \
             WHERE \"ticker\" = ? AND \"date\" >= ? ORDER BY \"date\" DESC LIMIT -1 OFFSET 10"
        );
        assert_eq!(
            binds,
            vec![Bind::Text("CDI".into()), Bind::Text("2024-01-01".into())]
        );
    }

    #[test]
    fn upsert_sql_updates_only_non_key_columns() {
        let def = table_def(tables::SYMBOLS).unwrap();
        let row = crate::store::row([
            ("ticker", Value::from("CDI")),
            ("current_price", Value::from(101.5)),
        ]);
        let (sql, binds) = upsert_sql(def, &row, &["ticker"]).unwrap();
        assert!(sql.starts_with(
            "INSERT INTO \"symbols\" (\"ticker\", \"current_price\") VALUES (?, ?) \
             ON CONFLICT (\"ticker\") DO UPDATE SET \"current_price\" = excluded.\"current_price\""
        ));
        assert_eq!(binds[1], Bind::Real(101.5));
    }

    #[test]
    fn real_columns_refuse_text() {
        let def = table_def(tables::OBSERVATIONS).unwrap();
        let close = def.column("close").unwrap();
        assert!(to_bind(close, &Value::from("12,5")).is_err());
        assert_eq!(to_bind(close, &Value::Null).unwrap(), Bind::Null(ColumnType::Real));
    }
}
