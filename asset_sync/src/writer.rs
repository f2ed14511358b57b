//! Batched, idempotent writes of observations and symbol metadata.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    models::{ObservationRow, SymbolRecord},
    store::{Filter, StoreError, StoreResult, TableStore, row, tables},
    tz::to_rfc3339_millis,
};

/// Rows per upsert call.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Natural key of an observation.
pub const OBSERVATION_KEYS: [&str; 2] = ["ticker", "date"];
/// Natural key of a symbol.
pub const SYMBOL_KEYS: [&str; 1] = ["ticker"];

/// A batch failed. Earlier batches stay committed; rerunning the write is
/// safe because every batch is an upsert.
#[derive(Debug, Error)]
#[error("batch {batch} of {total_batches} failed after {committed_rows} rows were committed: {source}")]
pub struct WriteError {
    /// 1-based index of the failed batch.
    pub batch: usize,
    /// Number of batches in the write.
    pub total_batches: usize,
    /// Rows committed by the preceding batches.
    pub committed_rows: usize,
    /// Store failure.
    #[source]
    pub source: StoreError,
}

/// Outcome of a successful batched write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Rows written.
    pub rows: usize,
    /// Upsert calls made.
    pub batches: usize,
}

/// Writes rows through a [`TableStore`] in fixed-size upsert batches.
pub struct UpsertWriter<'a> {
    store: &'a dyn TableStore,
    batch_size: usize,
}

impl<'a> UpsertWriter<'a> {
    /// Writer with `batch_size` rows per call (at least one).
    pub fn new(store: &'a dyn TableStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Upserts `rows` keyed by `(ticker, date)`.
    pub fn write_observations(&self, rows: &[ObservationRow]) -> Result<WriteStats, WriteError> {
        let total_batches = rows.len().div_ceil(self.batch_size);
        let mut stats = WriteStats::default();

        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch: Vec<_> = chunk.iter().map(ObservationRow::to_row).collect();
            if let Err(source) = self
                .store
                .upsert(tables::OBSERVATIONS, &batch, &OBSERVATION_KEYS)
            {
                warn!(batch = i + 1, total_batches, committed = stats.rows, error = %source, "observation batch failed");
                return Err(WriteError {
                    batch: i + 1,
                    total_batches,
                    committed_rows: stats.rows,
                    source,
                });
            }
            stats.rows += chunk.len();
            stats.batches += 1;
        }

        debug!(rows = stats.rows, batches = stats.batches, "observations written");
        Ok(stats)
    }

    /// Creates or refreshes the metadata row of a symbol.
    pub fn upsert_symbol(&self, symbol: &SymbolRecord) -> StoreResult<()> {
        self.store
            .upsert(tables::SYMBOLS, &[symbol.to_row()], &SYMBOL_KEYS)?;
        Ok(())
    }

    /// Sets only the price fields of an existing symbol.
    ///
    /// Returns `false` when no symbol row exists for `ticker`.
    pub fn update_price(&self, ticker: &str, price: f64, at: DateTime<Utc>) -> StoreResult<bool> {
        let changes = row([
            ("current_price", Value::from(price)),
            ("updated_at", Value::from(to_rfc3339_millis(at))),
        ]);
        let res = self
            .store
            .update(tables::SYMBOLS, changes, &[Filter::eq("ticker", ticker)])?;
        Ok(!res.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone};

    use super::*;
    use crate::store::{Query, memory::MemoryStore};

    fn rows(n: usize) -> Vec<ObservationRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| ObservationRow::new("BOVA11.SA", start + Duration::days(i as i64), 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn writes_in_batches() {
        let store = MemoryStore::new();
        let stats = UpsertWriter::new(&store, 100)
            .write_observations(&rows(250))
            .unwrap();
        assert_eq!(stats, WriteStats { rows: 250, batches: 3 });
        assert_eq!(store.len(tables::OBSERVATIONS), 250);
    }

    #[test]
    fn rewriting_is_idempotent() {
        let store = MemoryStore::new();
        let writer = UpsertWriter::new(&store, 7);
        writer.write_observations(&rows(30)).unwrap();
        writer.write_observations(&rows(30)).unwrap();
        assert_eq!(store.len(tables::OBSERVATIONS), 30);
    }

    #[test]
    fn price_update_leaves_name_alone() {
        let store = MemoryStore::new();
        let writer = UpsertWriter::new(&store, DEFAULT_BATCH_SIZE);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();

        assert!(!writer.update_price("BOVA11.SA", 120.0, at).unwrap());

        writer
            .upsert_symbol(&SymbolRecord {
                ticker: "BOVA11.SA".into(),
                name: "BOVA11".into(),
                current_price: Some(110.0),
                updated_at: None,
            })
            .unwrap();
        assert!(writer.update_price("BOVA11.SA", 120.0, at).unwrap());

        let q = Query::select(tables::SYMBOLS).eq("ticker", "BOVA11.SA").build();
        let stored = SymbolRecord::from_row(store.select(&q).unwrap().first().unwrap()).unwrap();
        assert_eq!(stored.name, "BOVA11");
        assert_eq!(stored.current_price, Some(120.0));
        assert_eq!(stored.updated_at.as_deref(), Some("2024-03-01T15:00:00.000Z"));
    }
}
