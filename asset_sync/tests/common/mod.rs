#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use asset_sync::{
    clock::FixedClock,
    config::PipelineConfig,
    db::{connection, migrate},
    orchestrator::{Sources, SyncOrchestrator},
    store::{TableStore, sqlite::SqliteStore},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use indexmap::IndexMap;
use market_data_ingestor::{
    models::{
        bar::Bar, bar_series::BarSeries, quote::Quote, rate::RatePoint,
        request_params::BarsRequestParams,
    },
    providers::{ApiSnafu, DataProvider, ProviderError, QuoteProvider, RateProvider},
};
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

#[derive(QueryableByName)]
struct ColumnInfo {
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text, column_name = "type")]
    ty: String,
    #[diesel(sql_type = Integer)]
    pk: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

fn temp_db() -> TestDb {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();
    TestDb { _dir: dir, path }
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let db = temp_db();
    migrate::run_sqlite(&db.path).expect("migrations");
    let conn = connection::connect_sqlite(&db.path).expect("connect");
    (db, conn)
}

pub fn setup_store() -> (TestDb, Arc<SqliteStore>) {
    let db = temp_db();
    let store = SqliteStore::open(&db.path).expect("open store");
    (db, Arc::new(store))
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

/// `(name, type, primary key position)` of every column of a migrated table.
pub fn migrated_columns(conn: &mut SqliteConnection, table: &str) -> Vec<(String, String, i32)> {
    diesel::sql_query(format!("PRAGMA table_info({table});"))
        .load::<ColumnInfo>(conn)
        .unwrap()
        .into_iter()
        .map(|c| (c.name, c.ty.to_uppercase(), c.pk))
        .collect()
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Noon UTC, which is morning in São Paulo, so the local date matches.
pub fn noon(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
}

/// Daily bars from `start`, one per calendar day.
pub fn daily_bars(start: NaiveDate, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar::flat(start + chrono::Duration::days(i as i64), *c))
        .collect()
}

/// Serves canned bars per ticker, filtered to the requested range.
#[derive(Default)]
pub struct FakeBars {
    pub bars: Mutex<IndexMap<String, Vec<Bar>>>,
    pub failing: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<BarsRequestParams>>,
}

impl FakeBars {
    pub fn with(self, ticker: &str, bars: Vec<Bar>) -> Self {
        self.bars.lock().unwrap().insert(ticker.to_string(), bars);
        self
    }

    pub fn fail(self, ticker: &str) -> Self {
        self.failing.lock().unwrap().push(ticker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for FakeBars {
    async fn fetch_bars(&self, params: BarsRequestParams) -> Result<BarSeries, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(params.clone());
        if self.failing.lock().unwrap().contains(&params.symbol) {
            return ApiSnafu {
                message: format!("no route to {}", params.symbol),
            }
            .fail();
        }
        let bars = self
            .bars
            .lock()
            .unwrap()
            .get(&params.symbol)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|b| b.date >= params.start && b.date <= params.end)
            .collect();
        Ok(BarSeries::new(params.symbol, bars))
    }
}

/// Serves fixed quote strings per source code.
#[derive(Default)]
pub struct FakeQuotes {
    pub values: Mutex<IndexMap<String, String>>,
}

impl FakeQuotes {
    pub fn with(self, code: &str, value: &str) -> Self {
        self.values
            .lock()
            .unwrap()
            .insert(code.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl QuoteProvider for FakeQuotes {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        match self.values.lock().unwrap().get(symbol) {
            Some(v) => Ok(Quote {
                symbol: symbol.to_string(),
                value: v.clone(),
            }),
            None => ApiSnafu {
                message: format!("unknown code {symbol}"),
            }
            .fail(),
        }
    }
}

/// Serves a fixed list of daily rates, filtered to the requested range.
#[derive(Default)]
pub struct FakeRates {
    pub points: Mutex<Vec<RatePoint>>,
}

impl FakeRates {
    pub fn daily(start: NaiveDate, days: i64, rate_pct: f64) -> Self {
        let points = (0..days)
            .map(|i| RatePoint {
                date: start + chrono::Duration::days(i),
                rate_pct,
            })
            .collect();
        Self {
            points: Mutex::new(points),
        }
    }
}

#[async_trait]
impl RateProvider for FakeRates {
    async fn fetch_rates(
        &self,
        _series: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, ProviderError> {
        Ok(self
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.date >= start && p.date <= end)
            .copied()
            .collect())
    }
}

pub struct Harness {
    pub store: Arc<dyn TableStore>,
    pub bars: Arc<FakeBars>,
    pub quotes: Arc<FakeQuotes>,
    pub rates: Arc<FakeRates>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: SyncOrchestrator,
}

pub fn harness(
    store: Arc<dyn TableStore>,
    bars: FakeBars,
    quotes: FakeQuotes,
    rates: FakeRates,
    today: NaiveDate,
    config: PipelineConfig,
) -> Harness {
    let bars = Arc::new(bars);
    let quotes = Arc::new(quotes);
    let rates = Arc::new(rates);
    let clock = Arc::new(FixedClock::new(noon(today)));
    let sources = Sources {
        bars: bars.clone(),
        quotes: quotes.clone(),
        rates: rates.clone(),
    };
    let orchestrator =
        SyncOrchestrator::new(store.clone(), sources, clock.clone(), config).expect("orchestrator");
    Harness {
        store,
        bars,
        quotes,
        rates,
        clock,
        orchestrator,
    }
}
