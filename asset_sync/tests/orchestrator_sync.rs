mod common;

use std::sync::{Arc, atomic::Ordering};

use asset_sync::{
    clock::Clock,
    config::{PipelineConfig, SymbolCfg},
    fetcher::{IncrementalFetcher, stored_tail},
    health::{HealthStatus, check_staleness},
    indicators,
    models::{ObservationRow, SymbolRecord},
    orchestrator::SymbolOutcome,
    store::{Query, TableStore, memory::MemoryStore, tables},
    summary::history,
};
use chrono::Duration;
use common::{FakeBars, FakeQuotes, FakeRates, d, daily_bars, harness, noon};

fn config(symbols: &[&str]) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.symbols = symbols
        .iter()
        .map(|t| SymbolCfg {
            ticker: t.to_string(),
            name: format!("{t} name"),
        })
        .collect();
    cfg
}

fn stored(store: &dyn TableStore, ticker: &str) -> Vec<ObservationRow> {
    history(store, ticker, d(2000, 1, 1), d(2100, 1, 1)).unwrap()
}

fn symbol(store: &dyn TableStore, ticker: &str) -> Option<SymbolRecord> {
    let q = Query::select(tables::SYMBOLS).eq("ticker", ticker).build();
    store
        .select(&q)
        .unwrap()
        .first()
        .map(|r| SymbolRecord::from_row(r).unwrap())
}

#[tokio::test]
async fn first_sync_writes_history_and_symbol_row() {
    let (_db, store) = common::setup_store();
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
    let h = harness(
        store,
        FakeBars::default().with("BOVA11.SA", daily_bars(d(2024, 1, 1), &closes)),
        FakeQuotes::default(),
        FakeRates::default(),
        d(2024, 2, 5),
        config(&["BOVA11.SA"]),
    );

    let report = h.orchestrator.sync(&h.orchestrator.config().symbols.clone()).await;
    assert_eq!((report.attempted, report.updated, report.errored), (1, 1, 0));
    assert_eq!(report.rows_written, 30);

    let rows = stored(&*h.store, "BOVA11.SA");
    assert_eq!(rows.len(), 30);
    assert_eq!(rows[0].daily_return, None);
    assert_eq!(rows[18].ma20, None);
    assert_eq!(rows[19].ma20, Some(109.5));
    assert!(rows.iter().all(|r| r.drawdown == Some(0.0)));

    let sym = symbol(&*h.store, "BOVA11.SA").unwrap();
    assert_eq!(sym.name, "BOVA11.SA name");
    assert_eq!(sym.current_price, Some(129.0));
    assert_eq!(sym.updated_at.as_deref(), Some("2024-02-05T12:00:00.000Z"));

    let requests = h.bars.requests.lock().unwrap();
    assert_eq!(requests[0].start, d(2024, 2, 5) - Duration::days(5 * 365));
    assert_eq!(requests[0].end, d(2024, 2, 5));
}

#[tokio::test]
async fn incremental_sync_matches_a_full_recomputation() {
    let (_db, store) = common::setup_store();
    let closes: Vec<f64> = (0..40)
        .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
        .collect();
    let h = harness(
        store,
        FakeBars::default().with("XFIX11.SA", daily_bars(d(2024, 1, 1), &closes)),
        FakeQuotes::default(),
        FakeRates::default(),
        d(2024, 1, 30),
        config(&["XFIX11.SA"]),
    );

    let symbols = h.orchestrator.config().symbols.clone();
    let first = h.orchestrator.sync(&symbols).await;
    assert_eq!(first.rows_written, 30);

    h.clock.set(noon(d(2024, 2, 9)));
    let second = h.orchestrator.sync(&symbols).await;
    assert_eq!(second.rows_written, 10);
    let last = h.bars.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!((last.start, last.end), (d(2024, 1, 31), d(2024, 2, 9)));

    let rows = stored(&*h.store, "XFIX11.SA");
    let expected = indicators::compute(&closes);
    assert_eq!(rows.len(), expected.len());
    for (row, want) in rows.iter().zip(&expected) {
        let close_enough = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            (None, None) => true,
            _ => false,
        };
        assert!(close_enough(row.ma20, want.ma20), "{}", row.date);
        assert!(close_enough(row.upper_band, want.upper_band), "{}", row.date);
        assert!(close_enough(row.daily_return, want.daily_return), "{}", row.date);
        assert!(close_enough(row.peak, Some(want.peak)), "{}", row.date);
        assert!(close_enough(row.drawdown, Some(want.drawdown)), "{}", row.date);
    }
}

#[tokio::test]
async fn up_to_date_symbols_make_no_request() {
    let store = Arc::new(MemoryStore::new());
    let today = d(2024, 3, 10);
    let h = harness(
        store,
        FakeBars::default().with("BOVA11.SA", daily_bars(d(2024, 3, 1), &[1.0; 10])),
        FakeQuotes::default(),
        FakeRates::default(),
        today,
        config(&["BOVA11.SA"]),
    );
    let symbols = h.orchestrator.config().symbols.clone();
    h.orchestrator.sync(&symbols).await;
    assert_eq!(h.bars.calls(), 1);

    let report = h.orchestrator.sync(&symbols).await;
    assert_eq!((report.up_to_date, report.rows_written), (1, 0));
    assert_eq!(h.bars.calls(), 1);

    let fetcher = IncrementalFetcher::new(&*h.store, &*h.bars, 5);
    assert!(
        fetcher
            .fetch_delta("BOVA11.SA", Some(today), today)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(h.bars.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_failing_symbol_does_not_stop_the_others() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(
        store,
        FakeBars::default()
            .with("BOVA11.SA", daily_bars(d(2024, 1, 1), &[10.0, 11.0, 12.0]))
            .with("FIXA11.SA", daily_bars(d(2024, 1, 1), &[20.0, 21.0]))
            .fail("XFIX11.SA"),
        FakeQuotes::default(),
        FakeRates::default(),
        d(2024, 1, 10),
        config(&["BOVA11.SA", "XFIX11.SA", "FIXA11.SA"]),
    );

    let symbols = h.orchestrator.config().symbols.clone();
    let report = h.orchestrator.sync(&symbols).await;
    assert_eq!(report.attempted, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.errored, 1);
    assert_eq!(report.failures[0].ticker, "XFIX11.SA");
    assert!(!report.all_failed());
    assert_eq!(stored(&*h.store, "FIXA11.SA").len(), 2);
}

#[tokio::test]
async fn index_series_continues_from_the_last_stored_value() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(
        store,
        FakeBars::default(),
        FakeQuotes::default(),
        FakeRates::daily(d(2024, 3, 1), 30, 0.04),
        d(2024, 3, 10),
        config(&[]),
    );

    assert!(matches!(
        h.orchestrator.sync_index().await.unwrap(),
        SymbolOutcome::Updated { rows: 10, .. }
    ));
    let first = stored(&*h.store, "CDI");
    assert_eq!(first[0].close, 100.0);
    assert_eq!(first[0].daily_return, Some(0.04));
    let anchor = first.last().unwrap().close;

    h.clock.set(noon(d(2024, 3, 15)));
    h.orchestrator.sync_index().await.unwrap();
    let all = stored(&*h.store, "CDI");
    assert_eq!(all.len(), 15);
    let resumed = &all[10];
    assert_eq!(resumed.date, d(2024, 3, 11));
    assert!((resumed.close - anchor * 1.0004).abs() < 1e-9);
    assert!(resumed.close > 100.0);

    let tail = stored_tail(&*h.store, "CDI").unwrap();
    assert_eq!(tail.last_date, Some(d(2024, 3, 15)));
    assert_eq!(symbol(&*h.store, "CDI").unwrap().current_price, tail.last_close());
}

#[tokio::test]
async fn sync_all_includes_the_index_series() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(
        store,
        FakeBars::default().with("BOVA11.SA", daily_bars(d(2024, 3, 1), &[10.0, 11.0, 12.0])),
        FakeQuotes::default(),
        FakeRates::daily(d(2024, 3, 1), 5, 0.05),
        d(2024, 3, 10),
        config(&["BOVA11.SA"]),
    );
    let report = h.orchestrator.sync_all().await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.rows_written, 8);
}

#[tokio::test]
async fn quote_refresh_scales_and_only_touches_price_fields() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(
        store,
        FakeBars::default()
            .with("USDBRL=X", daily_bars(d(2024, 3, 1), &[5.0, 5.1]))
            .with("BOVA11.SA", daily_bars(d(2024, 3, 1), &[120.0, 121.0])),
        FakeQuotes::default()
            .with("WDOFUT", "5.123,50")
            .with("BOVA11", "oops"),
        FakeRates::default(),
        d(2024, 3, 10),
        config(&["USDBRL=X", "BOVA11.SA"]),
    );
    let symbols = h.orchestrator.config().symbols.clone();
    h.orchestrator.sync(&symbols).await;

    h.clock.set(noon(d(2024, 3, 10)) + Duration::minutes(30));
    assert!(h.orchestrator.refresh_quote("USDBRL=X").await);
    let usd = symbol(&*h.store, "USDBRL=X").unwrap();
    assert!((usd.current_price.unwrap() - 5.1235).abs() < 1e-9);
    assert_eq!(usd.name, "USDBRL=X name");
    assert_eq!(usd.updated_at.as_deref(), Some("2024-03-10T12:30:00.000Z"));

    assert!(!h.orchestrator.refresh_quote("BOVA11.SA").await);
    assert!(!h.orchestrator.refresh_quote("UNKNOWN").await);

    let report = h.orchestrator.refresh_quotes().await;
    assert_eq!((report.attempted, report.updated, report.errored), (2, 1, 1));
    assert_eq!(report.failures[0].ticker, "BOVA11.SA");
}

#[tokio::test]
async fn health_snapshot_after_a_sync() {
    let store = Arc::new(MemoryStore::new());
    let today = d(2024, 3, 10);
    let h = harness(
        store,
        FakeBars::default()
            .with("BOVA11.SA", daily_bars(d(2024, 3, 1), &[10.0; 8]))
            .with("XFIX11.SA", daily_bars(d(2024, 3, 1), &[10.0; 6])),
        FakeQuotes::default(),
        FakeRates::default(),
        today,
        config(&["BOVA11.SA", "XFIX11.SA"]),
    );
    let symbols = h.orchestrator.config().symbols.clone();
    h.orchestrator.sync(&symbols).await;

    let tickers: Vec<String> = ["BOVA11.SA", "XFIX11.SA", "CDI"].map(String::from).to_vec();
    let report = check_staleness(&*h.store, &tickers, today, 3, h.clock.now());
    assert_eq!(report.status, HealthStatus::Warning);
    insta::assert_json_snapshot!(report, @r###"
    {
      "status": "warning",
      "checked_at": "2024-03-10T12:00:00Z",
      "issues": [
        {
          "ticker": "XFIX11.SA",
          "kind": "stale",
          "last_date": "2024-03-06",
          "age_days": 4,
          "message": "last observation 2024-03-06 is 4 days old"
        },
        {
          "ticker": "CDI",
          "kind": "no_data",
          "last_date": null,
          "age_days": null,
          "message": "no observations stored"
        }
      ]
    }
    "###);
}
