#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use asset_sync::clock::FixedClock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use system_manager::{
    job::Job,
    retry::Sleeper,
    scheduler::{Scheduler, SchedulerOptions},
};
use tokio::sync::Semaphore;

/// Friday 2024-05-10 09:00 in São Paulo.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(t0()))
}

/// Options whose background loops stay asleep for the whole test, so
/// dispatch only happens through explicit `tick()` calls.
pub fn quiet_opts() -> SchedulerOptions {
    SchedulerOptions {
        tick: Duration::from_secs(3600),
        watchdog_interval: Duration::from_secs(3600),
        ..SchedulerOptions::default()
    }
}

pub fn scheduler(clock: &Arc<FixedClock>) -> Scheduler {
    Scheduler::new(quiet_opts(), clock.clone())
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Counts runs and returns the count.
#[derive(Default)]
pub struct CountingJob {
    pub runs: AtomicUsize,
}

impl CountingJob {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for CountingJob {
    async fn run(&self) -> anyhow::Result<Value> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "run": n }))
    }
}

/// Blocks every run until `release` is called.
pub struct GateJob {
    pub started: AtomicUsize,
    gate: Semaphore,
}

impl GateJob {
    pub fn new() -> Self {
        Self {
            started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn release(&self, runs: usize) {
        self.gate.add_permits(runs);
    }
}

#[async_trait]
impl Job for GateJob {
    async fn run(&self) -> anyhow::Result<Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        Ok(json!("released"))
    }
}

pub struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    async fn run(&self) -> anyhow::Result<Value> {
        bail!("upstream returned garbage")
    }
}

pub struct PanickingJob;

#[async_trait]
impl Job for PanickingJob {
    async fn run(&self) -> anyhow::Result<Value> {
        panic!("index out of range")
    }
}

/// Records requested sleeps instead of waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
