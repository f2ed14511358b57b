//! Job scheduler: triggers, bounded worker pool, run status, watchdog and
//! graceful shutdown.
//!
//! Lifecycle: `Stopped → Starting → Running → Stopping → Stopped`. A
//! watchdog moves a `Running` scheduler whose timer loop died back through
//! `Starting` and respawns the loop.
//!
//! Scheduled runs wait for a slot in a pool of `max_workers`; manual runs
//! bypass the pool. Both claim the job id in the shared [`RunRegistry`]
//! first, so a job never has two runs in flight.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use asset_sync::clock::Clock;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::{
    runtime::Handle,
    sync::{Semaphore, watch},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::SchedulerError,
    job::{Job, JobDescriptor},
    registry::{JobRun, RunGuard, RunKind, RunRegistry},
};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Zone cron fields are evaluated in.
    pub tz: Tz,
    /// Concurrent scheduled runs.
    pub max_workers: usize,
    /// How late a firing may be and still run.
    pub misfire_grace: chrono::Duration,
    /// Timer loop period.
    pub tick: Duration,
    /// Watchdog period.
    pub watchdog_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::Sao_Paulo,
            max_workers: 3,
            misfire_grace: chrono::Duration::seconds(300),
            tick: Duration::from_secs(1),
            watchdog_interval: Duration::from_secs(30),
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not dispatching.
    Stopped,
    /// Coming up, or restarting a dead timer loop.
    Starting,
    /// Dispatching due jobs.
    Running,
    /// Draining in-flight runs.
    Stopping,
}

/// A registered job as shown in status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    /// Job id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Trigger description.
    pub trigger: String,
    /// Whether the trigger fires.
    pub enabled: bool,
    /// Next fire time while running.
    pub next_run: Option<DateTime<Utc>>,
}

/// Full scheduler status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    /// Lifecycle state.
    pub state: SchedulerState,
    /// `state == Running`.
    pub running: bool,
    /// When the status was taken.
    pub timestamp: DateTime<Utc>,
    /// Timer loop restarts performed by the watchdog.
    pub restarts: u32,
    /// Registered jobs.
    pub jobs: Vec<JobStatus>,
    /// Latest run of every job that ever ran.
    pub runs: IndexMap<String, JobRun>,
    /// End of the last successful run per job.
    pub last_success: IndexMap<String, DateTime<Utc>>,
    /// Firings skipped because a run was still in flight.
    pub skipped: IndexMap<String, u64>,
}

struct Entry {
    descriptor: JobDescriptor,
    job: Arc<dyn Job>,
    anchor: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
}

struct Inner {
    opts: SchedulerOptions,
    clock: Arc<dyn Clock>,
    jobs: Mutex<IndexMap<String, Entry>>,
    registry: Arc<RunRegistry>,
    pool: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
    restarts: AtomicU32,
    timer: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    runs: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn runtime() -> Result<Handle, SchedulerError> {
    Handle::try_current().map_err(|e| SchedulerError::Runtime(e.to_string()))
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "run cancelled".to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "panicked".to_string(), |m| format!("panicked: {m}"))
}

impl Inner {
    fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SchedulerState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!(from = ?*state, to = ?next, "scheduler state change");
            *state = next;
        }
    }

    /// Dispatches every job whose fire time has come.
    fn tick(self: &Arc<Self>) -> Vec<String> {
        let now = self.clock.now();
        let mut due = Vec::new();
        {
            let mut jobs = lock(&self.jobs);
            for (id, entry) in jobs.iter_mut() {
                let Some(at) = entry.next_run.filter(|at| *at <= now) else {
                    continue;
                };
                // Missed firings collapse into one; the next run is computed from now.
                entry.next_run = entry
                    .descriptor
                    .trigger
                    .next_after(now, entry.anchor, self.opts.tz);
                let late = now - at;
                if late > self.opts.misfire_grace {
                    warn!(job_id = %id, late_secs = late.num_seconds(), next_run = ?entry.next_run, "fire time missed beyond grace, skipping");
                    continue;
                }
                due.push((id.clone(), Arc::clone(&entry.job)));
            }
        }

        due.into_iter()
            .filter_map(|(id, job)| {
                self.dispatch(&id, job, RunKind::Scheduled)
                    .ok()
                    .map(|_| id)
            })
            .collect()
    }

    fn dispatch(
        self: &Arc<Self>,
        id: &str,
        job: Arc<dyn Job>,
        kind: RunKind,
    ) -> Result<(), SchedulerError> {
        let handle = runtime()?;
        let Some(guard) = self.registry.try_claim(id, kind, self.clock.now()) else {
            self.registry.record_skip(id);
            warn!(job_id = %id, ?kind, "previous run still in flight, skipping");
            return Err(SchedulerError::AlreadyRunning(id.to_string()));
        };

        let pool = (kind == RunKind::Scheduled).then(|| Arc::clone(&self.pool));
        let inner = Arc::clone(self);
        let task = handle.spawn(async move {
            let _permit = match pool {
                Some(pool) => match pool.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        guard.fail(inner.clock.now(), "worker pool closed");
                        return;
                    }
                },
                None => None,
            };
            guard.mark_started(inner.clock.now());
            inner.execute(guard, job).await;
        });

        let mut runs = lock(&self.runs);
        runs.retain(|h| !h.is_finished());
        runs.push(task);
        Ok(())
    }

    /// Runs the job body in its own task and records the outcome.
    async fn execute(&self, guard: RunGuard, job: Arc<dyn Job>) -> Option<JobRun> {
        let id = guard.job_id().to_string();
        info!(job_id = %id, "job started");
        let started = Instant::now();

        let outcome = tokio::spawn(async move { job.run().await }).await;
        let now = self.clock.now();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(output)) => {
                info!(job_id = %id, elapsed_ms, "job completed");
                guard.complete(now, output)
            }
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                error!(job_id = %id, elapsed_ms, error = %message, "job failed");
                guard.fail(now, message)
            }
            Err(join) => {
                let message = panic_message(join);
                error!(job_id = %id, elapsed_ms, error = %message, "job aborted");
                guard.fail(now, message)
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>) -> Result<JoinHandle<()>, SchedulerError> {
        let handle = runtime()?;
        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        Ok(handle.spawn(async move {
            loop {
                let dispatched = inner.tick();
                if !dispatched.is_empty() {
                    debug!(?dispatched, "dispatched due jobs");
                }
                tokio::select! {
                    _ = tokio::time::sleep(inner.opts.tick) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("timer loop exited");
        }))
    }

    fn spawn_watchdog(self: &Arc<Self>) -> Result<JoinHandle<()>, SchedulerError> {
        let handle = runtime()?;
        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        Ok(handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(inner.opts.watchdog_interval) => {
                        inner.watchdog_tick();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }

    fn watchdog_tick(self: &Arc<Self>) -> bool {
        if self.state() != SchedulerState::Running {
            return false;
        }
        let alive = lock(&self.timer).as_ref().is_some_and(|h| !h.is_finished());
        if alive {
            return false;
        }

        error!("timer loop is not running, restarting it");
        self.set_state(SchedulerState::Starting);
        match self.spawn_timer() {
            Ok(h) => {
                *lock(&self.timer) = Some(h);
                let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                self.set_state(SchedulerState::Running);
                info!(restarts, "timer loop restarted");
                true
            }
            Err(e) => {
                error!(error = %e, "timer loop restart failed, scheduler is stopped");
                self.set_state(SchedulerState::Stopped);
                false
            }
        }
    }

    fn job_statuses(&self) -> Vec<JobStatus> {
        lock(&self.jobs)
            .values()
            .map(|e| JobStatus {
                id: e.descriptor.id.clone(),
                name: e.descriptor.name.clone(),
                trigger: e.descriptor.trigger.to_string(),
                enabled: e.descriptor.enabled,
                next_run: e.next_run,
            })
            .collect()
    }
}

/// Handle to a scheduler. Clones share the same instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Stopped scheduler with no jobs.
    pub fn new(opts: SchedulerOptions, clock: Arc<dyn Clock>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pool: Arc::new(Semaphore::new(opts.max_workers.max(1))),
                opts,
                clock,
                jobs: Mutex::new(IndexMap::new()),
                registry: RunRegistry::new(),
                state: Mutex::new(SchedulerState::Stopped),
                restarts: AtomicU32::new(0),
                timer: Mutex::new(None),
                watchdog: Mutex::new(None),
                runs: Mutex::new(Vec::new()),
                shutdown,
            }),
        }
    }

    /// Adds `job`, replacing any job with the same id.
    pub fn register(&self, descriptor: JobDescriptor, job: Arc<dyn Job>) {
        let inner = &self.inner;
        let now = inner.clock.now();
        let live = matches!(
            inner.state(),
            SchedulerState::Running | SchedulerState::Starting
        );
        let next_run = if live && descriptor.enabled {
            descriptor.trigger.next_after(now, now, inner.opts.tz)
        } else {
            None
        };

        let id = descriptor.id.clone();
        let trigger = descriptor.trigger.to_string();
        let replaced = lock(&inner.jobs)
            .insert(
                id.clone(),
                Entry {
                    descriptor,
                    job,
                    anchor: now,
                    next_run,
                },
            )
            .is_some();
        if replaced {
            info!(job_id = %id, %trigger, "job replaced");
        } else {
            info!(job_id = %id, %trigger, "job registered");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    /// Shared run registry.
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.inner.registry
    }

    /// Schedules every enabled job and spawns the timer loop and watchdog.
    ///
    /// Must be called inside a tokio runtime. Starting a started scheduler
    /// is a no-op.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.state);
            if *state != SchedulerState::Stopped {
                warn!(state = ?*state, "scheduler already started");
                return Ok(());
            }
            *state = SchedulerState::Starting;
        }
        inner.shutdown.send_replace(false);

        let now = inner.clock.now();
        for (id, entry) in lock(&inner.jobs).iter_mut() {
            entry.anchor = now;
            entry.next_run = if entry.descriptor.enabled {
                entry.descriptor.trigger.next_after(now, now, inner.opts.tz)
            } else {
                None
            };
            debug!(job_id = %id, next_run = ?entry.next_run, "job scheduled");
        }

        let spawned = inner
            .spawn_timer()
            .and_then(|timer| Ok((timer, inner.spawn_watchdog()?)));
        match spawned {
            Ok((timer, watchdog)) => {
                *lock(&inner.timer) = Some(timer);
                *lock(&inner.watchdog) = Some(watchdog);
                inner.set_state(SchedulerState::Running);
                info!(
                    jobs = lock(&inner.jobs).len(),
                    workers = inner.opts.max_workers,
                    tz = %inner.opts.tz,
                    "scheduler started"
                );
                Ok(())
            }
            Err(e) => {
                inner.shutdown.send_replace(true);
                inner.set_state(SchedulerState::Stopped);
                error!(error = %e, "scheduler failed to start");
                Err(e)
            }
        }
    }

    /// Dispatches jobs due now. The timer loop calls this every tick.
    pub fn tick(&self) -> Vec<String> {
        self.inner.tick()
    }

    fn job(&self, id: &str) -> Result<Arc<dyn Job>, SchedulerError> {
        lock(&self.inner.jobs)
            .get(id)
            .map(|e| Arc::clone(&e.job))
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))
    }

    /// Starts a manual run of `id` in the background.
    pub fn run_now(&self, id: &str) -> Result<(), SchedulerError> {
        let job = self.job(id)?;
        info!(job_id = %id, "manual run requested");
        self.inner.dispatch(id, job, RunKind::Manual)
    }

    /// Runs `id` manually and waits for the outcome.
    pub async fn run_and_wait(&self, id: &str) -> Result<JobRun, SchedulerError> {
        let job = self.job(id)?;
        let guard = self
            .inner
            .registry
            .try_claim(id, RunKind::Manual, self.inner.clock.now())
            .ok_or_else(|| SchedulerError::AlreadyRunning(id.to_string()))?;
        self.inner
            .execute(guard, job)
            .await
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))
    }

    /// Stops dispatching and waits up to `drain` for in-flight runs.
    ///
    /// Returns `false` when runs were still in flight at the deadline.
    /// Stopping a stopped scheduler only logs a warning.
    pub async fn stop(&self, drain: Duration) -> bool {
        let inner = &self.inner;
        {
            let mut state = lock(&inner.state);
            if matches!(*state, SchedulerState::Stopped | SchedulerState::Stopping) {
                warn!(state = ?*state, "scheduler is not running, ignoring stop");
                return true;
            }
            *state = SchedulerState::Stopping;
        }
        info!(in_flight = inner.registry.in_flight(), "stopping scheduler");
        inner.shutdown.send_replace(true);

        let loops = [lock(&inner.timer).take(), lock(&inner.watchdog).take()];
        for handle in loops.into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!(error = %e, "background loop ended abnormally");
            }
        }

        let runs = std::mem::take(&mut *lock(&inner.runs));
        let deadline = tokio::time::Instant::now() + drain;
        let mut drained = true;
        for run in runs {
            if tokio::time::timeout_at(deadline, run).await.is_err() {
                drained = false;
                warn!(
                    in_flight = inner.registry.in_flight(),
                    "drain timeout reached, leaving runs to finish on their own"
                );
                break;
            }
        }

        for entry in lock(&inner.jobs).values_mut() {
            entry.next_run = None;
        }
        inner.set_state(SchedulerState::Stopped);
        info!(drained, "scheduler stopped");
        drained
    }

    /// One watchdog pass: respawns a dead timer loop while running.
    /// Returns `true` when a restart happened.
    pub fn watchdog_tick(&self) -> bool {
        self.inner.watchdog_tick()
    }

    /// Registered jobs with their next fire times.
    pub fn jobs(&self) -> Vec<JobStatus> {
        self.inner.job_statuses()
    }

    /// Registered jobs with the fire times they would get if started now.
    pub fn plan(&self) -> Vec<JobStatus> {
        let inner = &self.inner;
        let now = inner.clock.now();
        lock(&inner.jobs)
            .values()
            .map(|e| JobStatus {
                id: e.descriptor.id.clone(),
                name: e.descriptor.name.clone(),
                trigger: e.descriptor.trigger.to_string(),
                enabled: e.descriptor.enabled,
                next_run: e
                    .descriptor
                    .enabled
                    .then(|| e.descriptor.trigger.next_after(now, now, inner.opts.tz))
                    .flatten(),
            })
            .collect()
    }

    /// Full status snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        let state = inner.state();
        let snapshot = inner.registry.snapshot();
        SchedulerStatus {
            state,
            running: state == SchedulerState::Running,
            timestamp: inner.clock.now(),
            restarts: inner.restarts.load(Ordering::SeqCst),
            jobs: inner.job_statuses(),
            runs: snapshot.runs,
            last_success: snapshot.last_success,
            skipped: snapshot.skipped,
        }
    }
}
