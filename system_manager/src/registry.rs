//! Latest run per job id, shared by timer dispatch and manual runs.
//!
//! A run starts by claiming its job id. The claim fails while another run
//! of the same id is in flight, which is what keeps every job single-flight
//! no matter who triggered it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// In flight.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed or panicked.
    Error,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Fired by the job's trigger.
    Scheduled,
    /// Requested out of band.
    Manual,
}

/// Latest run of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    /// Job id.
    pub job_id: String,
    /// Trigger source.
    pub kind: RunKind,
    /// Current state.
    pub state: RunState,
    /// Start instant.
    pub started_at: DateTime<Utc>,
    /// End instant, once finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Run time in milliseconds, once finished.
    pub duration_ms: Option<i64>,
    /// Error message of a failed run.
    pub error: Option<String>,
    /// Value returned by the job.
    pub output: Option<Value>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: IndexMap<String, JobRun>,
    last_success: IndexMap<String, DateTime<Utc>>,
    skipped: IndexMap<String, u64>,
}

/// Snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    /// Latest run per job id, in first-run order.
    pub runs: IndexMap<String, JobRun>,
    /// End of the last successful run per job id.
    pub last_success: IndexMap<String, DateTime<Utc>>,
    /// Firings skipped because a run was in flight.
    pub skipped: IndexMap<String, u64>,
}

/// Run status map.
#[derive(Debug, Default)]
pub struct RunRegistry {
    inner: Mutex<Inner>,
}

impl RunRegistry {
    /// Empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `job_id` running unless a run is already in flight.
    pub fn try_claim(self: &Arc<Self>, job_id: &str, kind: RunKind, now: DateTime<Utc>) -> Option<RunGuard> {
        let mut inner = self.lock();
        if inner
            .runs
            .get(job_id)
            .is_some_and(|r| r.state == RunState::Running)
        {
            return None;
        }
        inner.runs.insert(
            job_id.to_string(),
            JobRun {
                job_id: job_id.to_string(),
                kind,
                state: RunState::Running,
                started_at: now,
                finished_at: None,
                duration_ms: None,
                error: None,
                output: None,
            },
        );
        Some(RunGuard {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
            finished: false,
        })
    }

    /// Counts a firing that was dropped because of an in-flight run.
    pub fn record_skip(&self, job_id: &str) {
        *self.lock().skipped.entry(job_id.to_string()).or_default() += 1;
    }

    /// Latest run of `job_id`.
    pub fn latest(&self, job_id: &str) -> Option<JobRun> {
        self.lock().runs.get(job_id).cloned()
    }

    /// Number of runs in flight.
    pub fn in_flight(&self) -> usize {
        self.lock()
            .runs
            .values()
            .filter(|r| r.state == RunState::Running)
            .count()
    }

    /// Copy of the whole registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            runs: inner.runs.clone(),
            last_success: inner.last_success.clone(),
            skipped: inner.skipped.clone(),
        }
    }

    fn mark_started(&self, job_id: &str, now: DateTime<Utc>) {
        if let Some(run) = self.lock().runs.get_mut(job_id) {
            run.started_at = now;
        }
    }

    fn finish(&self, job_id: &str, now: DateTime<Utc>, result: Result<Value, String>) -> Option<JobRun> {
        let mut inner = self.lock();
        let ok = result.is_ok();
        let run = inner.runs.get_mut(job_id)?;
        run.finished_at = Some(now);
        run.duration_ms = Some((now - run.started_at).num_milliseconds());
        match result {
            Ok(output) => {
                run.state = RunState::Completed;
                run.output = Some(output);
            }
            Err(message) => {
                run.state = RunState::Error;
                run.error = Some(message);
            }
        }
        let run = run.clone();
        if ok {
            inner.last_success.insert(job_id.to_string(), now);
        }
        Some(run)
    }
}

/// Claim on a job id. Finishing consumes it; dropping it unfinished marks
/// the run as an error.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    job_id: String,
    finished: bool,
}

impl RunGuard {
    /// Job id of the claim.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Moves the run's start to `now`, once it actually begins executing.
    pub fn mark_started(&self, now: DateTime<Utc>) {
        self.registry.mark_started(&self.job_id, now);
    }

    /// Records success.
    pub fn complete(mut self, now: DateTime<Utc>, output: Value) -> Option<JobRun> {
        self.finished = true;
        self.registry.finish(&self.job_id, now, Ok(output))
    }

    /// Records failure.
    pub fn fail(mut self, now: DateTime<Utc>, message: impl Into<String>) -> Option<JobRun> {
        self.finished = true;
        self.registry.finish(&self.job_id, now, Err(message.into()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(job_id = %self.job_id, "run abandoned before finishing");
            self.registry
                .finish(&self.job_id, Utc::now(), Err("run abandoned".to_string()));
        }
    }
}
