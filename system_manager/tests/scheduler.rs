mod common;

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use common::{
    CountingJob, FailingJob, GateJob, PanickingJob, clock, eventually, quiet_opts, scheduler, t0,
};
use insta::assert_json_snapshot;
use serde_json::json;
use system_manager::{
    Scheduler, SchedulerError, SchedulerOptions, SchedulerState,
    config::SchedulerConfig,
    job::{Job, JobDescriptor},
    registry::{RunKind, RunState},
    trigger::Trigger,
};

fn every(id: &str, minutes: i64) -> JobDescriptor {
    JobDescriptor::new(id, id, Trigger::every(ChronoDuration::minutes(minutes)))
}

#[tokio::test]
async fn firing_while_in_flight_is_skipped() {
    let clock = clock();
    let s = scheduler(&clock);
    let gate = Arc::new(GateJob::new());
    s.register(every("gate", 5), gate.clone());
    s.start().unwrap();

    clock.advance(ChronoDuration::minutes(5));
    assert_eq!(s.tick(), vec!["gate".to_string()]);
    eventually(|| gate.started() == 1).await;

    clock.advance(ChronoDuration::minutes(5));
    assert!(s.tick().is_empty());
    assert!(matches!(s.run_now("gate"), Err(SchedulerError::AlreadyRunning(_))));

    let status = s.status();
    assert_eq!(status.runs["gate"].state, RunState::Running);
    assert_eq!(status.skipped["gate"], 2);
    assert_eq!(s.registry().in_flight(), 1);

    gate.release(1);
    eventually(|| s.registry().latest("gate").is_some_and(|r| r.state == RunState::Completed))
        .await;
    assert_eq!(gate.started(), 1);
    assert!(s.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn queued_runs_start_the_clock_when_a_worker_frees_up() {
    let clock = clock();
    let s = Scheduler::new(
        SchedulerOptions {
            max_workers: 1,
            ..quiet_opts()
        },
        clock.clone(),
    );
    let gate = Arc::new(GateJob::new());
    let job = Arc::new(CountingJob::default());
    s.register(every("gate", 5), gate.clone());
    s.register(every("count", 5), job.clone());
    s.start().unwrap();

    clock.advance(ChronoDuration::minutes(5));
    assert_eq!(s.tick().len(), 2);
    eventually(|| gate.started() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(job.runs(), 0);

    clock.advance(ChronoDuration::minutes(2));
    gate.release(1);
    eventually(|| s.registry().latest("count").is_some_and(|r| r.state == RunState::Completed))
        .await;
    let queued = s.registry().latest("count").unwrap();
    assert_eq!(queued.started_at, t0() + ChronoDuration::minutes(7));
    assert_eq!(queued.duration_ms, Some(0));
    assert_eq!(
        s.registry().latest("gate").unwrap().started_at,
        t0() + ChronoDuration::minutes(5)
    );
    assert!(s.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn late_firing_beyond_grace_is_skipped_and_rescheduled() {
    let clock = clock();
    let s = scheduler(&clock);
    let job = Arc::new(CountingJob::default());
    s.register(every("count", 5), job.clone());
    s.start().unwrap();
    assert_eq!(s.jobs()[0].next_run, Some(t0() + ChronoDuration::minutes(5)));

    clock.advance(ChronoDuration::seconds(601));
    assert!(s.tick().is_empty());
    assert_eq!(s.jobs()[0].next_run, Some(t0() + ChronoDuration::minutes(15)));

    clock.set(t0() + ChronoDuration::minutes(15));
    assert_eq!(s.tick(), vec!["count".to_string()]);
    eventually(|| job.runs() == 1).await;
    assert!(s.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn failures_and_panics_are_recorded_not_propagated() {
    let clock = clock();
    let s = scheduler(&clock);
    let ok = Arc::new(CountingJob::default());
    s.register(every("fails", 5), Arc::new(FailingJob));
    s.register(every("panics", 5), Arc::new(PanickingJob));
    s.register(every("ok", 5), ok.clone());
    s.start().unwrap();

    clock.advance(ChronoDuration::minutes(5));
    assert_eq!(s.tick().len(), 3);
    eventually(|| s.registry().in_flight() == 0).await;

    let status = s.status();
    assert_eq!(status.state, SchedulerState::Running);
    assert_eq!(status.runs["fails"].state, RunState::Error);
    assert_eq!(
        status.runs["fails"].error.as_deref(),
        Some("upstream returned garbage")
    );
    assert_eq!(status.runs["panics"].state, RunState::Error);
    assert!(status.runs["panics"].error.as_deref().unwrap().contains("index out of range"));
    assert_eq!(status.runs["ok"].state, RunState::Completed);
    assert!(status.last_success.contains_key("ok"));
    assert!(!status.last_success.contains_key("fails"));

    clock.advance(ChronoDuration::minutes(5));
    assert_eq!(s.tick().len(), 3);
    eventually(|| ok.runs() == 2).await;
    assert!(s.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn manual_runs_share_status_with_scheduled_runs() {
    let clock = clock();
    let s = scheduler(&clock);
    let job = Arc::new(CountingJob::default());
    s.register(every("count", 60).enabled(false), job.clone());

    let run = s.run_and_wait("count").await.unwrap();
    assert_eq!(run.kind, RunKind::Manual);
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.output, Some(json!({ "run": 1 })));
    assert_eq!(run.duration_ms, Some(0));

    s.start().unwrap();
    assert_eq!(s.jobs()[0].next_run, None);
    s.run_now("count").unwrap();
    eventually(|| job.runs() == 2).await;
    assert_eq!(s.status().runs["count"].kind, RunKind::Manual);

    assert!(matches!(
        s.run_now("missing"),
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(s.stop(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn stop_is_idempotent_and_bounded_by_the_drain_timeout() {
    let clock = clock();
    let s = scheduler(&clock);
    assert!(s.stop(Duration::from_secs(1)).await);
    assert_eq!(s.state(), SchedulerState::Stopped);

    let gate = Arc::new(GateJob::new());
    s.register(every("gate", 5), gate.clone());
    s.start().unwrap();
    s.start().unwrap();
    s.run_now("gate").unwrap();
    eventually(|| gate.started() == 1).await;

    assert!(!s.stop(Duration::from_millis(50)).await);
    assert_eq!(s.state(), SchedulerState::Stopped);
    assert!(s.jobs()[0].next_run.is_none());
    assert!(s.stop(Duration::from_secs(1)).await);

    gate.release(1);
    eventually(|| s.registry().in_flight() == 0).await;
}

#[tokio::test]
async fn stop_waits_for_in_flight_runs() {
    let clock = clock();
    let s = scheduler(&clock);
    let gate = Arc::new(GateJob::new());
    s.register(every("gate", 5), gate.clone());
    s.start().unwrap();
    s.run_now("gate").unwrap();
    eventually(|| gate.started() == 1).await;

    let releaser = {
        let gate = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.release(1);
        })
    };
    assert!(s.stop(Duration::from_secs(5)).await);
    assert_eq!(
        s.registry().latest("gate").map(|r| r.state),
        Some(RunState::Completed)
    );
    releaser.await.unwrap();
}

#[tokio::test]
async fn registering_an_existing_id_replaces_the_job() {
    let clock = clock();
    let s = scheduler(&clock);
    let first = Arc::new(CountingJob::default());
    let second = Arc::new(CountingJob::default());
    s.register(every("job", 5), first.clone());
    s.register(every("job", 30), second.clone());

    let jobs = s.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].trigger, "interval[30m]");

    s.run_and_wait("job").await.unwrap();
    assert_eq!((first.runs(), second.runs()), (0, 1));
}

#[tokio::test]
async fn stock_schedule_next_fire_times() {
    let clock = clock();
    let s = scheduler(&clock);
    for d in SchedulerConfig::default().job_descriptors().unwrap() {
        let job: Arc<dyn Job> = Arc::new(CountingJob::default());
        s.register(d, job);
    }
    s.start().unwrap();

    assert_json_snapshot!(s.jobs(), @r###"
    [
      {
        "id": "daily_sync",
        "name": "Daily historical sync",
        "trigger": "cron[0 8 *]",
        "enabled": true,
        "next_run": "2024-05-11T11:00:00Z"
      },
      {
        "id": "quotes_business_hours",
        "name": "Quote refresh (trading hours)",
        "trigger": "cron[*/30 9-17 mon-fri]",
        "enabled": true,
        "next_run": "2024-05-10T12:30:00Z"
      },
      {
        "id": "quotes_off_hours",
        "name": "Quote refresh (off hours)",
        "trigger": "cron[0 0-8,18-23 *]",
        "enabled": true,
        "next_run": "2024-05-10T21:00:00Z"
      },
      {
        "id": "health_check",
        "name": "Historical data staleness check",
        "trigger": "interval[120m]",
        "enabled": true,
        "next_run": "2024-05-10T14:00:00Z"
      }
    ]
    "###);
    assert!(s.stop(Duration::from_secs(1)).await);
}
