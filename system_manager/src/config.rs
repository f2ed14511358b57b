//! Service configuration: one TOML file plus environment overrides.
//!
//! ```toml
//! database_url = "data/market.sqlite"
//!
//! [pipeline]          # asset_sync::config::PipelineConfig
//! lookback_years = 5
//!
//! [scheduler]
//! max_workers = 3
//!
//! [scheduler.jobs.daily_sync]
//! hour = "7"
//! ```
//!
//! Job tables only override the fields they name; everything else keeps
//! the built-in definition of that job.

use std::{path::Path, time::Duration};

use anyhow::{Context, bail};
use asset_sync::{
    config::{PipelineConfig, normalize_config},
    tz::parse_tz,
};
use chrono::NaiveTime;
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shared_utils::env::{parse_flag_with, parse_with};

use crate::{
    error::SchedulerError,
    job::JobDescriptor,
    retry::RetryPolicy,
    scheduler::SchedulerOptions,
    trigger::{CronSpec, DailyWindow, Trigger},
};

/// Id of the daily historical sync.
pub const DAILY_SYNC: &str = "daily_sync";
/// Id of the half-hourly quote refresh during trading hours.
pub const QUOTES_BUSINESS_HOURS: &str = "quotes_business_hours";
/// Id of the hourly quote refresh outside trading hours.
pub const QUOTES_OFF_HOURS: &str = "quotes_off_hours";
/// Id of the staleness check.
pub const HEALTH_CHECK: &str = "health_check";

/// Whole service configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    /// SQLite path or `sqlite://` URL.
    pub database_url: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Pipeline settings.
    pub pipeline: PipelineConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "market_data.sqlite".to_string(),
            log_level: "info".to_string(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// `[scheduler]` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Zone cron fields are evaluated in.
    pub timezone: String,
    /// Concurrent scheduled runs.
    pub max_workers: usize,
    /// Seconds a firing may be late and still run.
    pub misfire_grace_secs: i64,
    /// Storage connection attempts at startup.
    pub connect_attempts: u32,
    /// Seconds between connection attempts.
    pub connect_backoff_secs: u64,
    /// Seconds shutdown waits for in-flight runs.
    pub shutdown_timeout_secs: u64,
    /// Seconds between watchdog checks.
    pub watchdog_interval_secs: u64,
    /// Timer loop period in milliseconds.
    pub tick_millis: u64,
    /// Per-job overrides keyed by job id.
    pub jobs: IndexMap<String, JobCfg>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Sao_Paulo".to_string(),
            max_workers: 3,
            misfire_grace_secs: 300,
            connect_attempts: 10,
            connect_backoff_secs: 5,
            shutdown_timeout_secs: 30,
            watchdog_interval_secs: 30,
            tick_millis: 1000,
            jobs: IndexMap::new(),
        }
    }
}

/// Override of one job. Unset fields keep the built-in value.
///
/// Setting `every_minutes` turns the job into an interval trigger; the
/// cron fields are ignored in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct JobCfg {
    /// Whether the trigger fires.
    pub enabled: Option<bool>,
    /// Cron minute field.
    pub minute: Option<String>,
    /// Cron hour field.
    pub hour: Option<String>,
    /// Cron day-of-week field (`mon`..`sun`, or `1` for Sunday to `7`).
    pub day_of_week: Option<String>,
    /// Interval period.
    pub every_minutes: Option<i64>,
    /// Interval window as `HH:MM-HH:MM`, local time.
    pub window: Option<String>,
}

struct BuiltinJob {
    id: &'static str,
    name: &'static str,
    cfg: JobCfg,
}

fn cron(minute: &str, hour: &str, day_of_week: &str) -> JobCfg {
    JobCfg {
        enabled: Some(true),
        minute: Some(minute.to_string()),
        hour: Some(hour.to_string()),
        day_of_week: Some(day_of_week.to_string()),
        ..JobCfg::default()
    }
}

fn builtin_jobs() -> [BuiltinJob; 4] {
    [
        BuiltinJob {
            id: DAILY_SYNC,
            name: "Daily historical sync",
            cfg: cron("0", "8", "*"),
        },
        BuiltinJob {
            id: QUOTES_BUSINESS_HOURS,
            name: "Quote refresh (trading hours)",
            cfg: cron("*/30", "9-17", "mon-fri"),
        },
        BuiltinJob {
            id: QUOTES_OFF_HOURS,
            name: "Quote refresh (off hours)",
            cfg: cron("0", "0-8,18-23", "*"),
        },
        BuiltinJob {
            id: HEALTH_CHECK,
            name: "Historical data staleness check",
            cfg: JobCfg {
                enabled: Some(true),
                every_minutes: Some(120),
                ..JobCfg::default()
            },
        },
    ]
}

impl JobCfg {
    fn merged_onto(&self, base: &JobCfg) -> JobCfg {
        let pick = |o: &Option<String>, b: &Option<String>| o.clone().or_else(|| b.clone());
        JobCfg {
            enabled: self.enabled.or(base.enabled),
            minute: pick(&self.minute, &base.minute),
            hour: pick(&self.hour, &base.hour),
            day_of_week: pick(&self.day_of_week, &base.day_of_week),
            every_minutes: self.every_minutes.or(base.every_minutes),
            window: pick(&self.window, &base.window),
        }
    }

    fn trigger(&self) -> Result<Trigger, SchedulerError> {
        if let Some(minutes) = self.every_minutes {
            if minutes <= 0 {
                return Err(SchedulerError::InvalidTrigger {
                    expr: format!("every {minutes} minutes"),
                    reason: "interval must be positive".to_string(),
                });
            }
            let window = self.window.as_deref().map(parse_window).transpose()?;
            return Ok(Trigger::Interval {
                every: chrono::Duration::minutes(minutes),
                window,
            });
        }
        let field = |f: &Option<String>| f.as_deref().unwrap_or("*").to_string();
        let spec = CronSpec::parse(
            &field(&self.minute),
            &field(&self.hour),
            &field(&self.day_of_week),
        )?;
        Ok(Trigger::Cron(spec))
    }
}

fn parse_window(raw: &str) -> Result<DailyWindow, SchedulerError> {
    let invalid = |reason: &str| SchedulerError::InvalidTrigger {
        expr: raw.to_string(),
        reason: reason.to_string(),
    };
    let (a, b) = raw
        .split_once('-')
        .ok_or_else(|| invalid("expected HH:MM-HH:MM"))?;
    let time = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| invalid("expected HH:MM-HH:MM"))
    };
    Ok(DailyWindow {
        start: time(a)?,
        end: time(b)?,
    })
}

impl SchedulerConfig {
    /// Parsed time zone.
    pub fn tz(&self) -> anyhow::Result<Tz> {
        parse_tz(&self.timezone)
    }

    /// Options for [`crate::scheduler::Scheduler::new`].
    pub fn options(&self) -> anyhow::Result<SchedulerOptions> {
        Ok(SchedulerOptions {
            tz: self.tz()?,
            max_workers: self.max_workers,
            misfire_grace: chrono::Duration::seconds(self.misfire_grace_secs),
            tick: Duration::from_millis(self.tick_millis),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_secs),
        })
    }

    /// Startup connection policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            backoff: Duration::from_secs(self.connect_backoff_secs),
        }
    }

    /// Drain timeout used on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// The built-in jobs with overrides applied, in registration order.
    pub fn job_descriptors(&self) -> Result<Vec<JobDescriptor>, SchedulerError> {
        let builtins = builtin_jobs();
        if let Some(unknown) = self
            .jobs
            .keys()
            .find(|id| !builtins.iter().any(|b| b.id == id.as_str()))
        {
            return Err(SchedulerError::UnknownJob(unknown.clone()));
        }

        builtins
            .iter()
            .map(|b| {
                let cfg = match self.jobs.get(b.id) {
                    Some(o) => o.merged_onto(&b.cfg),
                    None => b.cfg.clone(),
                };
                Ok(JobDescriptor::new(b.id, b.name, cfg.trigger()?)
                    .enabled(cfg.enabled.unwrap_or(true)))
            })
            .collect()
    }

    fn job_mut(&mut self, id: &str) -> &mut JobCfg {
        self.jobs.entry(id.to_string()).or_default()
    }
}

/// Applies environment overrides read through `lookup`.
pub fn apply_env<F>(cfg: &mut AppConfig, lookup: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = &lookup;
    if let Some(url) = parse_with::<String, _>("DATABASE_URL", env)? {
        cfg.database_url = url;
    }
    if let Some(url) = parse_with::<String, _>("RTD_API_URL", env)? {
        cfg.pipeline.quotes.base_url = url;
    }

    let sched = &mut cfg.scheduler;
    if let Some(tz) = parse_with::<String, _>("SCHEDULER_TIMEZONE", env)? {
        sched.timezone = tz;
    }
    if let Some(n) = parse_with("SCHEDULER_MAX_WORKERS", env)? {
        sched.max_workers = n;
    }
    if let Some(n) = parse_with("SCHEDULER_MISFIRE_GRACE", env)? {
        sched.misfire_grace_secs = n;
    }

    if let Some(on) = parse_flag_with("SCHEDULER_DAILY_SYNC_ENABLED", env)? {
        sched.job_mut(DAILY_SYNC).enabled = Some(on);
    }
    if let Some(h) = parse_with::<u32, _>("SCHEDULER_DAILY_SYNC_HOUR", env)? {
        sched.job_mut(DAILY_SYNC).hour = Some(h.to_string());
    }
    if let Some(m) = parse_with::<u32, _>("SCHEDULER_DAILY_SYNC_MINUTE", env)? {
        sched.job_mut(DAILY_SYNC).minute = Some(m.to_string());
    }
    if let Some(on) = parse_flag_with("SCHEDULER_QUOTES_BUSINESS_ENABLED", env)? {
        sched.job_mut(QUOTES_BUSINESS_HOURS).enabled = Some(on);
    }
    if let Some(n) = parse_with::<u32, _>("SCHEDULER_QUOTES_BUSINESS_INTERVAL", env)? {
        sched.job_mut(QUOTES_BUSINESS_HOURS).minute = Some(format!("*/{n}"));
    }
    if let Some(on) = parse_flag_with("SCHEDULER_QUOTES_OFF_HOURS_ENABLED", env)? {
        sched.job_mut(QUOTES_OFF_HOURS).enabled = Some(on);
    }
    if let Some(on) = parse_flag_with("SCHEDULER_HEALTH_ENABLED", env)? {
        sched.job_mut(HEALTH_CHECK).enabled = Some(on);
    }
    if let Some(n) = parse_with("SCHEDULER_HEALTH_INTERVAL", env)? {
        sched.job_mut(HEALTH_CHECK).every_minutes = Some(n);
    }
    Ok(())
}

/// Validates and normalizes a configuration in place.
pub fn normalize(cfg: &mut AppConfig) -> anyhow::Result<()> {
    cfg.database_url = cfg.database_url.trim().to_string();
    if cfg.database_url.is_empty() {
        bail!("database_url cannot be empty");
    }
    normalize_config(&mut cfg.pipeline).context("invalid [pipeline] table")?;

    let sched = &mut cfg.scheduler;
    sched.timezone = sched.timezone.trim().to_string();
    sched.tz().context("invalid scheduler.timezone")?;
    if sched.max_workers == 0 {
        bail!("scheduler.max_workers must be at least 1");
    }
    if sched.misfire_grace_secs < 0 {
        bail!("scheduler.misfire_grace_secs cannot be negative");
    }
    if sched.connect_attempts == 0 {
        bail!("scheduler.connect_attempts must be at least 1");
    }
    if sched.tick_millis == 0 {
        bail!("scheduler.tick_millis must be at least 1");
    }
    sched.job_descriptors()?;
    Ok(())
}

/// Parses a TOML document, applies overrides from `lookup` and validates.
pub fn load_config_str<F>(s: &str, lookup: F) -> anyhow::Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg: AppConfig = toml::from_str(s).context("parse config")?;
    apply_env(&mut cfg, lookup)?;
    normalize(&mut cfg)?;
    Ok(cfg)
}

/// Loads `path` (or the defaults when `None`) with process environment
/// overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let text = match path {
        Some(p) => {
            std::fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?
        }
        None => String::new(),
    };
    load_config_str(&text, |name| std::env::var(name).ok())
}
