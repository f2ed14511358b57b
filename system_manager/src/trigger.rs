//! Recurring triggers: cron expressions and fixed intervals.
//!
//! Cron triggers take the minute, hour and day-of-week fields of a
//! standard cron expression and fire at second zero. Day-of-week accepts
//! `mon`..`sun` or `1` (Sunday) to `7` (Saturday). Fire times are computed
//! in the scheduler's time zone.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::SchedulerError;

/// Interval candidates examined before giving up on a window.
const MAX_INTERVAL_STEPS: u32 = 100_000;

/// Minute, hour and day-of-week fields of a cron trigger.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: Schedule,
    expr: String,
}

impl CronSpec {
    /// Parses the three fields.
    pub fn parse(minute: &str, hour: &str, day_of_week: &str) -> Result<Self, SchedulerError> {
        let (minute, hour, day_of_week) = (minute.trim(), hour.trim(), day_of_week.trim());
        let expr = format!("{minute} {hour} {day_of_week}");
        if [minute, hour, day_of_week].iter().any(|f| f.is_empty() || f.contains(' ')) {
            return Err(SchedulerError::InvalidTrigger {
                expr,
                reason: "each field must be a single cron term".to_string(),
            });
        }
        let schedule = Schedule::from_str(&format!("0 {minute} {hour} * * {day_of_week}"))
            .map_err(|e| SchedulerError::InvalidTrigger {
                expr: expr.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { schedule, expr })
    }

    /// Every day at `hour:minute`.
    pub fn daily(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        Self::parse(&minute.to_string(), &hour.to_string(), "*")
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

impl PartialEq for CronSpec {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSpec {}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Daily local-time window an interval trigger is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    /// First allowed local time, inclusive.
    pub start: NaiveTime,
    /// Last allowed local time, inclusive.
    pub end: NaiveTime,
}

impl DailyWindow {
    fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Cron-like fields.
    Cron(CronSpec),
    /// Every `every`, counted from the registration anchor, optionally only
    /// inside a daily window.
    Interval {
        /// Period.
        every: Duration,
        /// Allowed local times.
        window: Option<DailyWindow>,
    },
}

impl Trigger {
    /// Interval trigger without a window.
    pub fn every(every: Duration) -> Self {
        Trigger::Interval {
            every,
            window: None,
        }
    }

    /// First fire time strictly after `after`. Interval triggers fire at
    /// `anchor + k × every`.
    pub fn next_after(
        &self,
        after: DateTime<Utc>,
        anchor: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(spec) => spec.next_after(after, tz),
            Trigger::Interval { every, window } => {
                let step = every.num_seconds();
                if step <= 0 {
                    return None;
                }
                let elapsed = (after - anchor).num_seconds();
                let k = if elapsed < 0 { 0 } else { elapsed / step + 1 };
                let mut at = anchor + Duration::seconds(k * step);
                let Some(window) = window else {
                    return Some(at);
                };
                for _ in 0..MAX_INTERVAL_STEPS {
                    if window.contains(at.with_timezone(&tz).time()) {
                        return Some(at);
                    }
                    at += *every;
                }
                None
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(spec) => write!(f, "cron[{spec}]"),
            Trigger::Interval { every, window } => {
                write!(f, "interval[{}m", every.num_minutes())?;
                if let Some(w) = window {
                    write!(f, " {}-{}", w.start.format("%H:%M"), w.end.format("%H:%M"))?;
                }
                write!(f, "]")
            }
        }
    }
}
