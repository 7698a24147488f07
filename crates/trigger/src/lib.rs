//! issue-sync cycle trigger.
//!
//! Turns a schedule definition into firings of "run one cycle". A
//! definition is a map holding **exactly one** of the recognised keys:
//!
//! | Key | Value | Firings |
//! |-----|-------|---------|
//! | `cron` | cron expression, 5 fields or 6 with leading seconds, optionally followed by a time zone name | every matching instant |
//! | `every` | duration, e.g. `"1h"`, `"30s"` | immediately, then every interval |
//! | `in` | duration | once, after the delay |
//! | `at` | RFC 3339 timestamp | once, at that instant (immediately if past) |
//!
//! Cron fields use the classic numbering: day of week `0`-`7` with both `0`
//! and `7` meaning Sunday. A trailing IANA zone name (`"0 9 * * 1-5
//! Europe/Berlin"`) evaluates the expression in that zone; without one it is
//! evaluated in UTC.
//!
//! Anything else (no key, two or more keys, an unknown key, an unparsable
//! value) is a [`ScheduleError`] raised before any cycle runs.
//!
//! ## Overlap
//!
//! [`Trigger::run`] awaits each cycle before computing the next firing, so
//! cycles driven by one trigger never overlap. A firing that falls due while
//! a cycle is still running is taken as soon as the cycle finishes.

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info};

/// A validated schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire at every instant matching the expression.
    Cron(Box<CronSchedule>),
    /// Fire immediately, then every interval.
    Every(Duration),
    /// Fire once after a delay.
    In(Duration),
    /// Fire once at an absolute time.
    At(DateTime<Utc>),
}

/// A schedule definition that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Zero, or more than one, schedule key was given.
    #[error(
        "Invalid config. schedule must contain exactly one of the following keys - \
         cron, at, every or in (found {found:?})"
    )]
    KeyCount {
        /// Keys present in the definition.
        found: Vec<String>,
    },

    /// The single key given is not a schedule kind.
    #[error(
        "Invalid config. schedule key '{key}' is not one of the following keys - \
         cron, at, every or in"
    )]
    UnknownKey {
        /// The unrecognised key.
        key: String,
    },

    /// The `cron` value is not a valid expression.
    #[error("invalid cron expression '{expression}': {message}")]
    Cron {
        /// The configured expression.
        expression: String,
        /// Parser error.
        message: String,
    },

    /// The `every` or `in` value is not a positive duration.
    #[error("invalid duration '{value}' for '{kind}': {message}")]
    Duration {
        /// `every` or `in`.
        kind: &'static str,
        /// The configured value.
        value: String,
        /// Why it was rejected.
        message: String,
    },

    /// The `at` value is not an RFC 3339 timestamp.
    #[error("invalid timestamp '{value}' for 'at': {message}")]
    Timestamp {
        /// The configured value.
        value: String,
        /// Parser error.
        message: String,
    },
}

impl Schedule {
    /// Validates a schedule definition.
    pub fn from_map(definition: &BTreeMap<String, String>) -> Result<Self, ScheduleError> {
        let mut entries = definition.iter();
        let (key, value) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(ScheduleError::KeyCount {
                    found: definition.keys().cloned().collect(),
                })
            }
        };
        let value = value.trim();
        match key.as_str() {
            "cron" => CronSchedule::parse(value).map(|cron| Schedule::Cron(Box::new(cron))),
            "every" => parse_duration("every", value).map(Schedule::Every),
            "in" => parse_duration("in", value).map(Schedule::In),
            "at" => DateTime::parse_from_rfc3339(value)
                .map(|at| Schedule::At(at.with_timezone(&Utc)))
                .map_err(|e| ScheduleError::Timestamp {
                    value: value.to_owned(),
                    message: e.to_string(),
                }),
            _ => Err(ScheduleError::UnknownKey { key: key.clone() }),
        }
    }

    /// The key this schedule was configured with.
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Cron(_) => "cron",
            Schedule::Every(_) => "every",
            Schedule::In(_) => "in",
            Schedule::At(_) => "at",
        }
    }
}

/// A cron expression bound to the time zone it is evaluated in.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: cron::Schedule,
    zone: Tz,
}

impl CronSchedule {
    /// Parses `[second] minute hour day-of-month month day-of-week [zone]`.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |message: String| ScheduleError::Cron {
            expression: expression.to_owned(),
            message,
        };

        let mut fields: Vec<&str> = expression.split_whitespace().collect();
        let zone = match fields.last().and_then(|last| last.parse::<Tz>().ok()) {
            Some(zone) if fields.len() > 5 => {
                fields.pop();
                zone
            }
            _ => Tz::UTC,
        };

        let normalised = match fields.as_slice() {
            [minute, hour, day, month, weekday] => format!(
                "0 {minute} {hour} {day} {month} {}",
                classic_day_of_week(weekday).map_err(invalid)?
            ),
            [second, minute, hour, day, month, weekday] => format!(
                "{second} {minute} {hour} {day} {month} {}",
                classic_day_of_week(weekday).map_err(invalid)?
            ),
            _ => {
                return Err(invalid(format!(
                    "expected 5 or 6 fields optionally followed by a time zone, found {}",
                    fields.len()
                )))
            }
        };

        let schedule =
            cron::Schedule::from_str(&normalised).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { schedule, zone })
    }

    /// The time zone the expression is evaluated in.
    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// The first matching instant strictly after `from`.
    pub fn after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.zone))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// Rewrites a classic day-of-week field (`0`-`7`, Sunday is `0` or `7`) into
/// the one-based numbering of the `cron` crate (`1`-`7`, Sunday is `1`).
/// Day names pass through unchanged.
fn classic_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let suffix = step.map(|step| format!("/{step}")).unwrap_or_default();

        let Some((start, end)) = base.split_once('-') else {
            items.push(format!("{}{suffix}", day_token(base)?));
            continue;
        };
        match (start.parse::<u8>(), end) {
            (Ok(0), "7") => items.push(format!("1-7{suffix}")),
            // Ranges ending on Sunday wrap in one-based numbering.
            (Ok(first @ 1..=6), "7") => {
                if step.is_some() {
                    return Err(format!(
                        "stepped day-of-week range '{item}' ending on 7 is not supported"
                    ));
                }
                items.push(format!("{}-7", first + 1));
                items.push("1".to_owned());
            }
            _ => items.push(format!("{}-{}{suffix}", day_token(start)?, day_token(end)?)),
        }
    }
    Ok(items.join(","))
}

fn day_token(token: &str) -> Result<String, String> {
    match token.parse::<u8>() {
        Ok(0 | 7) => Ok("1".to_owned()),
        Ok(day @ 1..=6) => Ok((day + 1).to_string()),
        Ok(day) => Err(format!("day of week {day} is out of range 0-7")),
        Err(_) => Ok(token.to_owned()),
    }
}

fn parse_duration(kind: &'static str, value: &str) -> Result<Duration, ScheduleError> {
    let invalid = |message: String| ScheduleError::Duration {
        kind,
        value: value.to_owned(),
        message,
    };
    let duration = humantime::parse_duration(value).map_err(|e| invalid(e.to_string()))?;
    if duration.is_zero() {
        return Err(invalid("duration must be greater than zero".into()));
    }
    Ok(duration)
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Fires cycles according to a [`Schedule`].
#[derive(Debug, Clone)]
pub struct Trigger {
    schedule: Schedule,
    armed_at: DateTime<Utc>,
}

impl Trigger {
    /// Arms `schedule` now.
    pub fn new(schedule: Schedule) -> Self {
        Self::armed_at(schedule, Utc::now())
    }

    /// Arms `schedule` as of `armed_at`; `in` delays are measured from it.
    pub fn armed_at(schedule: Schedule, armed_at: DateTime<Utc>) -> Self {
        Self { schedule, armed_at }
    }

    /// The next firing at or after `now`, given the previous firing `last`.
    /// `None` means the schedule is exhausted.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        last: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match (&self.schedule, last) {
            (Schedule::Cron(schedule), last) => {
                schedule.after(last.map_or(now, |last| last.max(now)))
            }
            (Schedule::Every(_), None) => Some(now),
            (Schedule::Every(interval), Some(last)) => {
                let interval = chrono::Duration::from_std(*interval).ok()?;
                Some((last + interval).max(now))
            }
            (Schedule::In(delay), None) => {
                let delay = chrono::Duration::from_std(*delay).ok()?;
                Some((self.armed_at + delay).max(now))
            }
            (Schedule::At(at), None) => Some((*at).max(now)),
            (Schedule::In(_) | Schedule::At(_), Some(_)) => None,
        }
    }

    /// Runs `cycle` at every firing until the schedule is exhausted or
    /// `shutdown` resolves. A cycle in progress when `shutdown` resolves is
    /// dropped.
    pub async fn run<F, Fut>(&self, mut cycle: F, shutdown: impl Future<Output = ()>)
    where
        F: FnMut() -> Fut,
        Fut: Future,
    {
        tokio::pin!(shutdown);
        let mut last = None;
        info!(schedule = self.schedule.kind(), "trigger armed");

        loop {
            let now = Utc::now();
            let Some(fire_at) = self.next_fire(now, last) else {
                info!(schedule = self.schedule.kind(), "schedule exhausted");
                return;
            };
            let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            debug!(%fire_at, delay_ms = delay.as_millis() as u64, "next cycle scheduled");

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("shutdown requested; trigger stopped");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            last = Some(fire_at);
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("shutdown requested during cycle; trigger stopped");
                    return;
                }
                _ = cycle() => {}
            }
        }
    }
}
