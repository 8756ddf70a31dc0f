//! The closed set of partitioning schedules a [`crate::types::workflow::Workflow`]
//! can use (spec.md §3), and the alignment/stepping arithmetic the Trigger
//! Manager (C7) and Backfill engine (C8) need.
//!
//! Grounded on the teacher's `lib/types/trigger.rs::Recurring` (cron string
//! + timezone) for the `Cron` variant, using the same `cron` crate, minus
//! its per-schedule timezone (this core runs everything in UTC); the
//! calendar variants (`Hours`..`Years`) have no direct teacher counterpart
//! so they're implemented directly against `chrono`.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use cron::Schedule as CronExpr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
    Cron(String),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}

impl Schedule {
    fn cron_expr(raw: &str) -> Result<CronExpr, ScheduleError> {
        CronExpr::from_str(raw).map_err(|e| ScheduleError::InvalidCron(e.to_string()))
    }

    /// True iff `instant` equals the start of some partition under this
    /// schedule.
    pub fn is_aligned(&self, instant: DateTime<Utc>) -> bool {
        match self {
            | Schedule::Hours => {
                instant.minute() == 0 && instant.second() == 0 && instant.nanosecond() == 0
            }
            | Schedule::Days => {
                instant.hour() == 0
                    && instant.minute() == 0
                    && instant.second() == 0
                    && instant.nanosecond() == 0
            }
            | Schedule::Weeks => {
                self.is_aligned_for(&Schedule::Days, instant)
                    && instant.weekday() == chrono::Weekday::Mon
            }
            | Schedule::Months => {
                self.is_aligned_for(&Schedule::Days, instant) && instant.day() == 1
            }
            | Schedule::Years => {
                self.is_aligned_for(&Schedule::Days, instant)
                    && instant.day() == 1
                    && instant.month() == 1
            }
            | Schedule::Cron(raw) => {
                let Ok(expr) = Self::cron_expr(raw) else { return false };
                instant.nanosecond() == 0
                    && expr
                        .after(&(instant - Duration::seconds(1)))
                        .next()
                        .is_some_and(|next| next == instant)
            }
        }
    }

    fn is_aligned_for(&self, other: &Schedule, instant: DateTime<Utc>) -> bool {
        other.is_aligned(instant)
    }

    /// Canonical textual rendering of a partition instant for this schedule,
    /// used as a [`crate::types::instance::WorkflowInstance`] parameter.
    pub fn param(&self, instant: DateTime<Utc>) -> String {
        match self {
            | Schedule::Hours => instant.format("%Y-%m-%dT%H").to_string(),
            | Schedule::Days | Schedule::Weeks | Schedule::Months | Schedule::Years => {
                instant.format("%Y-%m-%d").to_string()
            }
            | Schedule::Cron(_) => instant.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    /// The next aligned instant strictly after `instant`.
    pub fn next(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            | Schedule::Hours => instant + Duration::hours(1),
            | Schedule::Days => instant + Duration::days(1),
            | Schedule::Weeks => instant + Duration::weeks(1),
            | Schedule::Months => add_months(instant, 1),
            | Schedule::Years => add_months(instant, 12),
            | Schedule::Cron(raw) => {
                let expr = Self::cron_expr(raw).expect("validated at workflow registration");
                expr.after(&instant)
                    .next()
                    .expect("cron schedule must have a next occurrence")
            }
        }
    }

    /// The aligned instant strictly before `instant`.
    pub fn previous(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            | Schedule::Hours => instant - Duration::hours(1),
            | Schedule::Days => instant - Duration::days(1),
            | Schedule::Weeks => instant - Duration::weeks(1),
            | Schedule::Months => add_months(instant, -1),
            | Schedule::Years => add_months(instant, -12),
            | Schedule::Cron(raw) => {
                let expr = Self::cron_expr(raw).expect("validated at workflow registration");
                // `cron` only iterates forward; walk backward from a bounded
                // lookback window and keep the last occurrence before `instant`.
                let lookback = instant - Duration::days(366);
                expr.after(&lookback)
                    .take_while(|t| *t < instant)
                    .last()
                    .expect("cron schedule must have had a prior occurrence within a year")
            }
        }
    }

    /// The first aligned instant at or after `now` — used to initialize
    /// `nextNaturalTrigger` on workflow registration (spec.md §4.7).
    pub fn first_aligned_at_or_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_aligned(now) {
            return now;
        }
        match self {
            | Schedule::Hours => {
                let truncated = Utc
                    .with_ymd_and_hms(now.year(), now.month(), now.day(), now.hour(), 0, 0)
                    .unwrap();
                self.next(truncated)
            }
            | Schedule::Days | Schedule::Weeks | Schedule::Months | Schedule::Years => {
                let truncated = Utc
                    .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
                    .unwrap();
                let mut candidate = truncated;
                while !self.is_aligned(candidate) {
                    candidate = self.next(candidate);
                }
                if candidate < now {
                    self.next(candidate)
                } else {
                    candidate
                }
            }
            | Schedule::Cron(raw) => {
                let expr = Self::cron_expr(raw).expect("validated at workflow registration");
                expr.after(&(now - Duration::seconds(1)))
                    .next()
                    .expect("cron schedule must have an upcoming occurrence")
            }
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if let Schedule::Cron(raw) = self {
            Self::cron_expr(raw)?;
        }
        Ok(())
    }
}

fn add_months(instant: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let total = instant.month0() as i32 + months;
    let year = instant.year() + total.div_euclid(12);
    let month0 = total.rem_euclid(12);
    Utc.with_ymd_and_hms(year, month0 as u32 + 1, 1, 0, 0, 0)
        .single()
        .expect("valid calendar month")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn days_alignment_and_param() {
        let days = Schedule::Days;
        let aligned = dt("2020-01-01T00:00:00Z");
        assert!(days.is_aligned(aligned));
        assert!(!days.is_aligned(dt("2020-01-01T03:15:00Z")));
        assert_eq!(days.param(aligned), "2020-01-01");
        assert_eq!(days.next(aligned), dt("2020-01-02T00:00:00Z"));
        assert_eq!(days.previous(aligned), dt("2019-12-31T00:00:00Z"));
    }

    #[test]
    fn hours_param_format() {
        let hours = Schedule::Hours;
        assert_eq!(hours.param(dt("2017-01-02T03:00:00Z")), "2017-01-02T03");
    }

    #[test]
    fn months_rolls_year_boundary() {
        let months = Schedule::Months;
        assert_eq!(months.next(dt("2020-12-01T00:00:00Z")), dt("2021-01-01T00:00:00Z"));
        assert_eq!(months.previous(dt("2020-01-01T00:00:00Z")), dt("2019-12-01T00:00:00Z"));
    }

    #[test]
    fn first_aligned_truncates_forward() {
        let days = Schedule::Days;
        let now = dt("2020-01-01T12:30:00Z");
        assert_eq!(days.first_aligned_at_or_after(now), dt("2020-01-02T00:00:00Z"));
    }

    #[test]
    fn cron_schedule_next_and_alignment() {
        let sched = Schedule::Cron("0 0 * * * *".to_string());
        sched.validate().unwrap();
        let aligned = dt("2020-01-01T05:00:00Z");
        assert!(sched.is_aligned(aligned));
        assert_eq!(sched.next(aligned), dt("2020-01-01T06:00:00Z"));
        assert_eq!(sched.previous(aligned), dt("2020-01-01T04:00:00Z"));
    }
}
