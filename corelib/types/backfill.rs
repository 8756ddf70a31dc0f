//! A bounded, replayable set of triggers for historical (or future, with
//! `allow_future`) partitions, driven by the backfill engine (C8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::workflow::WorkflowId;
use crate::ids::BackfillId;
use crate::schedule::Schedule;
use crate::validation::validate_schedule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backfill {
    pub id: BackfillId,
    pub workflow_id: WorkflowId,
    /// Inclusive.
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    pub schedule: Schedule,
    pub concurrency: usize,
    pub next_trigger: DateTime<Utc>,
    pub description: Option<String>,
    pub reverse: bool,
    pub all_triggered: bool,
    pub halted: bool,
    pub trigger_parameters: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Backfill {
    /// True iff the cursor has crossed the bound for this backfill's
    /// direction — forward crosses `end`, reverse crosses below `start`.
    pub fn cursor_exhausted(&self) -> bool {
        if self.reverse {
            self.next_trigger < self.start
        } else {
            self.next_trigger >= self.end
        }
    }

    pub fn advance_cursor(&mut self) {
        self.next_trigger = if self.reverse {
            self.schedule.previous(self.next_trigger)
        } else {
            self.schedule.next(self.next_trigger)
        };
        if self.cursor_exhausted() {
            self.all_triggered = true;
        }
    }

    pub fn is_runnable(&self) -> bool {
        !self.halted && !self.all_triggered
    }
}

/// Request body for creating a backfill — validated before
/// [`Backfill`] construction (spec.md §4.8.1).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BackfillInput {
    pub component: String,
    pub workflow_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[validate(custom = "validate_schedule")]
    pub schedule: Schedule,
    #[validate(range(min = 1))]
    pub concurrency: usize,
    pub description: Option<String>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub allow_future: bool,
    pub trigger_parameters: Option<serde_json::Value>,
}

/// Fields an operator may edit on an existing backfill: concurrency and
/// description only — the time range and direction are immutable once the
/// cursor has started moving.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditableBackfillInput {
    #[validate(range(min = 1))]
    pub concurrency: Option<usize>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn forward_backfill() -> Backfill {
        Backfill {
            id: BackfillId::generate(),
            workflow_id: WorkflowId::new("demo", "wf"),
            start: dt("2020-01-01T00:00:00Z"),
            end: dt("2020-01-05T00:00:00Z"),
            schedule: Schedule::Days,
            concurrency: 2,
            next_trigger: dt("2020-01-01T00:00:00Z"),
            description: None,
            reverse: false,
            all_triggered: false,
            halted: false,
            trigger_parameters: None,
            created_at: dt("2020-01-01T00:00:00Z"),
        }
    }

    #[test]
    fn forward_cursor_marks_all_triggered_at_end() {
        let mut backfill = forward_backfill();
        for _ in 0..4 {
            assert!(!backfill.all_triggered);
            backfill.advance_cursor();
        }
        assert!(backfill.all_triggered);
        assert_eq!(backfill.next_trigger, backfill.end);
    }

    #[test]
    fn reverse_cursor_ends_below_start() {
        let mut backfill = forward_backfill();
        backfill.reverse = true;
        backfill.next_trigger = dt("2020-01-04T00:00:00Z");
        for _ in 0..4 {
            backfill.advance_cursor();
        }
        assert!(backfill.all_triggered);
        assert!(backfill.next_trigger < backfill.start);
    }

    #[test]
    fn halted_backfill_is_not_runnable() {
        let mut backfill = forward_backfill();
        backfill.halted = true;
        assert!(!backfill.is_runnable());
    }
}
