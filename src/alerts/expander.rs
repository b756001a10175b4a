//! Occurrence expansion.
//!
//! Turns a schedule's recurrence into the concrete trigger instants that fall
//! inside a bounded lookahead window. Expansion is pure: it reads the
//! schedule and an explicit `now`, never a clock, and produces the same
//! sequence every time it is asked.

use chrono::{DateTime, Days, NaiveDate, TimeDelta, TimeZone, Utc};

use crate::schedule::{AlertTime, MedicationSchedule, RecurrenceRule};

/// Bounds applied to one expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionWindow {
    /// Number of calendar days examined, starting with today.
    pub lookahead_days: u32,
    /// Candidates closer to `now` than this are suppressed.
    pub min_future_lag: TimeDelta,
}

impl ExpansionWindow {
    #[must_use]
    pub fn new(lookahead_days: u32, min_future_lag: TimeDelta) -> Self {
        Self {
            lookahead_days,
            min_future_lag,
        }
    }
}

/// One trigger instant produced by expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Days after `now`'s calendar date (0 = today).
    pub day_offset: u32,
    /// Local calendar date of the trigger.
    pub date: NaiveDate,
    pub trigger_at: DateTime<Utc>,
}

/// Lazy, restartable sequence of occurrences for one schedule.
///
/// Cloning the iterator restarts nothing; clone before consuming to obtain a
/// second pass over the same window.
#[derive(Debug, Clone)]
pub struct Occurrences<Tz: TimeZone> {
    rule: RecurrenceRule,
    anchor: NaiveDate,
    alert_time: AlertTime,
    active_until: Option<NaiveDate>,
    now: DateTime<Tz>,
    window: ExpansionWindow,
    next_offset: u32,
    finished: bool,
}

/// Expand `schedule` into its trigger instants within `window`, as seen at `now`.
///
/// Local date and time are resolved in `now`'s time zone. A local time that
/// does not exist on a given day (a daylight-saving gap) produces no
/// occurrence for that day; an ambiguous one resolves to the earlier instant.
pub fn expand<Tz: TimeZone>(
    schedule: &MedicationSchedule,
    now: &DateTime<Tz>,
    window: &ExpansionWindow,
) -> Occurrences<Tz> {
    Occurrences {
        rule: schedule.recurrence.clone(),
        anchor: schedule.anchor_date,
        alert_time: schedule.alert_time,
        active_until: schedule.active_until,
        now: now.clone(),
        window: *window,
        next_offset: 0,
        finished: !schedule.recurrence.is_timed(),
    }
}

impl<Tz: TimeZone> Iterator for Occurrences<Tz> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        while !self.finished && self.next_offset < self.window.lookahead_days {
            let day_offset = self.next_offset;
            self.next_offset += 1;

            let Some(date) = self
                .now
                .date_naive()
                .checked_add_days(Days::new(u64::from(day_offset)))
            else {
                self.finished = true;
                break;
            };
            if self.active_until.is_some_and(|until| date > until) {
                self.finished = true;
                break;
            }
            if !self.rule.occurs_on(self.anchor, date) {
                continue;
            }

            let local = date.and_time(self.alert_time.to_naive_time());
            let Some(trigger) = self.now.timezone().from_local_datetime(&local).earliest() else {
                continue;
            };
            if trigger.clone().signed_duration_since(self.now.clone()) < self.window.min_future_lag {
                continue;
            }

            return Some(Occurrence {
                day_offset,
                date,
                trigger_at: trigger.with_timezone(&Utc),
            });
        }
        None
    }
}
