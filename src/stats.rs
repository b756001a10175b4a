//! Dosage history queries and adherence statistics.

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::schedule::{DosageEvent, DoseOutcome, MedicationSchedule};

/// Number of days, today included, covered by [`weekly_adherence`].
pub const ADHERENCE_DAYS: u64 = 7;

/// Label used to group schedules without a patient name.
pub const UNKNOWN_PATIENT: &str = "Unknown Patient";

/// Taken-versus-expected doses over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdherenceStats {
    pub taken: u32,
    pub skipped: u32,
    /// Doses the recurrence rules called for in the window.
    pub expected: u32,
    /// `taken / expected` as a rounded percentage; 0 when nothing was expected.
    pub rate_percent: u32,
}

/// Adherence over the seven days ending on `now`'s local date.
///
/// Expected doses come from expanding each schedule's recurrence over the
/// window, so as-needed schedules never count as expected.
pub fn weekly_adherence<Tz: TimeZone>(
    schedules: &[MedicationSchedule],
    history: &[DosageEvent],
    now: &DateTime<Tz>,
) -> AdherenceStats {
    let today = now.date_naive();
    let start = today
        .checked_sub_days(Days::new(ADHERENCE_DAYS - 1))
        .unwrap_or(today);
    let tz = now.timezone();

    let expected: u32 = schedules
        .iter()
        .map(|schedule| {
            start
                .iter_days()
                .take_while(|day| *day <= today)
                .filter(|day| schedule.is_due_on(*day))
                .count()
        })
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .fold(0, u32::saturating_add);

    let mut taken = 0_u32;
    let mut skipped = 0_u32;
    for event in history {
        let day = event.taken_at.with_timezone(&tz).date_naive();
        if day < start || day > today {
            continue;
        }
        match event.outcome {
            DoseOutcome::Taken => taken += 1,
            DoseOutcome::Skipped => skipped += 1,
        }
    }

    AdherenceStats {
        taken,
        skipped,
        expected,
        rate_percent: rounded_percent(taken, expected),
    }
}

fn rounded_percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    let part = u64::from(part) * 100;
    let whole = u64::from(whole);
    u32::try_from((part + whole / 2) / whole).unwrap_or(u32::MAX)
}

/// Events whose local date in `tz` is `date`, newest first.
pub fn events_on<'a, Tz: TimeZone>(
    history: &'a [DosageEvent],
    date: NaiveDate,
    tz: &Tz,
) -> Vec<&'a DosageEvent> {
    let mut events: Vec<&DosageEvent> = history
        .iter()
        .filter(|e| e.taken_at.with_timezone(tz).date_naive() == date)
        .collect();
    events.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
    events
}

/// Schedules grouped by patient name, each group ordered by alert time.
pub fn schedules_by_patient(
    schedules: &[MedicationSchedule],
) -> BTreeMap<String, Vec<&MedicationSchedule>> {
    let mut groups: BTreeMap<String, Vec<&MedicationSchedule>> = BTreeMap::new();
    for schedule in schedules {
        let patient = schedule.patient_name.trim();
        let key = if patient.is_empty() {
            UNKNOWN_PATIENT.to_owned()
        } else {
            patient.to_owned()
        };
        groups.entry(key).or_default().push(schedule);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|s| s.alert_time);
    }
    groups
}
