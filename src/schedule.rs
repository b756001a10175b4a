//! Medication schedule model.
//!
//! A [`MedicationSchedule`] is the user's description of one tracked
//! medication: what to take, when to be reminded, how the reminder is
//! delivered, and how much stock is left. It exclusively owns the stock
//! counters and the recurrence rule; every alert the engine registers is
//! derived from it.
//!
//! [`DosageEvent`] is the append-only history record written when the user
//! answers a dose alert.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Wall-clock time of day at which a dose alert fires (`HH:MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlertTime {
    hour: u8,
    minute: u8,
}

impl AlertTime {
    /// Build an alert time, rejecting out-of-range components.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(EngineError::Validation(format!(
                "alert time {hour:02}:{minute:02} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Hour of day (0-23).
    #[must_use]
    pub fn hour(self) -> u8 {
        self.hour
    }

    /// Minute of hour (0-59).
    #[must_use]
    pub fn minute(self) -> u8 {
        self.minute
    }

    /// Convert to a chrono time at second zero.
    #[must_use]
    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or_default()
    }
}

impl fmt::Display for AlertTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for AlertTime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EngineError::Validation(format!("invalid alert time {s:?}, expected HH:MM"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for AlertTime {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AlertTime> for String {
    fn from(value: AlertTime) -> Self {
        value.to_string()
    }
}

/// How intrusive the user wants the reminder to be.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPreference {
    /// A regular interactive notification.
    #[default]
    #[serde(alias = "notification")]
    Silent,
    /// A full-screen wake alarm where the platform supports one.
    Alarm,
}

impl ChannelPreference {
    /// Notification priority handed to the interactive notification channel.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Silent => 1,
            Self::Alarm => 2,
        }
    }
}

/// Recurrence of a medication's dose alerts.
///
/// Rules that count days (`EveryOtherDay`, `EveryNDays`, `Weekly`, `Monthly`)
/// are measured from the schedule's anchor date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every day.
    Daily,
    /// Every second day starting on the anchor date.
    EveryOtherDay,
    /// Every `n` days starting on the anchor date.
    EveryNDays {
        /// Interval in days (at least 1).
        n: u32,
    },
    /// Only on the listed weekdays.
    SpecificWeekdays {
        /// Weekdays on which a dose is due.
        days: Vec<Weekday>,
    },
    /// Once a week, on the anchor date's weekday.
    Weekly,
    /// Once a month, on the anchor date's day of month (clamped to month end).
    Monthly,
    /// Taken on demand; never produces timed alerts.
    AsNeeded,
}

impl RecurrenceRule {
    /// Returns `false` for rules that never produce timed alerts.
    #[must_use]
    pub fn is_timed(&self) -> bool {
        !matches!(self, Self::AsNeeded)
    }

    /// Returns `true` when a dose is due on `date` for a rule anchored at `anchor`.
    #[must_use]
    pub fn occurs_on(&self, anchor: NaiveDate, date: NaiveDate) -> bool {
        if date < anchor {
            return false;
        }
        let elapsed = (date - anchor).num_days();
        match self {
            Self::Daily => true,
            Self::EveryOtherDay => elapsed % 2 == 0,
            Self::EveryNDays { n } => elapsed % i64::from((*n).max(1)) == 0,
            Self::SpecificWeekdays { days } => days.contains(&date.weekday()),
            Self::Weekly => date.weekday() == anchor.weekday(),
            Self::Monthly => date.day() == anchor.day().min(days_in_month(date.year(), date.month())),
            Self::AsNeeded => false,
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::EveryOtherDay => f.write_str("every other day"),
            Self::EveryNDays { n } => write!(f, "every {n} days"),
            Self::SpecificWeekdays { days } => {
                let names: Vec<String> = days.iter().map(ToString::to_string).collect();
                write!(f, "on {}", names.join(", "))
            }
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::AsNeeded => f.write_str("as needed"),
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

/// Unit a dose is measured in.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DosageUnit {
    #[default]
    Tablet,
    #[serde(alias = "ml")]
    Milliliter,
    #[serde(alias = "drops")]
    Drop,
    Other(String),
}

impl fmt::Display for DosageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tablet => f.write_str("tablet"),
            Self::Milliliter => f.write_str("ml"),
            Self::Drop => f.write_str("drops"),
            Self::Other(unit) => f.write_str(unit),
        }
    }
}

/// Part of the day a schedule's alert falls in, used to group schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    /// 04:00 - 12:00.
    Morning,
    /// 12:00 - 16:00.
    Afternoon,
    /// 16:00 - 19:00.
    Evening,
    /// 19:00 - 04:00.
    Night,
}

impl TimeSlot {
    /// Classify an hour of day.
    #[must_use]
    pub fn for_hour(hour: u8) -> Self {
        match hour {
            4..=11 => Self::Morning,
            12..=15 => Self::Afternoon,
            16..=18 => Self::Evening,
            _ => Self::Night,
        }
    }
}

/// One tracked medication and its reminder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationSchedule {
    /// Opaque stable identifier.
    pub id: String,
    /// Medication name shown in alerts.
    pub name: String,
    /// Who the medication is for (may be empty).
    #[serde(default)]
    pub patient_name: String,
    /// Units taken per dose (at least 1).
    pub dosage_amount: u32,
    #[serde(default)]
    pub dosage_unit: DosageUnit,
    /// Local time of day the alert fires.
    pub alert_time: AlertTime,
    #[serde(default)]
    pub channel_preference: ChannelPreference,
    pub recurrence: RecurrenceRule,
    /// Date day-counting recurrence rules are measured from.
    pub anchor_date: NaiveDate,
    /// Last day (inclusive) on which alerts are produced.
    #[serde(default)]
    pub active_until: Option<NaiveDate>,
    pub current_stock: u32,
    pub total_stock: u32,
    /// Stock level at or below which a refill reminder is raised.
    #[serde(default)]
    pub refill_threshold: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl MedicationSchedule {
    /// Create a daily, single-tablet schedule with one unit in stock.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        alert_time: AlertTime,
        anchor_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            patient_name: String::new(),
            dosage_amount: 1,
            dosage_unit: DosageUnit::Tablet,
            alert_time,
            channel_preference: ChannelPreference::Silent,
            recurrence: RecurrenceRule::Daily,
            anchor_date,
            active_until: None,
            current_stock: 1,
            total_stock: 1,
            refill_threshold: 1,
            notes: None,
            color: None,
        }
    }

    #[must_use]
    pub fn with_patient(mut self, patient_name: impl Into<String>) -> Self {
        self.patient_name = patient_name.into();
        self
    }

    #[must_use]
    pub fn with_dosage(mut self, amount: u32, unit: DosageUnit) -> Self {
        self.dosage_amount = amount;
        self.dosage_unit = unit;
        self
    }

    #[must_use]
    pub fn with_channel(mut self, preference: ChannelPreference) -> Self {
        self.channel_preference = preference;
        self
    }

    #[must_use]
    pub fn with_recurrence(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = rule;
        self
    }

    #[must_use]
    pub fn with_active_until(mut self, until: Option<NaiveDate>) -> Self {
        self.active_until = until;
        self
    }

    #[must_use]
    pub fn with_stock(mut self, current: u32, total: u32) -> Self {
        self.current_stock = current;
        self.total_stock = total;
        self
    }

    #[must_use]
    pub fn with_refill_threshold(mut self, threshold: u32) -> Self {
        self.refill_threshold = threshold;
        self
    }

    /// Check the model invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("schedule id cannot be empty".to_owned()));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "schedule {} has an empty medication name",
                self.id
            )));
        }
        if self.dosage_amount == 0 {
            return Err(EngineError::Validation(format!(
                "schedule {} has a zero dosage amount",
                self.id
            )));
        }
        if self.current_stock > self.total_stock {
            return Err(EngineError::Validation(format!(
                "schedule {} has current stock {} above total stock {}",
                self.id, self.current_stock, self.total_stock
            )));
        }
        match &self.recurrence {
            RecurrenceRule::EveryNDays { n } if *n == 0 => Err(EngineError::Validation(format!(
                "schedule {} repeats every 0 days",
                self.id
            ))),
            RecurrenceRule::SpecificWeekdays { days } if days.is_empty() => {
                Err(EngineError::Validation(format!(
                    "schedule {} has no weekdays selected",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    /// Returns `true` if alerts may still be produced on `date`.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.active_until.is_none_or(|until| date <= until)
    }

    /// Returns `true` when a dose is due on `date`.
    #[must_use]
    pub fn is_due_on(&self, date: NaiveDate) -> bool {
        self.is_active_on(date) && self.recurrence.occurs_on(self.anchor_date, date)
    }

    /// Record one dose taken; stock is floored at zero. Returns the new stock.
    pub fn take_dose(&mut self) -> u32 {
        self.current_stock = self.current_stock.saturating_sub(self.dosage_amount);
        self.current_stock
    }

    /// Add `amount` units to both the current and the total stock.
    pub fn refill(&mut self, amount: u32) {
        self.current_stock = self.current_stock.saturating_add(amount);
        self.total_stock = self.total_stock.saturating_add(amount);
    }

    #[must_use]
    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.refill_threshold
    }

    #[must_use]
    pub fn is_out_of_stock(&self) -> bool {
        self.current_stock == 0
    }

    #[must_use]
    pub fn time_slot(&self) -> TimeSlot {
        TimeSlot::for_hour(self.alert_time.hour())
    }

    /// Human-readable dose, e.g. `"2 tablet"`.
    #[must_use]
    pub fn dosage_label(&self) -> String {
        format!("{} {}", self.dosage_amount, self.dosage_unit)
    }

    /// Title used for dose alerts.
    #[must_use]
    pub fn alert_title(&self) -> String {
        format!("Pill Reminder: {}", self.name)
    }

    /// Body used for dose alerts.
    #[must_use]
    pub fn alert_body(&self) -> String {
        if self.patient_name.trim().is_empty() {
            format!("Time to take {}", self.dosage_label())
        } else {
            format!("Time to take {} for {}", self.dosage_label(), self.patient_name)
        }
    }
}

/// Generate a fresh numeric schedule id from the current epoch milliseconds.
///
/// Numeric ids keep the identity allocator's digit extraction meaningful.
#[must_use]
pub fn generate_schedule_id() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// How the user answered a dose alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseOutcome {
    Taken,
    Skipped,
}

/// Immutable history record of one answered dose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosageEvent {
    pub schedule_id: String,
    pub medication_name: String,
    pub amount: u32,
    pub taken_at: DateTime<Utc>,
    pub outcome: DoseOutcome,
}
