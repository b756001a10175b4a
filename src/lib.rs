//! Medalert: medication reminder scheduling engine.
//!
//! Turns medication schedules into concrete, uniquely identified alert
//! instances and keeps the platform's alert primitives in sync with them:
//!
//! - **Expansion**: a schedule's recurrence becomes trigger instants over a
//!   bounded look-ahead window
//! - **Identity**: each instant maps to a deterministic 32-bit-safe id
//! - **Delivery**: instances go to exact wake alarms, interactive
//!   notifications, or in-process timers, whichever the platform offers
//! - **Reconciliation**: every schedule mutation cancels and recreates that
//!   schedule's alerts
//! - **Actions**: taken / snooze / skip responses update stock and history

pub mod alerts;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod host;
pub mod schedule;
pub mod stats;
pub mod store;

pub use alerts::{AlertAction, AlertChannels, ScheduleOutcome, ScheduleReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ActionOutcome, AlertEngine, StartupReport};
pub use error::{EngineError, Result};
pub use schedule::{
    AlertTime, ChannelPreference, DosageEvent, DosageUnit, DoseOutcome, MedicationSchedule,
    RecurrenceRule, TimeSlot,
};
pub use store::{JsonFileStore, MemoryStore, ScheduleStore};
