//! Persistence for schedules, dosage history and notification records.
//!
//! [`JsonFileStore`] keeps three files under one directory:
//!
//! - `schedules.json`: versioned schedule list
//! - `history.jsonl`: append-only dosage events, one JSON object per line
//! - `notifications.json`: versioned notification record list
//!
//! A missing file reads as empty. [`MemoryStore`] keeps the same data in
//! memory for tests.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::alerts::NotificationRecord;
use crate::error::{EngineError, Result};
use crate::schedule::{DosageEvent, MedicationSchedule};

const STATE_VERSION: u8 = 1;

/// Storage collaborator of the engine.
pub trait ScheduleStore: Send + Sync {
    fn load_schedules(&self) -> Result<Vec<MedicationSchedule>>;
    fn save_schedules(&self, schedules: &[MedicationSchedule]) -> Result<()>;
    fn append_history(&self, event: &DosageEvent) -> Result<()>;
    fn load_history(&self) -> Result<Vec<DosageEvent>>;
    fn load_notifications(&self) -> Result<Vec<NotificationRecord>>;
    fn save_notifications(&self, records: &[NotificationRecord]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct SchedulesFile {
    #[serde(default = "state_version")]
    version: u8,
    #[serde(default)]
    schedules: Vec<MedicationSchedule>,
}

#[derive(Serialize, Deserialize)]
struct NotificationsFile {
    #[serde(default = "state_version")]
    version: u8,
    #[serde(default)]
    records: Vec<NotificationRecord>,
}

fn state_version() -> u8 {
    STATE_VERSION
}

/// File-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under [`crate::app_dirs::data_dir`].
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(crate::app_dirs::data_dir())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn schedules_path(&self) -> PathBuf {
        self.root.join("schedules.json")
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    fn notifications_path(&self) -> PathBuf {
        self.root.join("notifications.json")
    }

    fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| EngineError::Storage(format!("cannot create store dir: {e}")))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::Storage(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::Storage(format!("cannot serialize {}: {e}", path.display())))?;
    std::fs::write(path, json)
        .map_err(|e| EngineError::Storage(format!("cannot write {}: {e}", path.display())))
}

impl ScheduleStore for JsonFileStore {
    fn load_schedules(&self) -> Result<Vec<MedicationSchedule>> {
        let path = self.schedules_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(Vec::new());
        };
        let file: SchedulesFile = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Storage(format!("cannot parse schedules: {e}")))?;
        Ok(file.schedules)
    }

    fn save_schedules(&self, schedules: &[MedicationSchedule]) -> Result<()> {
        self.ensure_root()?;
        write_json(
            &self.schedules_path(),
            &SchedulesFile {
                version: STATE_VERSION,
                schedules: schedules.to_vec(),
            },
        )
    }

    fn append_history(&self, event: &DosageEvent) -> Result<()> {
        self.ensure_root()?;
        let line = serde_json::to_string(event)
            .map_err(|e| EngineError::Storage(format!("cannot serialize dosage event: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .map_err(|e| EngineError::Storage(format!("cannot open history: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| EngineError::Storage(format!("cannot append history: {e}")))
    }

    fn load_history(&self) -> Result<Vec<DosageEvent>> {
        let Some(bytes) = read_optional(&self.history_path())? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut events = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(line = index + 1, error = %e, "skipping corrupt history line"),
            }
        }
        Ok(events)
    }

    fn load_notifications(&self) -> Result<Vec<NotificationRecord>> {
        let Some(bytes) = read_optional(&self.notifications_path())? else {
            return Ok(Vec::new());
        };
        let file: NotificationsFile = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Storage(format!("cannot parse notifications: {e}")))?;
        Ok(file.records)
    }

    fn save_notifications(&self, records: &[NotificationRecord]) -> Result<()> {
        self.ensure_root()?;
        write_json(
            &self.notifications_path(),
            &NotificationsFile {
                version: STATE_VERSION,
                records: records.to_vec(),
            },
        )
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    schedules: Vec<MedicationSchedule>,
    history: Vec<DosageEvent>,
    notifications: Vec<NotificationRecord>,
    fail_history: bool,
}

/// An in-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `schedules`.
    pub fn with_schedules(schedules: Vec<MedicationSchedule>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                schedules,
                ..MemoryState::default()
            }),
        }
    }

    /// Make every history append fail until reset.
    pub fn fail_history_appends(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_history = fail;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::Storage("memory store lock poisoned".to_owned()))
    }
}

impl ScheduleStore for MemoryStore {
    fn load_schedules(&self) -> Result<Vec<MedicationSchedule>> {
        Ok(self.lock()?.schedules.clone())
    }

    fn save_schedules(&self, schedules: &[MedicationSchedule]) -> Result<()> {
        self.lock()?.schedules = schedules.to_vec();
        Ok(())
    }

    fn append_history(&self, event: &DosageEvent) -> Result<()> {
        let mut state = self.lock()?;
        if state.fail_history {
            return Err(EngineError::Storage("history append refused".to_owned()));
        }
        state.history.push(event.clone());
        Ok(())
    }

    fn load_history(&self) -> Result<Vec<DosageEvent>> {
        Ok(self.lock()?.history.clone())
    }

    fn load_notifications(&self) -> Result<Vec<NotificationRecord>> {
        Ok(self.lock()?.notifications.clone())
    }

    fn save_notifications(&self, records: &[NotificationRecord]) -> Result<()> {
        self.lock()?.notifications = records.to_vec();
        Ok(())
    }
}
