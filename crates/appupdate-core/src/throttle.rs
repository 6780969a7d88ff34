use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// How often a detected update is surfaced: every Nth positive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ShowEvery(u64);

impl ShowEvery {
    pub const ALWAYS: Self = Self(1);

    /// # Errors
    /// Returns [`UpdateError::InvalidSourceConfig`] for zero or negative
    /// intervals.
    pub fn new(times: i64) -> Result<Self, UpdateError> {
        match u64::try_from(times) {
            Ok(times) if times > 0 => Ok(Self(times)),
            _ => Err(UpdateError::invalid_config(format!(
                "show_every must be at least 1, got {times}"
            ))),
        }
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for ShowEvery {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl<'de> Deserialize<'de> for ShowEvery {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Whether the positive check numbered `successful_checks` (counted before
/// this check is recorded) should be shown.
#[must_use]
pub fn is_able_to_show(successful_checks: u64, show_every: ShowEvery) -> bool {
    successful_checks % show_every.get() == 0
}

/// Durable home of the successful-check counter.
///
/// `increment` must be atomic with respect to every other user of the same
/// store.
pub trait ThrottleStore: Send + Sync {
    /// # Errors
    /// Returns [`UpdateError::Storage`] when the counter cannot be read.
    fn get(&self) -> Result<u64, UpdateError>;

    /// # Errors
    /// Returns [`UpdateError::Storage`] when the counter cannot be written.
    fn set(&self, successful_checks: u64) -> Result<(), UpdateError>;

    /// Advance the counter by one and return the value it had before.
    ///
    /// # Errors
    /// Returns [`UpdateError::Storage`] when the counter cannot be read or
    /// written; the counter is left unchanged in that case.
    fn increment(&self) -> Result<u64, UpdateError>;
}

#[derive(Debug, Default)]
pub struct MemoryThrottleStore {
    successful_checks: Mutex<u64>,
}

impl MemoryThrottleStore {
    #[must_use]
    pub fn new(successful_checks: u64) -> Self {
        Self {
            successful_checks: Mutex::new(successful_checks),
        }
    }
}

impl ThrottleStore for MemoryThrottleStore {
    fn get(&self) -> Result<u64, UpdateError> {
        Ok(*self
            .successful_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn set(&self, successful_checks: u64) -> Result<(), UpdateError> {
        *self
            .successful_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = successful_checks;
        Ok(())
    }

    fn increment(&self) -> Result<u64, UpdateError> {
        let mut guard = self
            .successful_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = *guard;
        *guard = previous.saturating_add(1);
        Ok(previous)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ThrottleState {
    successful_checks: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// JSON file store guarded by an advisory lock on a sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct FileThrottleStore {
    path: PathBuf,
}

impl FileThrottleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn lock(&self, exclusive: bool) -> Result<File, UpdateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(file)
    }

    fn read_state(&self) -> Result<ThrottleState, UpdateError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ThrottleState::default());
            }
            Err(error) => return Err(error.into()),
        };

        serde_json::from_str(&data).map_err(|error| {
            UpdateError::storage(format!(
                "corrupt throttle state in {}: {error}",
                self.path.display()
            ))
        })
    }

    fn write_state(&self, successful_checks: u64) -> Result<(), UpdateError> {
        let state = ThrottleState {
            successful_checks,
            updated_at: Some(Utc::now()),
        };
        let data = serde_json::to_vec_pretty(&state)
            .map_err(|error| UpdateError::storage(error.to_string()))?;
        write_atomic(&self.path, &data)?;
        debug!(
            "Throttle state saved to {}: {successful_checks} successful checks",
            self.path.display()
        );
        Ok(())
    }
}

impl ThrottleStore for FileThrottleStore {
    fn get(&self) -> Result<u64, UpdateError> {
        let _lock = self.lock(false)?;
        Ok(self.read_state()?.successful_checks)
    }

    fn set(&self, successful_checks: u64) -> Result<(), UpdateError> {
        let _lock = self.lock(true)?;
        self.write_state(successful_checks)
    }

    fn increment(&self) -> Result<u64, UpdateError> {
        let _lock = self.lock(true)?;
        let previous = self.read_state()?.successful_checks;
        self.write_state(previous.saturating_add(1))?;
        Ok(previous)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("throttle");
    let tmp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    if let Err(error) = write_then_rename(&tmp_path, path, data) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}

fn write_then_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    {
        let mut file = File::create(tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(tmp_path, path)
}
