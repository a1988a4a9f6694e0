use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use wifi_switch_common::{ActivityEntry, LedBrightness, RuntimeConfig, Schedule};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON record files under one data directory. Writes are serialized by a
/// single lock and go through a temp file + rename.
#[derive(Debug)]
pub struct Store {
    runtime_path: PathBuf,
    schedule_path: PathBuf,
    activity_path: PathBuf,
    leds_path: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("WIFI_SWITCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.wifi-switch"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            runtime_path: data_dir.join("runtime.json"),
            schedule_path: data_dir.join("schedule.json"),
            activity_path: data_dir.join("activity.json"),
            leds_path: data_dir.join("leds.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn load_runtime_config(&self) -> Result<RuntimeConfig, StoreError> {
        self.load_or_default(&self.runtime_path)
    }

    pub fn save_runtime_config(&self, runtime: &RuntimeConfig) -> Result<(), StoreError> {
        self.save(&self.runtime_path, runtime)
    }

    pub fn load_schedule(&self) -> Result<Schedule, StoreError> {
        self.load_or_default(&self.schedule_path)
    }

    pub fn save_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        self.save(&self.schedule_path, schedule)
    }

    pub fn load_activity(&self) -> Result<Vec<ActivityEntry>, StoreError> {
        self.load_or_default(&self.activity_path)
    }

    pub fn save_activity(&self, entries: &[ActivityEntry]) -> Result<(), StoreError> {
        self.save(&self.activity_path, entries)
    }

    pub fn load_led_brightness(&self) -> Result<LedBrightness, StoreError> {
        self.load_or_default(&self.leds_path)
    }

    pub fn save_led_brightness(&self, brightness: &LedBrightness) -> Result<(), StoreError> {
        self.save(&self.leds_path, brightness)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let payload = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, payload).map_err(io_err)?;
        std::fs::rename(&staging, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wifi_switch_common::ScheduleDraft;

    use super::*;

    #[test]
    fn missing_files_load_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        assert!(store.load_schedule().unwrap().entries.is_empty());
        assert!(store.load_activity().unwrap().is_empty());
        assert_eq!(store.load_led_brightness().unwrap(), LedBrightness::default());
        assert_eq!(store.load_runtime_config().unwrap().network.http_port, 5000);
    }

    #[test]
    fn schedule_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut schedule = Schedule::default();
        schedule
            .add(ScheduleDraft {
                days: vec!["FRI".to_string()],
                start: "22:00".to_string(),
                end: "02:00".to_string(),
                description: "late night".to_string(),
            })
            .unwrap();

        Store::new(dir.path().join("nested")).save_schedule(&schedule).unwrap();
        let reloaded = Store::new(dir.path().join("nested")).load_schedule().unwrap();

        assert_eq!(reloaded, schedule);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leds.json"), b"{ not json").unwrap();

        let err = Store::new(dir.path()).load_led_brightness().unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let err = Store::new(blocker.join("data"))
            .save_led_brightness(&LedBrightness::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
