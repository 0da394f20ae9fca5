use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RosterError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RosterSettings {
    /// Newly joined, non-speaking participants go right below the speakers
    /// instead of the bottom of the list.
    pub joined_to_top: bool,
    pub raised_hand_status_ms: u64,
    pub sounding_tick_ms: u64,
    pub animations_disabled: bool,
    pub speak_level_threshold: f32,
    pub sound_status_kept_for_ms: u64,
    pub blobs_enter_duration_ms: u64,
    pub level_duration_ms: u64,
    pub max_level: f32,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            joined_to_top: false,
            raised_hand_status_ms: 3_000,
            sounding_tick_ms: 16,
            animations_disabled: false,
            speak_level_threshold: 0.2,
            sound_status_kept_for_ms: 1_500,
            blobs_enter_duration_ms: 250,
            level_duration_ms: 215,
            max_level: 1.0,
        }
    }
}

impl RosterSettings {
    pub fn raised_hand_status_duration(&self) -> Duration {
        Duration::from_millis(self.raised_hand_status_ms)
    }

    pub fn sounding_tick(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_millis(self.sounding_tick_ms.max(1))
    }

    pub fn level_timing(&self) -> LevelTiming {
        LevelTiming {
            speak_threshold: self.speak_level_threshold,
            sound_status_kept_for: Duration::from_millis(self.sound_status_kept_for_ms),
            enter_duration: Duration::from_millis(self.blobs_enter_duration_ms.max(1)),
            level_duration: Duration::from_millis(self.level_duration_ms.max(1)),
            max_level: self.max_level,
        }
    }
}

/// Timing constants of the per-row level animation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelTiming {
    pub speak_threshold: f32,
    pub sound_status_kept_for: Duration,
    pub enter_duration: Duration,
    pub level_duration: Duration,
    pub max_level: f32,
}

impl Default for LevelTiming {
    fn default() -> Self {
        RosterSettings::default().level_timing()
    }
}

pub struct SettingsStore {
    settings: Mutex<RosterSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> RosterSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_joined_to_top(&self, enabled: bool) -> Result<(), RosterError> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .joined_to_top = enabled;
        self.save()
    }

    pub fn set_animations_disabled(&self, disabled: bool) -> Result<(), RosterError> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .animations_disabled = disabled;
        self.save()
    }

    fn save(&self) -> Result<(), RosterError> {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.file_path, json)?;
        Ok(())
    }

    fn load(path: &Path) -> RosterSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable settings at {}: {e}", path.display());
                RosterSettings::default()
            }),
            Err(_) => RosterSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_settings() {
        let s = RosterSettings::default();
        assert!(!s.joined_to_top);
        assert!(!s.animations_disabled);
        assert_eq!(s.raised_hand_status_duration(), Duration::from_secs(3));
        assert_eq!(s.level_timing().enter_duration, Duration::from_millis(250));
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), RosterSettings::default());
    }

    #[test]
    fn test_joined_to_top_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SettingsStore::new(dir.path());
            store.set_joined_to_top(true).unwrap();
        }
        let store = SettingsStore::new(dir.path());
        assert!(store.get().joined_to_top);
    }

    #[test]
    fn test_animations_disabled_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SettingsStore::new(dir.path());
            store.set_animations_disabled(true).unwrap();
        }
        let store = SettingsStore::new(dir.path());
        assert!(store.get().animations_disabled);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(dir.path());
        assert_eq!(store.get(), RosterSettings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"joined_to_top":true,"raised_hand_status_ms":500}"#,
        )
        .unwrap();
        let s = SettingsStore::new(dir.path()).get();
        assert!(s.joined_to_top);
        assert_eq!(s.raised_hand_status_duration(), Duration::from_millis(500));
        assert_eq!(s.sounding_tick_ms, 16);
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let s = RosterSettings {
            sounding_tick_ms: 0,
            ..RosterSettings::default()
        };
        assert_eq!(s.sounding_tick(), Duration::from_millis(1));
    }
}
