use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::BridgeConfig;

/// Returns the path to the settings file: `~/.config/audio-bridge/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("audio-bridge");
    path.push("settings.json");
    path
}

/// Which audio host the bridge attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Platform default devices through cpal
    #[default]
    Cpal,
    /// A running JACK server (needs the `jack-backend` feature)
    Jack,
    /// No host; a paced clock thread drives the callback
    Offline,
}

/// Persisted application settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Host
    pub backend: BackendKind,
    pub client_name: String,

    // Bridge
    pub bridge: BridgeConfig,

    // Worker
    pub gain: f32,
    pub run_seconds: f32,
    pub worker_chunk_frames: usize,

    // Offline host
    pub offline_sample_rate: u32,
    pub offline_period_frames: usize,
    pub offline_tone_hz: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpal,
            client_name: "audio-bridge".to_string(),

            bridge: BridgeConfig::default(),

            gain: 0.5,
            run_seconds: 5.0,
            worker_chunk_frames: 256,

            offline_sample_rate: 48_000,
            offline_period_frames: 512,
            offline_tone_hz: 440.0,
        }
    }
}

impl AppSettings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        self.save_to(&settings_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write settings: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }

    /// Worker transfer size, never zero
    pub fn worker_chunk(&self) -> usize {
        self.worker_chunk_frames.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::UnderrunFill;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("audio-bridge-test-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_path_ends_in_app_dir() {
        let path = settings_path();
        assert!(path.ends_with("audio-bridge/settings.json"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = AppSettings::load_from(&scratch_path("missing"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("save");
        let mut settings = AppSettings::default();
        settings.backend = BackendKind::Offline;
        settings.bridge.input_channels = 2;
        settings.bridge.underrun_fill = UnderrunFill::HoldLast;
        settings.gain = 0.25;

        settings.save_to(&path);
        let loaded = AppSettings::load_from(&path);
        assert_eq!(loaded, settings);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "backend": "jack", "bridge": { "output_channels": 4 } }"#)
                .unwrap();
        assert_eq!(settings.backend, BackendKind::Jack);
        assert_eq!(settings.bridge.output_channels, 4);
        assert_eq!(settings.bridge.input_channels, 1);
        assert_eq!(settings.client_name, "audio-bridge");
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let path = scratch_path("corrupt");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_worker_chunk_never_zero() {
        let settings = AppSettings {
            worker_chunk_frames: 0,
            ..Default::default()
        };
        assert_eq!(settings.worker_chunk(), 1);
    }
}
