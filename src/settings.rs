//! Persisted user defaults and the voices cache.
//!
//! Both live as JSON in the application data directory
//! ([`crate::cache::app_data_dir`]): `settings.json` holds the defaults used
//! for new jobs, `voices.json` the last voice list fetched from ElevenLabs.
//! A missing or unreadable settings file yields the defaults.

use crate::cache::app_data_dir;
use crate::config::{IsoTool, ToolkitConfig, ToolkitConfigBuilder, DEFAULT_MODEL_ID, DEFAULT_OUTPUT_FORMAT};
use crate::elevenlabs::VoiceInfo;
use crate::error::ToolkitError;
use crate::manifest::{OutputMode, DEFAULT_LANGUAGE};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";
pub const VOICES_FILE: &str = "voices.json";

/// User defaults for new jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub language: String,
    pub mode: OutputMode,
    /// Where `dbt new` creates job folders when `--output` is not given.
    pub output_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// mkisofs-compatible command line, e.g. `xorriso -as mkisofs`.
    pub iso_command: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            mode: OutputMode::Both,
            output_root: None,
            cache_dir: None,
            iso_command: None,
        }
    }
}

impl AppSettings {
    /// A config builder seeded from these settings.
    pub fn config_builder(&self) -> ToolkitConfigBuilder {
        let mut builder = ToolkitConfig::builder()
            .model_id(&self.model_id)
            .output_format(&self.output_format)
            .language(&self.language);
        if let Some(dir) = &self.cache_dir {
            builder = builder.cache_root(dir);
        }
        if let Some(tool) = self.iso_command.as_deref().and_then(IsoTool::from_command_line) {
            builder = builder.iso_tool(tool);
        }
        builder
    }
}

/// The last fetched voice list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicesCache {
    pub synced_utc: DateTime<Utc>,
    #[serde(default)]
    pub voices: Vec<VoiceInfo>,
}

/// Reads and writes `settings.json` and `voices.json` in one directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(app_data_dir())
    }
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    pub fn voices_path(&self) -> PathBuf {
        self.dir.join(VOICES_FILE)
    }

    /// Load settings, falling back to defaults when absent or unreadable.
    pub fn load(&self) -> AppSettings {
        let path = self.settings_path();
        match read_json::<AppSettings>(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => AppSettings::default(),
            Err(e) => {
                warn!("Ignoring settings file: {}", e);
                AppSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &AppSettings) -> Result<(), ToolkitError> {
        write_json(&self.dir, &self.settings_path(), settings)
    }

    /// Load the voices cache, `None` when it was never written.
    pub fn load_voices(&self) -> Result<Option<VoicesCache>, ToolkitError> {
        read_json(&self.voices_path())
    }

    pub fn save_voices(&self, voices: Vec<VoiceInfo>) -> Result<VoicesCache, ToolkitError> {
        let cache = VoicesCache {
            synced_utc: Utc::now(),
            voices,
        };
        write_json(&self.dir, &self.voices_path(), &cache)?;
        Ok(cache)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ToolkitError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ToolkitError::io(path, e)),
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| ToolkitError::InvalidConfig(format!("'{}': {e}", path.display())))
}

fn write_json<T: Serialize>(dir: &Path, path: &Path, value: &T) -> Result<(), ToolkitError> {
    std::fs::create_dir_all(dir).map_err(|e| ToolkitError::io(dir, e))?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ToolkitError::Internal(format!("serialise {}: {e}", path.display())))?;
    std::fs::write(path, json).map_err(|e| ToolkitError::io(path, e))
}
