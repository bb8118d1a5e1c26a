//! Sync settings management
//!
//! Settings live in `<dir>/settings.json`. A missing file yields defaults, an
//! unparseable one is logged and replaced by defaults. The bearer token and
//! base URL can be supplied through the environment instead of the file.

use crate::backoff::BackoffSchedule;
use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`ServerSettings::api_token`].
pub const ENV_API_TOKEN: &str = "FIELDSYNC_API_TOKEN";
/// Environment variable overriding [`ServerSettings::base_url`].
pub const ENV_BASE_URL: &str = "FIELDSYNC_BASE_URL";

const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_DATA_DIR: &str = "data";

/// Settings container for the sync agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub sync: SchedulingSettings,
}

/// Reporting server connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL the REST routes are appended to
    pub base_url: String,
    /// Bearer credential sent with every request
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Path probed to decide reachability
    pub probe_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            probe_path: "/api/health".to_string(),
        }
    }
}

/// Local persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for the store slots; relative paths resolve against the
    /// settings directory
    pub data_dir: Option<PathBuf>,
}

/// Drain scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulingSettings {
    pub backoff_schedule_secs: Vec<u64>,
    /// Re-check delay after a clean drain pass
    pub recheck_secs: u64,
    /// Re-check delay while offline or idle
    pub idle_keepalive_secs: u64,
    /// Reachability poll interval
    pub connectivity_poll_secs: u64,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            backoff_schedule_secs: crate::backoff::DEFAULT_BACKOFF_SECS.to_vec(),
            recheck_secs: 5,
            idle_keepalive_secs: 60,
            connectivity_poll_secs: 5,
        }
    }
}

impl SyncSettings {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.server.base_url = base_url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.server.api_token = Some(token.into());
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = Some(dir.into());
        self
    }

    pub fn with_backoff_schedule(mut self, secs: Vec<u64>) -> Self {
        self.sync.backoff_schedule_secs = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs.max(1))
    }

    pub fn backoff_schedule(&self) -> BackoffSchedule {
        BackoffSchedule::from_secs(&self.sync.backoff_schedule_secs)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.sync.recheck_secs)
    }

    pub fn idle_keepalive(&self) -> Duration {
        Duration::from_secs(self.sync.idle_keepalive_secs.max(1))
    }

    /// Poll interval, clamped to at most five seconds.
    pub fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.connectivity_poll_secs.clamp(1, 5))
    }

    /// Apply overrides from a variable lookup such as `std::env::var`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|t| !t.is_empty()) {
            self.server.api_token = Some(token);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.is_empty()) {
            self.server.base_url = url;
        }
    }
}

/// Settings manager for loading and saving sync settings
pub struct SettingsManager {
    settings_dir: PathBuf,
    settings_path: PathBuf,
    current: SyncSettings,
}

impl SettingsManager {
    pub fn new(settings_dir: impl Into<PathBuf>) -> Self {
        let settings_dir = settings_dir.into();
        let settings_path = settings_dir.join(SETTINGS_FILE);
        Self {
            settings_dir,
            settings_path,
            current: SyncSettings::default(),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk and apply environment overrides.
    pub fn load(&mut self) -> Result<&SyncSettings, SettingsError> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Load settings from disk and apply overrides from `lookup`.
    pub fn load_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<&SyncSettings, SettingsError> {
        self.current = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)?;
            match serde_json::from_str::<SyncSettings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Failed to parse settings file, using defaults: {}", e);
                    SyncSettings::default()
                }
            }
        } else {
            SyncSettings::default()
        };
        self.current.apply_overrides(lookup);
        Ok(&self.current)
    }

    /// Save current settings to disk
    pub fn save(&self) -> Result<(), SettingsError> {
        std::fs::create_dir_all(&self.settings_dir)?;
        let content = serde_json::to_string_pretty(&self.current)?;
        std::fs::write(&self.settings_path, content)?;
        Ok(())
    }

    pub fn get(&self) -> &SyncSettings {
        &self.current
    }

    pub fn update(&mut self, settings: SyncSettings) -> Result<(), SettingsError> {
        self.current = settings;
        self.save()
    }

    /// Directory the local store writes into.
    pub fn data_dir(&self) -> PathBuf {
        match &self.current.storage.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.settings_dir.join(dir),
            None => self.settings_dir.join(DEFAULT_DATA_DIR),
        }
    }
}
