use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::NamedTempFile;

use crate::db::helpers::parse_utc_offset;

pub const DATA_DIR_ENV: &str = "LOGON_DATA_DIR";
pub const DEBUG_ENV: &str = "LOGON_DEBUG";

/// What to do with `in_progress` rows found at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    #[default]
    Close,
    Resume,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSettings {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub auto_project: String,
    pub auto_goal: String,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: 2,
            auto_project: "systemOn".into(),
            auto_goal: "Screen unlocked".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub manual_timeout_minutes: u64,
    pub utc_offset: String,
    pub strict_verticals: bool,
    pub recovery: RecoveryPolicy,
    pub presence: PresenceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manual_timeout_minutes: 20,
            utc_offset: "+05:30".into(),
            strict_verticals: true,
            recovery: RecoveryPolicy::Close,
            presence: PresenceSettings::default(),
        }
    }
}

impl Settings {
    pub fn manual_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_timeout_minutes.max(1) * 60)
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
            .with_context(|| format!("invalid utc_offset setting '{}'", self.utc_offset))
    }

    pub fn presence_poll_interval(&self) -> Duration {
        Duration::from_secs(self.presence.poll_interval_secs.max(1))
    }
}

/// File layout under the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    /// `--data-dir` flag, then `LOGON_DATA_DIR`, then the platform data dir.
    pub fn resolve(flag: Option<PathBuf>) -> Result<Self> {
        let root = match flag {
            Some(path) => path,
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(value) if !value.is_empty() => PathBuf::from(value),
                _ => dirs::data_dir()
                    .map(|dir| dir.join("logon"))
                    .context("no platform data directory; pass --data-dir")?,
            },
        };
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create data directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn sessions_csv(&self) -> PathBuf {
        self.root.join("logger_data").join("sessions.csv")
    }

    pub fn verticals_json(&self) -> PathBuf {
        self.root.join("verticals.json")
    }

    pub fn settings_json(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("logon.lock")
    }
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Settings loaded once at startup. The file is edited by hand; the process
/// only ever writes it to seed the defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings {}: {err}", path.display());
                Settings::default()
            })
        } else {
            Settings::default()
        };

        data.offset()?;

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.data.clone()
    }

    /// Writes the current settings when no file exists yet, so there is
    /// something to edit. An existing file, even an unreadable one, is left
    /// alone. Returns whether a file was written.
    pub fn write_defaults_if_missing(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        self.persist(&self.data)?;
        info!("Wrote default settings to {}", self.path.display());
        Ok(true)
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(serialized.as_bytes())
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|err| anyhow!("Failed to persist {}: {}", self.path.display(), err.error))?;
        Ok(())
    }
}
