//! Settings file: eligible sources, source labels, relay options.
//!
//! JSON, every field optional:
//!
//! ```json
//! {
//!   "eligible_sources": ["com.tencent.mm"],
//!   "labels": { "com.tencent.mm": "WeChat" },
//!   "relay": { "timeout_ms": 2000, "date_stamp": "none" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use notirelay_core::{DateStamp, LabelTable};

use crate::eligibility::{EligibilityLoader, EligibilitySet};
use crate::engine::EngineConfig;

// ─── Constants ───────────────────────────────────────────────────────

const DEFAULT_RELAY_TIMEOUT_MS: u64 = 2_000;

/// Environment variable overriding the settings path.
pub const CONFIG_ENV: &str = "NOTIRELAY_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse settings {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ─── Settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub eligible_sources: Vec<String>,
    pub labels: LabelTable,
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Per-frame send timeout. `0` disables the timeout.
    pub timeout_ms: u64,
    pub date_stamp: DateStamp,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RELAY_TIMEOUT_MS,
            date_stamp: DateStamp::None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn eligibility_set(&self) -> EligibilitySet {
        self.eligible_sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            date_stamp: self.relay.date_stamp,
            relay_timeout: (self.relay.timeout_ms > 0)
                .then(|| Duration::from_millis(self.relay.timeout_ms)),
        }
    }
}

/// The settings file on disk, re-read on every load.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings, SettingsError> {
        Settings::load(&self.path)
    }
}

impl EligibilityLoader for SettingsFile {
    fn load_eligibility_set(&self) -> Result<EligibilitySet, SettingsError> {
        self.load().map(|s| s.eligibility_set())
    }
}

/// Resolve the settings path: explicit > `NOTIRELAY_CONFIG` >
/// `$XDG_CONFIG_HOME/notirelay/settings.json` > `$HOME/.config/notirelay/settings.json`.
pub fn resolve_settings_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME")
        && !dir.is_empty()
    {
        return Some(Path::new(&dir).join("notirelay/settings.json"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".config/notirelay/settings.json"))
}
