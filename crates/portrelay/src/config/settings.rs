//! Last-used front-end settings, persisted between runs.
//!
//! Read once before the listener starts and written once after it stops.
//! A missing or unreadable file falls back to defaults.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_DIR: &str = "portrelay";
const SETTINGS_FILE: &str = "settings.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Internal port used by the previous run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_port: Option<u16>,
    #[serde(default)]
    pub rewrite_host_header: bool,
}

/// `<config_dir>/portrelay/settings.yaml`, when the platform has a config directory.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
}

impl Settings {
    /// Load settings, falling back to defaults if the file is missing or malformed.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(settings) => {
                debug!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("Ignoring settings file {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    /// Write settings, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), anyhow::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}
