//! User preferences for the mesh node
//!
//! Controls what gets auto-tagged into composed messages, which incoming
//! severities raise a notification, and the timing knobs of the dedup window,
//! ACK wait and drill beacons.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{ParsedMessage, Severity};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid language: expected two lowercase letters, got {0:?}")]
    InvalidLanguage(String),

    #[error("Invalid dedup window: must be > 0 seconds")]
    InvalidDedupWindow,

    #[error("Invalid ACK timeout: must be > 0 seconds")]
    InvalidAckTimeout,

    #[error("Invalid drill limit: must be > 0 transmissions")]
    InvalidDrillLimit,

    #[error("Settings I/O error: {0}")]
    Io(String),

    #[error("Settings parse error: {0}")]
    Parse(String),
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// ISO 639-1 code; anything other than `en` is tagged into messages
    pub language: String,
    pub auto_gps: bool,
    pub auto_timestamp: bool,

    pub notify_mayday: bool,
    pub notify_urgent: bool,
    pub notify_safety: bool,
    pub notify_routine: bool,

    pub dedup_window_secs: u64,
    pub ack_timeout_secs: u64,
    pub drill_max_transmits: u32,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            auto_gps: true,
            auto_timestamp: true,
            notify_mayday: true,
            notify_urgent: true,
            notify_safety: false,
            notify_routine: false,
            dedup_window_secs: 600,
            ack_timeout_secs: 300,
            drill_max_transmits: 3,
        }
    }
}

impl MeshSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let lang = self.language.as_bytes();
        if lang.len() != 2 || !lang.iter().all(u8::is_ascii_lowercase) {
            return Err(SettingsError::InvalidLanguage(self.language.clone()));
        }
        if self.dedup_window_secs == 0 {
            return Err(SettingsError::InvalidDedupWindow);
        }
        if self.ack_timeout_secs == 0 {
            return Err(SettingsError::InvalidAckTimeout);
        }
        if self.drill_max_transmits == 0 {
            return Err(SettingsError::InvalidDrillLimit);
        }
        Ok(())
    }

    /// Whether an incoming message should alert the user. Drills never do.
    pub fn should_notify(&self, parsed: &ParsedMessage) -> bool {
        if parsed.is_drill {
            return false;
        }
        match parsed.severity {
            Some(Severity::Mayday) => self.notify_mayday,
            Some(Severity::Urgent) => self.notify_urgent,
            Some(Severity::Safety) => self.notify_safety,
            Some(Severity::Routine) => self.notify_routine,
            None => false,
        }
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Read settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))
    }
}
