// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link resolution settings.
//!
//! Settings are stored as RON. Every field has a default, so a settings file
//! only needs the values it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Error when loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Reading or writing the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid settings RON
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The settings could not be serialized
    #[error("Serialize error: {0}")]
    Serialize(#[from] ron::Error),

    /// The file was written by a newer format
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
}

/// Tunables for link resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Settings format version
    pub version: u32,
    /// Remove an existing connection on a target in-port instead of failing
    pub auto_disconnect: bool,
    /// Let free-port allocation grow in-ports on types that support it
    pub create_in_ports: bool,
    /// Let free-port allocation grow out-ports on types that support it
    pub create_out_ports: bool,
    /// Maximum number of scope levels a traversal may cross
    pub max_scope_depth: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            auto_disconnect: true,
            create_in_ports: true,
            create_out_ports: false,
            max_scope_depth: 64,
        }
    }
}

impl LinkSettings {
    /// Parse settings from RON
    pub fn from_ron(s: &str) -> Result<Self, SettingsError> {
        let settings: LinkSettings = ron::from_str(s)?;
        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }
        Ok(settings)
    }

    /// Serialize settings to pretty RON
    pub fn to_ron(&self) -> Result<String, SettingsError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_ron(&content)?;
        tracing::debug!("loaded link settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
