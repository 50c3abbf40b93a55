//! Preference persistence
//!
//! Sentiwiz remembers three things between sessions: the last imported
//! file, the last selected column, and the last selected model. They are
//! stored as a small TOML file under the platform config directory and
//! read once at startup to pre-populate the wizard.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User preferences persisted between sessions
///
/// Missing or unreadable preference files are treated as defaults, never
/// as errors; preferences are a convenience, not application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Last imported spreadsheet path
    pub last_file: Option<String>,
    /// Last selected column header
    pub last_column: Option<String>,
    /// Last selected model identifier
    pub last_model: Option<String>,
}

impl Preferences {
    /// Default preference file location for the platform
    ///
    /// `~/.config/sentiwiz/preferences.toml` on Linux, the equivalent
    /// config directory elsewhere. Falls back to the working directory
    /// when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("sentiwiz").join("preferences.toml"))
            .unwrap_or_else(|| PathBuf::from("sentiwiz-preferences.toml"))
    }

    /// Load preferences from `path`, returning defaults if the file is
    /// missing or malformed
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed preferences file");
                Self::default()
            }
        }
    }

    /// Write preferences to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize preferences: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Clear every remembered value
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let prefs = Preferences::load(&dir.path().join("nope.toml"));
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.toml");

        let prefs = Preferences {
            last_file: Some("/tmp/comments.csv".to_string()),
            last_column: Some("Feedback".to_string()),
            last_model: Some("llama3.2".to_string()),
        };
        prefs.save(&path).unwrap();

        assert_eq!(Preferences::load(&path), prefs);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        std::fs::write(&path, "last_file = [not valid").unwrap();

        assert_eq!(Preferences::load(&path), Preferences::default());
    }
}
