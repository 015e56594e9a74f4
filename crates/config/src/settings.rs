// Debugger settings
// Loaded from <project>/.luascope/debugger.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::mapping::MappingPair;

/// Per-project debugger settings.
///
/// Every field has a serde default so older files keep loading as new
/// fields are added (additive migration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// TCP port the debugger listens on.
    pub port: u16,

    /// Base directory announced to the interpreter for relative chunk
    /// names (`BASEDIR`). None = don't send.
    pub remote_basedir: Option<String>,

    /// Children shown per page when browsing a table.
    pub page_size: usize,

    /// Serialization depth cap passed to the remote side (`maxlevel`)
    /// for stack dumps and evaluation results.
    pub eval_max_depth: u32,

    /// Local-prefix → remote-prefix path mappings, first match wins.
    pub mappings: Vec<MappingPair>,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            port: luascope_protocol::DEFAULT_PORT,
            remote_basedir: None,
            page_size: 50,
            eval_max_depth: 2,
            mappings: Vec::new(),
        }
    }
}

impl DebugSettings {
    /// Load settings from a TOML file, falling back to defaults on a
    /// missing or unparsable file.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Error parsing {}: {}; using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}; using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save current settings to a TOML file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let toml = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        fs::write(path, toml).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DebugSettings::default();
        assert_eq!(settings.port, 8172);
        assert!(settings.remote_basedir.is_none());
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.eval_max_depth, 2);
        assert!(settings.mappings.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debugger.toml");

        let mut settings = DebugSettings::default();
        settings.port = 9000;
        settings.remote_basedir = Some("/var/game".to_string());
        settings.mappings.push(MappingPair {
            local_prefix: "/home/dev/project".to_string(),
            remote_prefix: "/var/game".to_string(),
        });

        settings.save_to(&path).unwrap();
        let loaded = DebugSettings::load_from(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = DebugSettings::load_from(&dir.path().join("nope.toml"));
        assert_eq!(loaded, DebugSettings::default());
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debugger.toml");
        fs::write(&path, "port = = nope").unwrap();
        let loaded = DebugSettings::load_from(&path);
        assert_eq!(loaded, DebugSettings::default());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debugger.toml");
        fs::write(&path, "port = 9123\nfuture_option = true\n").unwrap();
        let loaded = DebugSettings::load_from(&path);
        assert_eq!(loaded.port, 9123);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debugger.toml");
        fs::write(&path, "page_size = 10\n").unwrap();
        let loaded = DebugSettings::load_from(&path);
        assert_eq!(loaded.page_size, 10);
        assert_eq!(loaded.port, 8172);
    }
}
