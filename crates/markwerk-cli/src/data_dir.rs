// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution and the persisted `config.json`.

use std::path::{Path, PathBuf};

use markwerk_core::config::AppConfig;
use markwerk_core::error::{MarkwerkError, Result};
use tracing::{debug, info, warn};

const APP_DIR: &str = "markwerk";
const CONFIG_FILE: &str = "config.json";

/// Application data directory, created if missing.
pub fn data_dir() -> PathBuf {
    let dir = base_dir(std::env::var("XDG_DATA_HOME").ok(), std::env::var("HOME").ok()).join(APP_DIR);
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default location of the persisted configuration.
pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

fn base_dir(xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    if let Some(xdg) = xdg_data_home.filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    if let Some(home) = home.filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/tmp")
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, the data-dir file is used when
/// present and defaults otherwise.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path();
            if !path.exists() {
                debug!(path = %path.display(), "No saved config, using defaults");
                return Ok(AppConfig::default());
            }
            path
        }
    };
    let data = std::fs::read_to_string(&path)?;
    let config = serde_json::from_str(&data).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Config is not valid JSON");
        MarkwerkError::from(e)
    })?;
    info!(path = %path.display(), "Config loaded");
    Ok(config)
}

/// Write the configuration as pretty JSON.
pub fn persist_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "Config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use markwerk_core::human_errors::humanize_error;

    #[test]
    fn xdg_wins_over_home() {
        assert_eq!(
            base_dir(Some("/xdg".into()), Some("/home/r".into())),
            PathBuf::from("/xdg")
        );
        assert_eq!(
            base_dir(Some(String::new()), Some("/home/r".into())),
            PathBuf::from("/home/r/.local/share")
        );
        assert_eq!(base_dir(None, None), PathBuf::from("/tmp"));
    }

    #[test]
    fn persisted_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.recognition.darkness_threshold = 0.42;
        config.batch.workers = 7;
        persist_config(&path, &config).unwrap();
        assert_eq!(load_config(Some(path.as_path())).unwrap(), config);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("absent.json").as_path())).is_err());
    }

    #[test]
    fn malformed_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, MarkwerkError::Serialization(_)));
        assert!(humanize_error(&err).message.contains("settings"));
    }
}
