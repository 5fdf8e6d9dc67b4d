//! Configuration loading and saving utilities.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::schema::Config;

/// Get the default configuration file path (`~/.voxserve/config.json`).
pub fn get_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".voxserve").join("config.json")
}

/// Load configuration, falling back to a default [`Config`].
///
/// `config_path` overrides the default location. An absent file is the
/// normal first-run case and loads defaults silently; an unreadable or
/// unparsable file loads defaults with one warning.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);
    if !path.exists() {
        return Config::default();
    }
    fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|contents| serde_json::from_str(&contents).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| {
            warn!("Ignoring config at {}: {e}. Using defaults.", path.display());
            Config::default()
        })
}

/// Save configuration to a JSON file, creating parent directories as needed.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> std::io::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(&path, contents)
}
