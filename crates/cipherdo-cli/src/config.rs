use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Keychain service used when the config does not name one.
pub const DEFAULT_KEYRING_SERVICE: &str = "cipherdo";

/// Where cipherdo keeps its encrypted task container and which keychain
/// service holds the field key and IV. Both settings are optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Directory for `tasks.json`; the platform data dir when unset.
    pub data_dir: Option<PathBuf>,
    /// Keychain service name; point two configs at different services to
    /// keep their keys apart.
    pub keyring_service: Option<String>,
}

impl Config {
    pub fn keyring_service(&self) -> &str {
        self.keyring_service
            .as_deref()
            .unwrap_or(DEFAULT_KEYRING_SERVICE)
    }
}

pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// A missing or blank file means "use the built-in keychain service and data dir".
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// `<config dir>/cipherdo/config.toml`.
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cipherdo").join("config.toml"))
}

/// Backs `cipherdo config init`.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

/// Never clobbers an existing file, so user edits survive `config init`.
pub fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
