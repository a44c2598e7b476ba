use std::path::PathBuf;

use crate::config::Config;
use cipherdo_storage::key_manager::{KeyManager, KeyringKeyStore};
use cipherdo_task::EncryptedTaskRepo;
use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;

const TASKS_FILE: &str = "tasks.json";

/// `<data dir>/cipherdo` unless the config names another directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("cipherdo"))
}

/// Location of the encrypted task container, honoring config overrides.
pub fn tasks_path(config: &Config) -> Result<PathBuf> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    Ok(root.join(TASKS_FILE))
}

/// Key manager over the OS keychain.
pub fn key_manager(config: &Config) -> KeyManager<KeyringKeyStore> {
    KeyManager::new(KeyringKeyStore::new(config.keyring_service()))
}

/// Open the task repository. Key material is fetched (or created) here, once,
/// before any field is read or written; failures abort startup.
pub fn open_repo(config: &Config) -> Result<EncryptedTaskRepo> {
    let path = tasks_path(config)?;
    debug!(?path, "opening encrypted task store");
    EncryptedTaskRepo::open(path, &key_manager(config))
        .map_err(|e| color_eyre::eyre::eyre!("cannot open encrypted task store: {e:#}"))
}

/// Helper for tests to open a repo rooted at a temp dir with in-memory keys.
#[cfg(test)]
pub fn test_repo(root: &std::path::Path) -> EncryptedTaskRepo {
    use cipherdo_core::key_store::InMemoryKeyStore;

    EncryptedTaskRepo::open(root.join(TASKS_FILE), &KeyManager::new(InMemoryKeyStore::new()))
        .expect("open test repo")
}
