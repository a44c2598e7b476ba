use std::fmt;

use cipherdo_core::key_store::{KeyStoreError, SecureKeyStore};
use hmac::Hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key store entry holding the hex-encoded derived key.
pub const KEY_ENTRY: &str = "encryption-key";
/// Key store entry holding the hex-encoded IV.
pub const IV_ENTRY: &str = "encryption-iv";

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Shared by every installation. The PBKDF2 input is a 32-byte OS-random
/// seed, so a fixed salt does not open the door to dictionary attacks here;
/// it would if the input ever became user-chosen.
const KDF_SALT: &[u8] = b"cipherdo/field-encryption/v1";
const KDF_ROUNDS: u32 = 4096;

/// Key and IV parameterizing the field cipher. Never log these bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// 256-bit AES key.
    pub key: [u8; KEY_LEN],
    /// CBC initialization vector.
    pub iv: [u8; IV_LEN],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Failures obtaining key material. All of them are fatal for the store:
/// there is no safe way to continue without a key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key store error: {0}")]
    Store(#[from] KeyStoreError),
    #[error("decode error for {entry}: {reason}")]
    Decode { entry: &'static str, reason: String },
    #[error("key derivation error: {0}")]
    Derivation(String),
}

/// OS keyring-backed key store. Uses the `keyring` crate; each entry name
/// becomes an account under the configured service.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, name).map_err(backend_err)
    }
}

impl SecureKeyStore for KeyringKeyStore {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError> {
        match self.entry(name)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(backend_err(err)),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError> {
        self.entry(name)?.set_password(value).map_err(backend_err)
    }
}

fn backend_err<E: ToString>(err: E) -> KeyStoreError {
    KeyStoreError::Backend {
        reason: err.to_string(),
    }
}

/// Get-or-create access to the installation's key and IV.
///
/// The key is derived once from a random seed and the *derived* key is what
/// gets persisted; later calls decode it and never re-derive. The IV is plain
/// random bytes. Both getters are idempotent, but the first call is not
/// guarded against concurrent first use: run it once at startup.
pub struct KeyManager<S: SecureKeyStore> {
    store: S,
}

impl<S: SecureKeyStore> KeyManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn encryption_key(&self) -> Result<[u8; KEY_LEN], KeyError> {
        self.get_or_create(KEY_ENTRY, || {
            let mut seed = random_bytes::<KEY_LEN>();
            let derived = derive_key(&seed);
            seed.zeroize();
            derived
        })
    }

    pub fn iv(&self) -> Result<[u8; IV_LEN], KeyError> {
        self.get_or_create(IV_ENTRY, || Ok(random_bytes::<IV_LEN>()))
    }

    /// Key and IV together, as the cipher needs them.
    pub fn key_material(&self) -> Result<KeyMaterial, KeyError> {
        Ok(KeyMaterial {
            key: self.encryption_key()?,
            iv: self.iv()?,
        })
    }

    fn get_or_create<const N: usize>(
        &self,
        entry: &'static str,
        generate: impl FnOnce() -> Result<[u8; N], KeyError>,
    ) -> Result<[u8; N], KeyError> {
        if let Some(stored) = self.store.get(entry)? {
            debug!(entry, "loaded key material");
            return decode_entry(entry, &stored);
        }

        let mut bytes = generate()?;
        let mut encoded = hex::encode(bytes);
        let persisted = self.store.set(entry, &encoded);
        encoded.zeroize();
        if let Err(err) = persisted {
            bytes.zeroize();
            return Err(err.into());
        }
        info!(entry, "generated and persisted new key material");
        Ok(bytes)
    }
}

/// PBKDF2-HMAC-SHA256 over `seed` with the fixed salt.
pub fn derive_key(seed: &[u8]) -> Result<[u8; KEY_LEN], KeyError> {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(seed, KDF_SALT, KDF_ROUNDS, &mut out)
        .map_err(|e| KeyError::Derivation(e.to_string()))?;
    Ok(out)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_entry<const N: usize>(entry: &'static str, stored: &str) -> Result<[u8; N], KeyError> {
    let mut bytes = hex::decode(stored.trim()).map_err(|e| KeyError::Decode {
        entry,
        reason: e.to_string(),
    })?;

    if bytes.len() != N {
        let reason = format!("expected {N} bytes, got {}", bytes.len());
        bytes.zeroize();
        return Err(KeyError::Decode { entry, reason });
    }

    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use cipherdo_core::key_store::InMemoryKeyStore;

    use super::*;

    struct UnavailableKeyStore;

    impl SecureKeyStore for UnavailableKeyStore {
        fn get(&self, _name: &str) -> Result<Option<String>, KeyStoreError> {
            Err(KeyStoreError::Backend {
                reason: "keychain locked".into(),
            })
        }

        fn set(&self, _name: &str, _value: &str) -> Result<(), KeyStoreError> {
            Err(KeyStoreError::Backend {
                reason: "keychain locked".into(),
            })
        }
    }

    /// Reads as empty but refuses every write.
    struct ReadOnlyKeyStore;

    impl SecureKeyStore for ReadOnlyKeyStore {
        fn get(&self, _name: &str) -> Result<Option<String>, KeyStoreError> {
            Ok(None)
        }

        fn set(&self, _name: &str, _value: &str) -> Result<(), KeyStoreError> {
            Err(KeyStoreError::Backend {
                reason: "keychain is read-only".into(),
            })
        }
    }

    #[test]
    fn first_use_generates_and_persists_both_entries() {
        let store = InMemoryKeyStore::new();
        let manager = KeyManager::new(store.clone());

        let key = manager.encryption_key().expect("key");
        let iv = manager.iv().expect("iv");

        assert_eq!(key.len(), 32);
        assert_eq!(iv.len(), 16);
        assert_eq!(store.entry_count().expect("count"), 2);
        assert_eq!(
            store.get(KEY_ENTRY).expect("get").as_deref(),
            Some(hex::encode(key).as_str()),
            "the derived key is persisted, not the seed"
        );
        assert_eq!(
            store.get(IV_ENTRY).expect("get").as_deref(),
            Some(hex::encode(iv).as_str())
        );
    }

    #[test]
    fn repeated_calls_never_regenerate() {
        let store = InMemoryKeyStore::new();
        let manager = KeyManager::new(store.clone());

        let first = manager.key_material().expect("first");
        let second = manager.key_material().expect("second");
        assert_eq!(first, second);
        assert_eq!(store.entry_count().expect("count"), 2);
    }

    #[test]
    fn fresh_manager_on_same_store_reproduces_material() {
        let store = InMemoryKeyStore::new();
        let original = KeyManager::new(store.clone()).key_material().expect("first");
        let reopened = KeyManager::new(store).key_material().expect("reopened");
        assert_eq!(original, reopened);
    }

    #[test]
    fn existing_entries_are_returned_verbatim() {
        let store = InMemoryKeyStore::new();
        store.set(KEY_ENTRY, &"11".repeat(KEY_LEN)).expect("seed key");
        store.set(IV_ENTRY, &"22".repeat(IV_LEN)).expect("seed iv");

        let material = KeyManager::new(store).key_material().expect("material");
        assert_eq!(material.key, [0x11; KEY_LEN]);
        assert_eq!(material.iv, [0x22; IV_LEN]);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err =
            decode_entry::<KEY_LEN>(KEY_ENTRY, "abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode { entry: KEY_ENTRY, .. }));
    }

    #[test]
    fn corrupt_entry_is_an_error_not_a_regeneration() {
        let store = InMemoryKeyStore::new();
        store.set(IV_ENTRY, "not hex").expect("set");
        let err = KeyManager::new(store.clone()).iv().expect_err("corrupt iv");
        assert!(matches!(err, KeyError::Decode { .. }));
        assert_eq!(store.get(IV_ENTRY).expect("get").as_deref(), Some("not hex"));
    }

    #[test]
    fn unavailable_store_is_reported() {
        let err = KeyManager::new(UnavailableKeyStore)
            .key_material()
            .expect_err("store is locked");
        assert!(matches!(err, KeyError::Store(KeyStoreError::Backend { .. })));
    }

    #[test]
    fn failed_persist_returns_no_material() {
        let manager = KeyManager::new(ReadOnlyKeyStore);

        let err = manager.encryption_key().expect_err("key cannot be persisted");
        assert!(matches!(err, KeyError::Store(KeyStoreError::Backend { .. })));
        let err = manager.iv().expect_err("iv cannot be persisted");
        assert!(matches!(err, KeyError::Store(KeyStoreError::Backend { .. })));
    }

    #[test]
    fn derivation_matches_pbkdf2_hmac_sha256() {
        let expected =
            hex::decode("0fb1df0e8e9addb6d2cfcb7b0e4432c31c719ed3023e27e6010592207919a8cc")
                .expect("hex");
        assert_eq!(derive_key(&[7u8; 32]).expect("derive").as_slice(), expected);
    }

    #[test]
    fn derivation_is_deterministic_for_a_seed() {
        let seed = [7u8; 32];
        assert_eq!(derive_key(&seed).expect("derive"), derive_key(&seed).expect("derive"));
        assert_ne!(derive_key(&seed).expect("derive"), seed);
    }

    #[test]
    fn debug_output_redacts_bytes() {
        let material = KeyMaterial {
            key: [0xAB; KEY_LEN],
            iv: [0xCD; IV_LEN],
        };
        let rendered = format!("{material:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("171"));
    }
}
