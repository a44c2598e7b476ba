use std::fmt;

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::key_manager::{KeyMaterial, IV_LEN, KEY_LEN};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Length of the HMAC-SHA256 tag appended to every ciphertext.
pub const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;
const MAC_CONTEXT: &[u8] = b"cipherdo/field-mac/v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("malformed ciphertext of {len} bytes")]
    Malformed { len: usize },
    #[error("authentication tag mismatch")]
    Authentication,
    #[error("invalid padding")]
    Padding,
}

/// AES-256-CBC with PKCS#7 padding, sealed with an HMAC-SHA256 tag
/// (encrypt-then-MAC). Output is `ciphertext || tag`.
///
/// One instance is built per process once key material exists and is shared
/// by every field transformer. It holds no per-call state, so `&self` methods
/// are safe to call from many threads.
#[derive(Clone)]
pub struct FieldCipher {
    encryptor: Aes256CbcEnc,
    decryptor: Aes256CbcDec,
    mac: HmacSha256,
}

impl FieldCipher {
    pub fn new(material: &KeyMaterial) -> Result<Self, CipherError> {
        Self::from_slices(&material.key, &material.iv)
    }

    /// Build from raw bytes; rejects anything but a 32-byte key and 16-byte IV.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        check_len("key", KEY_LEN, key.len())?;
        check_len("iv", IV_LEN, iv.len())?;

        let encryptor = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| invalid_len("key", KEY_LEN, key.len()))?;
        let decryptor = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| invalid_len("key", KEY_LEN, key.len()))?;

        // The MAC key is a PRF output of the encryption key, so no second
        // secret has to be stored.
        let mut kdf = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| invalid_len("key", KEY_LEN, key.len()))?;
        kdf.update(MAC_CONTEXT);
        let mac_key = kdf.finalize().into_bytes();
        let mac = <HmacSha256 as Mac>::new_from_slice(&mac_key)
            .map_err(|_| invalid_len("mac key", TAG_LEN, mac_key.len()))?;

        Ok(Self {
            encryptor,
            decryptor,
            mac,
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = self
            .encryptor
            .clone()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let mut mac = self.mac.clone();
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());
        out
    }

    /// Verify the tag, then decrypt. Any mutation of the input fails here.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        let len = sealed.len();
        if len < BLOCK_LEN + TAG_LEN || (len - TAG_LEN) % BLOCK_LEN != 0 {
            return Err(CipherError::Malformed { len });
        }

        let (ciphertext, tag) = sealed.split_at(len - TAG_LEN);
        let mut mac = self.mac.clone();
        mac.update(ciphertext);
        mac.verify_slice(tag)
            .map_err(|_| CipherError::Authentication)?;

        self.decryptor
            .clone()
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::Padding)
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher(aes-256-cbc+hmac-sha256)")
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), CipherError> {
    if expected == actual {
        Ok(())
    } else {
        Err(invalid_len(what, expected, actual))
    }
}

fn invalid_len(what: &'static str, expected: usize, actual: usize) -> CipherError {
    CipherError::InvalidLength {
        what,
        expected,
        actual,
    }
}
