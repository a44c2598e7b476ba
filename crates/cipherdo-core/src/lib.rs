//! Core abstractions for Cipherdo: the key store contract, the closed set of
//! encryptable value kinds, and the task model persisted through them.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod key_store;
pub mod tasks;
pub mod values;
