//! Field-level encryption at rest.
//! Keys come from a `SecureKeyStore` (OS keyring in production); every field
//! is sealed with AES-256-CBC plus an HMAC-SHA256 tag before it reaches disk.

pub mod cipher;
pub mod encrypted_store;
pub mod key_manager;
pub mod registry;
pub mod transformer;
