//! Cryptographic functions for the backup engine
//!
//! Provides passphrase-based AES-256-GCM archive encryption with PBKDF2 key
//! derivation, and the host-scoped protection service used for protected
//! columns.

pub mod encryption;
pub mod key_derivation;
pub mod protector;
pub mod secure_memory;

pub use encryption::{decrypt_archive, encrypt_archive, is_encrypted, MAGIC_HEADER};
pub use key_derivation::{derive_key, DerivedKey, PBKDF2_ITERATIONS};
pub use protector::{purposes, DataProtector, HostKeyProtector};
pub use secure_memory::SecureString;
