//! Host-scoped field protection
//!
//! Some columns (bot tokens, API keys, TOTP secrets, the stored backup
//! passphrase) are encrypted at rest with a key that never leaves the host.
//! [`DataProtector`] is the seam the backup engine talks to;
//! [`HostKeyProtector`] is the implementation used by the application.
//!
//! Every purpose string gets its own AES-256 key, derived from the host
//! master key with HMAC-SHA256, so a value protected for one purpose cannot
//! be unprotected under another.

use std::fs;
use std::path::Path;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::create_private_file;

/// Purpose strings for the protected columns of the application schema
pub mod purposes {
    pub const TOTP_SECRETS: &str = "TotpSecrets";
    pub const BOT_TOKEN: &str = "TelegramBotToken";
    pub const API_KEYS: &str = "ApiKeys";
    pub const BACKUP_PASSPHRASE: &str = "BackupPassphrase";
}

/// Host-scoped protection service for individual string values
pub trait DataProtector: Send + Sync {
    /// Encrypt `plaintext` under the key for `purpose`
    fn protect(&self, purpose: &str, plaintext: &str) -> BackupResult<String>;

    /// Decrypt a value previously produced by [`DataProtector::protect`]
    fn unprotect(&self, purpose: &str, protected: &str) -> BackupResult<String>;
}

const MASTER_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const PAYLOAD_VERSION: u8 = 1;
const PURPOSE_LABEL: &[u8] = b"tgadmin-backup/protector/v1/";

#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterKey([u8; MASTER_KEY_SIZE]);

/// Data protector keyed by a master key stored on this host
pub struct HostKeyProtector {
    master: MasterKey,
}

impl HostKeyProtector {
    /// Create a protector from raw key material
    pub fn from_key(key: [u8; MASTER_KEY_SIZE]) -> Self {
        Self {
            master: MasterKey(key),
        }
    }

    /// Create a protector with a fresh random key (not persisted)
    pub fn generate() -> Self {
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::from_key(key)
    }

    /// Load the host key from `key_file`, creating it on first use
    ///
    /// Concurrent first uses agree on a single key: the file is created
    /// without replacing an existing one, and a writer that loses the race
    /// loads the winner's key.
    pub fn load_or_create(key_file: &Path) -> BackupResult<Self> {
        if key_file.exists() {
            return Self::load(key_file);
        }

        let protector = Self::generate();
        let mut encoded = STANDARD.encode(protector.master.0);
        let created = create_private_file(key_file, encoded.as_bytes());
        encoded.zeroize();

        if created? {
            info!(path = %key_file.display(), "Created new host protection key");
            Ok(protector)
        } else {
            Self::load(key_file)
        }
    }

    /// Load an existing host key from `key_file`
    pub fn load(key_file: &Path) -> BackupResult<Self> {
        let mut encoded = fs::read_to_string(key_file)
            .map_err(|e| BackupError::Io(format!("Failed to read host key file: {}", e)))?;
        let decoded = STANDARD.decode(encoded.trim());
        encoded.zeroize();

        let mut bytes = decoded.map_err(|e| {
            BackupError::Protection(format!("Invalid host key encoding: {}", e))
        })?;
        if bytes.len() != MASTER_KEY_SIZE {
            bytes.zeroize();
            return Err(BackupError::Protection(format!(
                "Invalid host key size: expected {}, got {}",
                MASTER_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; MASTER_KEY_SIZE];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self::from_key(key))
    }

    fn cipher_for(&self, purpose: &str) -> BackupResult<Aes256Gcm> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.master.0)
            .map_err(|e| BackupError::Protection(format!("Invalid master key: {}", e)))?;
        mac.update(PURPOSE_LABEL);
        mac.update(purpose.as_bytes());
        let mut subkey = [0u8; MASTER_KEY_SIZE];
        subkey.copy_from_slice(&mac.finalize().into_bytes());

        let cipher = Aes256Gcm::new_from_slice(&subkey)
            .map_err(|e| BackupError::Protection(format!("Failed to create cipher: {}", e)));
        subkey.zeroize();
        cipher
    }
}

impl DataProtector for HostKeyProtector {
    fn protect(&self, purpose: &str, plaintext: &str) -> BackupResult<String> {
        let cipher = self.cipher_for(purpose)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| BackupError::Protection(format!("Protect failed: {}", e)))?;

        let mut payload = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
        payload.push(PAYLOAD_VERSION);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);

        Ok(STANDARD.encode(payload))
    }

    fn unprotect(&self, purpose: &str, protected: &str) -> BackupResult<String> {
        let payload = STANDARD
            .decode(protected)
            .map_err(|e| BackupError::Protection(format!("Invalid protected value: {}", e)))?;

        if payload.len() < 1 + NONCE_SIZE || payload[0] != PAYLOAD_VERSION {
            return Err(BackupError::Protection(
                "Unrecognised protected value format".to_string(),
            ));
        }

        let cipher = self.cipher_for(purpose)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&payload[1..1 + NONCE_SIZE]),
                &payload[1 + NONCE_SIZE..],
            )
            .map_err(|_| {
                BackupError::Protection(format!(
                    "Unprotect failed for purpose '{}': key mismatch or corrupted value",
                    purpose
                ))
            })?;

        String::from_utf8(plaintext).map_err(|e| {
            BackupError::Protection(format!("Invalid UTF-8 in protected value: {}", e))
        })
    }
}
