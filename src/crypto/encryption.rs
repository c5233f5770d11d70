//! AES-256-GCM archive encryption
//!
//! Wraps a plain archive in a self-describing envelope:
//!
//! ```text
//! offset 0    len 7    magic header "TGAENC\0"
//! offset 7    len 32   PBKDF2 salt
//! offset 39   len 12   AES-GCM nonce
//! offset 51   len N    ciphertext (N = plaintext length)
//! offset 51+N len 16   authentication tag
//! ```
//!
//! Salt and nonce are freshly generated for every call, so encrypting the
//! same archive twice with the same passphrase never yields the same bytes.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

use crate::error::{BackupError, BackupResult};

use super::key_derivation::{derive_key, generate_salt, SALT_SIZE};

/// Magic prefix identifying an encrypted archive
pub const MAGIC_HEADER: &[u8; 7] = b"TGAENC\0";

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Bytes preceding the ciphertext: magic, salt and nonce
pub const HEADER_SIZE: usize = MAGIC_HEADER.len() + SALT_SIZE + NONCE_SIZE;

/// Check whether a blob carries the encrypted-archive magic header
///
/// Only the prefix is inspected; no decryption is attempted.
pub fn is_encrypted(blob: &[u8]) -> bool {
    blob.starts_with(MAGIC_HEADER)
}

/// Encrypt a plain archive with a passphrase
pub fn encrypt_archive(plaintext: &[u8], passphrase: &str) -> BackupResult<Vec<u8>> {
    let salt = generate_salt();
    let key = derive_key(passphrase, &salt)?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Crypto(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext, matching the wire layout
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| BackupError::Crypto(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + sealed.len());
    out.extend_from_slice(MAGIC_HEADER);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);

    Ok(out)
}

/// Decrypt an encrypted archive
///
/// Fails with [`BackupError::Crypto`] when the header is missing, the blob
/// is truncated, or the authentication tag does not verify (wrong
/// passphrase or corruption). No plaintext is returned unless the tag
/// verifies.
pub fn decrypt_archive(blob: &[u8], passphrase: &str) -> BackupResult<Vec<u8>> {
    if !is_encrypted(blob) {
        return Err(BackupError::Crypto(
            "Missing encrypted archive header".to_string(),
        ));
    }

    if blob.len() < HEADER_SIZE + TAG_SIZE {
        return Err(BackupError::Crypto(format!(
            "Encrypted archive truncated: {} bytes",
            blob.len()
        )));
    }

    let salt = &blob[MAGIC_HEADER.len()..MAGIC_HEADER.len() + SALT_SIZE];
    let nonce_bytes = &blob[MAGIC_HEADER.len() + SALT_SIZE..HEADER_SIZE];
    let sealed = &blob[HEADER_SIZE..];

    let key = derive_key(passphrase, salt)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| BackupError::Crypto(format!("Failed to create cipher: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| {
            BackupError::Crypto(
                "Decryption failed: wrong passphrase or corrupted archive".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let plaintext = b"Hello, World!";

        let encrypted = encrypt_archive(plaintext, "passphrase").unwrap();
        let decrypted = decrypt_archive(&encrypted, "passphrase").unwrap();

        assert_eq!(plaintext, decrypted.as_slice());
    }

    #[test]
    fn test_layout() {
        let plaintext = b"0123456789";
        let encrypted = encrypt_archive(plaintext, "passphrase").unwrap();

        assert_eq!(&encrypted[..7], b"TGAENC\0");
        assert_eq!(encrypted.len(), 51 + plaintext.len() + 16);
        assert!(is_encrypted(&encrypted));
    }

    #[test]
    fn test_fresh_salt_and_nonce() {
        let plaintext = b"same input";

        let encrypted1 = encrypt_archive(plaintext, "passphrase").unwrap();
        let encrypted2 = encrypt_archive(plaintext, "passphrase").unwrap();

        // Salt and nonce must differ between calls
        assert_ne!(encrypted1[7..39], encrypted2[7..39]);
        assert_ne!(encrypted1[39..51], encrypted2[39..51]);
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let encrypted = encrypt_archive(b"secret rows", "correct").unwrap();

        let result = decrypt_archive(&encrypted, "wrong");
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }

    #[test]
    fn test_any_flipped_byte_fails() {
        let encrypted = encrypt_archive(b"tamper me", "passphrase").unwrap();

        // One position from each region: magic, salt, nonce, ciphertext, tag
        for index in [0, 3, 10, 40, 52, encrypted.len() - 1] {
            let mut tampered = encrypted.clone();
            tampered[index] ^= 0x01;
            let result = decrypt_archive(&tampered, "passphrase");
            assert!(
                matches!(result, Err(BackupError::Crypto(_))),
                "flip at {} was not detected",
                index
            );
        }
    }

    #[test]
    fn test_truncated_blob_fails() {
        let encrypted = encrypt_archive(b"data", "passphrase").unwrap();

        let result = decrypt_archive(&encrypted[..HEADER_SIZE + 4], "passphrase");
        assert!(matches!(result, Err(BackupError::Crypto(_))));
    }

    #[test]
    fn test_is_encrypted_plain() {
        assert!(!is_encrypted(b"{\"version\":\"2.0\"}"));
        assert!(!is_encrypted(b"TGAENC"));
        assert!(!is_encrypted(b""));
    }

    #[test]
    fn test_empty_plaintext() {
        let encrypted = encrypt_archive(b"", "passphrase").unwrap();
        let decrypted = decrypt_archive(&encrypted, "passphrase").unwrap();
        assert!(decrypted.is_empty());
    }
}
