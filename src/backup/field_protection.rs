//! Bridge between protected columns and the host protection service
//!
//! Archives carry protected columns in plaintext so they can be restored on
//! another host. Export unprotects with this host's keys; restore always
//! protects again with the target host's keys.

use std::sync::Arc;

use tracing::warn;

use crate::crypto::DataProtector;
use crate::error::BackupResult;

/// Result of preparing a protected value for export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportedValue {
    Decrypted(String),
    /// The value could not be unprotected and is exported unchanged
    PassedThrough(String),
}

impl ExportedValue {
    pub fn into_inner(self) -> String {
        match self {
            ExportedValue::Decrypted(v) | ExportedValue::PassedThrough(v) => v,
        }
    }

    pub fn is_passed_through(&self) -> bool {
        matches!(self, ExportedValue::PassedThrough(_))
    }
}

#[derive(Clone)]
pub struct FieldProtectionBridge {
    protector: Arc<dyn DataProtector>,
}

impl FieldProtectionBridge {
    pub fn new(protector: Arc<dyn DataProtector>) -> Self {
        Self { protector }
    }

    /// Unprotect a value for the archive
    ///
    /// A value that fails to unprotect is logged and passed through so one
    /// corrupt field never fails a whole backup.
    pub fn decrypt_for_export(&self, value: &str, purpose: &str) -> ExportedValue {
        if value.is_empty() {
            return ExportedValue::Decrypted(String::new());
        }

        match self.protector.unprotect(purpose, value) {
            Ok(plaintext) => ExportedValue::Decrypted(plaintext),
            Err(e) => {
                warn!(
                    purpose,
                    error = %e,
                    "Protected field could not be decrypted, exporting it unchanged"
                );
                ExportedValue::PassedThrough(value.to_string())
            }
        }
    }

    /// Protect an archived plaintext value with this host's key
    pub fn encrypt_for_import(&self, value: &str, purpose: &str) -> BackupResult<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        self.protector.protect(purpose, value)
    }

    pub fn protector(&self) -> &Arc<dyn DataProtector> {
        &self.protector
    }
}

impl std::fmt::Debug for FieldProtectionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldProtectionBridge").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{purposes, HostKeyProtector};

    fn bridge(key: u8) -> FieldProtectionBridge {
        FieldProtectionBridge::new(Arc::new(HostKeyProtector::from_key([key; 32])))
    }

    #[test]
    fn test_export_then_import_on_another_host() {
        let source = bridge(1);
        let target = bridge(2);

        let stored = source
            .protector()
            .protect(purposes::BOT_TOKEN, "123456:ABC-DEF")
            .unwrap();
        let exported = source.decrypt_for_export(&stored, purposes::BOT_TOKEN);
        assert_eq!(exported, ExportedValue::Decrypted("123456:ABC-DEF".into()));

        let imported = target
            .encrypt_for_import(&exported.into_inner(), purposes::BOT_TOKEN)
            .unwrap();
        assert_ne!(imported, stored);
        assert_eq!(
            target.protector().unprotect(purposes::BOT_TOKEN, &imported).unwrap(),
            "123456:ABC-DEF"
        );
    }

    #[test]
    fn test_corrupt_value_passes_through() {
        let exported = bridge(1).decrypt_for_export("not-a-protected-value", purposes::API_KEYS);
        assert!(exported.is_passed_through());
        assert_eq!(exported.into_inner(), "not-a-protected-value");
    }

    #[test]
    fn test_wrong_purpose_passes_through() {
        let bridge = bridge(1);
        let stored = bridge.protector().protect(purposes::TOTP_SECRETS, "JBSWY3DP").unwrap();
        assert!(bridge
            .decrypt_for_export(&stored, purposes::API_KEYS)
            .is_passed_through());
    }

    #[test]
    fn test_empty_values_are_untouched() {
        let bridge = bridge(1);
        assert_eq!(
            bridge.decrypt_for_export("", purposes::API_KEYS),
            ExportedValue::Decrypted(String::new())
        );
        assert_eq!(bridge.encrypt_for_import("", purposes::API_KEYS).unwrap(), "");
    }
}
