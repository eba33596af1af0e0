/// Vault capability for session key decryption
///
/// The engine never sees plaintext key material at rest: grants carry an
/// opaque ciphertext plus the encryption context it was sealed with, and a
/// vault implementation turns that back into key bytes on demand. The
/// production vault (KMS-backed) lives outside this repository; the dev
/// vault here is a base64 passthrough for local development and tests.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashMap;

use crate::error::VaultError;

/// Context the ciphertext was sealed with; must match at decryption time
pub type EncryptionContext = HashMap<String, String>;

/// Decryption capability consumed by the grant resolver
pub trait SigningVault: Send + Sync {
    fn decrypt(&self, ciphertext: &str, context: &EncryptionContext) -> Result<Vec<u8>, VaultError>;
}

/// Development vault: ciphertext is plain base64
///
/// Offers no confidentiality whatsoever and says so loudly at startup.
#[derive(Debug, Default)]
pub struct DevVault;

impl DevVault {
    pub fn new() -> Self {
        tracing::warn!("🔓 DevVault active: session keys are base64-encoded, NOT encrypted");
        Self
    }
}

impl SigningVault for DevVault {
    fn decrypt(
        &self,
        ciphertext: &str,
        _context: &EncryptionContext,
    ) -> Result<Vec<u8>, VaultError> {
        BASE64
            .decode(ciphertext)
            .map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_vault_roundtrip() {
        let vault = DevVault::new();
        let key = [7u8; 32];
        let ciphertext = BASE64.encode(key);
        let decrypted = vault.decrypt(&ciphertext, &EncryptionContext::new()).unwrap();
        assert_eq!(decrypted, key);
    }

    #[test]
    fn dev_vault_rejects_garbage() {
        let vault = DevVault::new();
        assert!(vault
            .decrypt("not-base64!!!", &EncryptionContext::new())
            .is_err());
    }
}
