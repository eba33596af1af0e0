/// Session key grants and the grant resolver
///
/// A grant is a scoped, time-bounded signing credential delegated by a user
/// to the backend: an encrypted session key plus the permissions it may be
/// used under. The resolver finds a still-valid grant for a concrete
/// target/value pair and turns it into an ephemeral signer. The engine never
/// signs anything without a grant from here.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::GrantError;
use crate::signing::vault::{EncryptionContext, SigningVault};
use crate::workflow::storage::WorkflowStorage;

/// Spend ceilings declared on a grant, in base units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendLimits {
    #[serde(default)]
    pub max_spend_per_tx: Option<u128>,
    /// Declared but not yet tracked; see the resolver's limit check
    #[serde(default)]
    pub max_spend_per_day: Option<u128>,
}

/// What a session key is allowed to do
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantPermissions {
    /// Contract addresses this key may sign actions against
    #[serde(default)]
    pub allowed_targets: Vec<String>,
    #[serde(default)]
    pub spend_limits: Option<SpendLimits>,
}

/// A scoped, time-bounded signing credential
///
/// Created by the provisioning flow; read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub public_address: String,
    /// Opaque ciphertext; only the vault can open it
    pub encrypted_private_key: String,
    pub encryption_context: EncryptionContext,
    pub permissions: GrantPermissions,
    pub expires_at: DateTime<Utc>,
    pub description: Option<String>,
}

impl SessionKeyGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Ephemeral signer derived from a grant's session key
///
/// Holds the key only for the duration of one signing operation; the raw
/// byte buffer handed in is zeroed immediately and the inner key zeroes
/// itself on drop.
pub struct SessionSigner {
    key: SigningKey,
}

impl SessionSigner {
    pub fn from_key_bytes(mut bytes: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        Self { key }
    }

    /// Address derived from the verifying key (last 20 bytes, hex)
    pub fn address(&self) -> String {
        let verifying = self.key.verifying_key().to_bytes();
        format!("0x{}", hex::encode(&verifying[12..]))
    }

    /// Sign a message (typically a quote id), returning the signature hex
    pub fn sign(&self, message: &str) -> String {
        hex::encode(self.key.sign(message.as_bytes()).to_bytes())
    }
}

/// Finds valid grants and produces signers from them
pub struct GrantResolver {
    storage: WorkflowStorage,
    vault: Arc<dyn SigningVault>,
}

impl GrantResolver {
    pub fn new(storage: WorkflowStorage, vault: Arc<dyn SigningVault>) -> Self {
        Self { storage, vault }
    }

    /// Find an unexpired grant permitting `target` at `value`.
    ///
    /// Candidates are the user's unexpired grants whose allowed targets
    /// contain `target`; the first one whose spend-limit check passes wins.
    /// Returns None when nothing qualifies; the caller must treat that as
    /// a hard stop, never signing without a grant.
    pub async fn find_valid_grant(
        &self,
        user_id: Uuid,
        target: &str,
        value: u128,
    ) -> Result<Option<SessionKeyGrant>, GrantError> {
        let candidates = self.storage.grants_for_user(user_id, Utc::now()).await?;

        for grant in candidates {
            if !grant
                .permissions
                .allowed_targets
                .iter()
                .any(|t| t.eq_ignore_ascii_case(target))
            {
                continue;
            }

            if self.check_spend_limits(&grant, value) {
                tracing::info!(
                    "🔑 Grant {} authorizes target {} at value {}",
                    grant.id,
                    target,
                    value
                );
                return Ok(Some(grant));
            }
            tracing::warn!(
                "🚫 Grant {} denied: value {} exceeds its spend limits",
                grant.id,
                value
            );
        }

        tracing::warn!(
            "🚫 No valid grant for user {} target {} value {}",
            user_id,
            target,
            value
        );
        Ok(None)
    }

    /// Per-transaction ceiling check.
    ///
    /// A grant without declared spend limits permits any value, a
    /// backward-compatibility default, logged every time it is relied on.
    /// The daily cumulative limit is declared in the permission shape but
    /// not yet tracked; its presence is logged, not enforced.
    fn check_spend_limits(&self, grant: &SessionKeyGrant, value: u128) -> bool {
        let Some(limits) = &grant.permissions.spend_limits else {
            tracing::warn!(
                "🔓 Grant {} declares no spend limits; permitting value {} by default",
                grant.id,
                value
            );
            return true;
        };

        if let Some(max_per_tx) = limits.max_spend_per_tx {
            if value > max_per_tx {
                return false;
            }
        }

        if limits.max_spend_per_day.is_some() {
            tracing::debug!(
                "Grant {} declares a daily limit (cumulative tracking not implemented)",
                grant.id
            );
        }

        true
    }

    /// Decrypt a grant's session key into an ephemeral signer.
    ///
    /// The decrypted key's derived address must match the grant's stored
    /// address; a mismatch means the ciphertext or the row was tampered with.
    pub fn signer_for_grant(&self, grant: &SessionKeyGrant) -> Result<SessionSigner, GrantError> {
        let mut key_bytes = self
            .vault
            .decrypt(&grant.encrypted_private_key, &grant.encryption_context)?;

        let array: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            GrantError::KeyMaterial(format!("expected 32 key bytes, got {}", key_bytes.len()))
        })?;
        key_bytes.zeroize();

        let signer = SessionSigner::from_key_bytes(array);
        if !signer.address().eq_ignore_ascii_case(&grant.public_address) {
            return Err(GrantError::AddressMismatch {
                derived: signer.address(),
                stored: grant.public_address.clone(),
            });
        }

        Ok(signer)
    }
}
