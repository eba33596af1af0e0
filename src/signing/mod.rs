/// Signing Layer
///
/// Session key grants, the grant resolver that enforces target and spend
/// permissions, and the vault capability that opens encrypted session keys.

// Vault capability trait and the dev implementation
pub mod vault;

// Grant model, resolver and ephemeral signer
pub mod grants;

pub use grants::{GrantPermissions, GrantResolver, SessionKeyGrant, SessionSigner, SpendLimits};
pub use vault::{DevVault, EncryptionContext, SigningVault};
