pub mod azure;

use crate::error::BackendError;

/// Output of a remote wrap.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ciphertext: String,
    /// Version of the key that performed the wrap. Empty if the vault
    /// did not say.
    pub version: String,
}

/// An authenticated handle to a Key Vault. Key material crosses this
/// boundary as text only.
pub trait KeyVaultClient {
    /// Encrypt `plaintext` (base64url) under the given key. An empty
    /// `version` selects the key's current version.
    fn wrap_key(
        &self,
        vault_url: &str,
        name: &str,
        version: &str,
        plaintext: &str,
    ) -> Result<WrappedKey, BackendError>;

    /// Decrypt `ciphertext` under the given key; returns the plaintext
    /// as base64url text.
    fn unwrap_key(
        &self,
        vault_url: &str,
        name: &str,
        version: &str,
        ciphertext: &str,
    ) -> Result<String, BackendError>;
}

/// Builds a fresh authenticated client for every wrap or unwrap.
pub trait ClientFactory: Send + Sync + 'static {
    fn client(&self) -> Result<Box<dyn KeyVaultClient>, BackendError>;
}
