use zeroize::Zeroizing;

use super::{
    encoding::{decode_data_key, encode_data_key},
    keys::DataKey,
};
use crate::{
    error::{BackendError, Error, Result},
    key::KeyReference,
    kms::{ClientFactory, KeyVaultClient, WrappedKey},
};

fn connect(factory: &dyn ClientFactory, key: &KeyReference) -> Result<Box<dyn KeyVaultClient>> {
    factory.client().map_err(|e| {
        log::error!(
            "azkv: failed to create key vault client for key {} version {}: {e}",
            key.name(),
            key.version()
        );
        Error::ClientConstruction(e)
    })
}

/// Check a remote wrap result and settle the version the ciphertext is
/// bound to. A pinned version always wins over what the vault reports.
fn accept(key: &KeyReference, wrapped: WrappedKey) -> Result<WrappedKey, BackendError> {
    if wrapped.ciphertext.is_empty() {
        return Err(BackendError::Malformed("empty ciphertext".into()));
    }
    if !key.version().is_empty() {
        return Ok(WrappedKey {
            version: key.version().to_owned(),
            ..wrapped
        });
    }
    if wrapped.version.is_empty() || wrapped.version.contains('/') {
        return Err(BackendError::Malformed(format!(
            "vault did not report a usable key version ({:?})",
            wrapped.version
        )));
    }
    Ok(wrapped)
}

/// Wrap `data_key` under the referenced Key Vault key and store the
/// ciphertext on `key`, replacing any previous value. An unversioned
/// reference is pinned to the version that did the wrap. `key` is left
/// untouched on failure.
pub fn wrap(key: &mut KeyReference, factory: &dyn ClientFactory, data_key: &[u8]) -> Result<()> {
    let client = connect(factory, key)?;
    let plaintext = Zeroizing::new(encode_data_key(data_key));

    let result = client
        .wrap_key(key.vault_url(), key.name(), key.version(), &plaintext)
        .and_then(|wrapped| accept(key, wrapped));

    match result {
        Ok(WrappedKey {
            ciphertext,
            version,
        }) => {
            key.pin_version(version);
            key.set_encrypted_data_key(ciphertext);
            log::info!(
                "azkv: encryption succeeded for key {} version {}",
                key.name(),
                key.version()
            );
            Ok(())
        }
        Err(source) => {
            log::error!(
                "azkv: encryption failed for key {} version {}: {source}",
                key.name(),
                key.version()
            );
            Err(Error::Wrap {
                key: key.name().to_owned(),
                version: key.version().to_owned(),
                source,
            })
        }
    }
}

/// Like [`wrap`], but does nothing when `key` already holds a wrapped
/// data key.
pub fn wrap_if_unwrapped(
    key: &mut KeyReference,
    factory: &dyn ClientFactory,
    data_key: &[u8],
) -> Result<()> {
    if key.is_wrapped() {
        return Ok(());
    }
    wrap(key, factory, data_key)
}

/// Recover the plaintext data key from the ciphertext stored on `key`.
pub fn unwrap(key: &KeyReference, factory: &dyn ClientFactory) -> Result<DataKey> {
    if !key.is_wrapped() {
        return Err(Error::NotWrapped {
            key: key.name().to_owned(),
            version: key.version().to_owned(),
        });
    }
    let client = connect(factory, key)?;

    let result = client
        .unwrap_key(
            key.vault_url(),
            key.name(),
            key.version(),
            key.encrypted_data_key(),
        )
        .and_then(|text| {
            let text = Zeroizing::new(text);
            decode_data_key(&text).map_err(BackendError::from)
        });

    match result {
        Ok(bytes) => {
            log::info!(
                "azkv: decryption succeeded for key {} version {}",
                key.name(),
                key.version()
            );
            Ok(DataKey::from_bytes(bytes))
        }
        Err(source) => {
            log::error!(
                "azkv: decryption failed for key {} version {}: {source}",
                key.name(),
                key.version()
            );
            Err(Error::Unwrap {
                key: key.name().to_owned(),
                version: key.version().to_owned(),
                source,
            })
        }
    }
}
