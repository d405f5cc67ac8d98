use std::path::{Path, PathBuf};

use aes_gcm::{Aes256Gcm, KeyInit, Nonce, aead::Aead};
use argon2::Argon2;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use super::MasterKey;
use crate::{
    crypto::{
        encoding::{decode_data_key, encode_data_key},
        keys::DataKey,
    },
    error::{BackendError, Error, Result},
};

const KEK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Master key held on this machine: a 32-byte keyfile, or a passphrase
/// stretched with Argon2id.
///
/// Identity is `file:{path}` or `passphrase:{label}`. The passphrase
/// itself is never persisted, so the label is what tells two passphrase
/// keys apart.
///
/// Wrapped layout (base64url):
/// ```text
/// keyfile:    [ nonce (12) | AES-256-GCM ciphertext + tag ]
/// passphrase: [ salt (16) | nonce (12) | AES-256-GCM ciphertext + tag ]
/// ```
pub struct LocalKey {
    source: KeySource,
    encrypted_key: String,
    created_at: DateTime<Utc>,
    /// Keyfile contents, read once.
    cached: Mutex<Option<Zeroizing<[u8; KEK_LEN]>>>,
}

enum KeySource {
    File(PathBuf),
    Passphrase {
        label: String,
        passphrase: Zeroizing<String>,
    },
}

const FILE_PREFIX: &str = "file:";
const PASSPHRASE_PREFIX: &str = "passphrase:";

/// Persisted form written by [`LocalKey::to_map`].
#[derive(Deserialize)]
struct LocalRecord {
    source: String,
    created_at: String,
    #[serde(default)]
    enc: String,
}

impl LocalKey {
    pub fn from_keyfile(path: impl Into<PathBuf>) -> Self {
        Self::with_source(KeySource::File(path.into()))
    }

    /// `label` names the key in its identity and record.
    pub fn from_passphrase(label: impl Into<String>, passphrase: &str) -> Self {
        Self::with_source(KeySource::Passphrase {
            label: label.into(),
            passphrase: Zeroizing::new(passphrase.to_owned()),
        })
    }

    /// Restore a key from the record written by [`MasterKey::to_map`].
    /// Passphrase keys need the passphrase supplied again.
    pub fn from_map(map: &Map<String, Value>, passphrase: Option<&str>) -> Result<Self> {
        let record: LocalRecord = serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| Error::Record(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&record.created_at)
            .map_err(|e| Error::Record(format!("created_at {:?}: {e}", record.created_at)))?
            .with_timezone(&Utc);

        let mut key = if let Some(path) = record.source.strip_prefix(FILE_PREFIX) {
            if path.is_empty() {
                return Err(Error::Record("keyfile source has no path".into()));
            }
            Self::from_keyfile(path)
        } else if let Some(label) = record.source.strip_prefix(PASSPHRASE_PREFIX) {
            let passphrase = passphrase.ok_or_else(|| {
                Error::Record(format!("source {:?} needs its passphrase", record.source))
            })?;
            Self::from_passphrase(label, passphrase)
        } else {
            return Err(Error::Record(format!(
                "unknown local key source {:?}",
                record.source
            )));
        };
        key.encrypted_key = record.enc;
        Ok(key.with_created_at(created_at))
    }

    fn with_source(source: KeySource) -> Self {
        Self {
            source,
            encrypted_key: String::new(),
            created_at: Utc::now().trunc_subsecs(0),
            cached: Mutex::new(None),
        }
    }

    /// Restore the creation time recorded when the key was persisted.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(0);
        self
    }

    fn keyfile_kek(&self, path: &Path) -> Result<Zeroizing<[u8; KEK_LEN]>, BackendError> {
        let mut guard = self.cached.lock();
        if let Some(ref kek) = *guard {
            return Ok(kek.clone());
        }
        let bytes = Zeroizing::new(std::fs::read(path)?);
        if bytes.len() != KEK_LEN {
            return Err(BackendError::Crypto(format!(
                "keyfile must be exactly {KEK_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut kek = Zeroizing::new([0u8; KEK_LEN]);
        kek.copy_from_slice(&bytes);
        *guard = Some(kek.clone());
        Ok(kek)
    }

    fn seal(&self, data_key: &[u8]) -> Result<String, BackendError> {
        let mut blob = Vec::new();
        let kek = match &self.source {
            KeySource::File(path) => self.keyfile_kek(path)?,
            KeySource::Passphrase { passphrase, .. } => {
                let salt: [u8; SALT_LEN] = random_bytes()?;
                blob.extend_from_slice(&salt);
                derive_kek(passphrase, &salt)?
            }
        };

        let nonce: [u8; NONCE_LEN] = random_bytes()?;
        let ciphertext = cipher(&kek)?
            .encrypt(Nonce::from_slice(&nonce), data_key)
            .map_err(|e| BackendError::Crypto(format!("wrap encrypt failed: {e}")))?;

        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(encode_data_key(&blob))
    }

    fn open(&self) -> Result<DataKey, BackendError> {
        let blob = decode_data_key(&self.encrypted_key)?;
        let (kek, rest) = match &self.source {
            KeySource::File(path) => (self.keyfile_kek(path)?, blob.as_slice()),
            KeySource::Passphrase { passphrase, .. } => {
                let (salt, rest) = blob
                    .split_at_checked(SALT_LEN)
                    .ok_or_else(|| BackendError::Malformed("wrapped key too short".into()))?;
                (derive_kek(passphrase, salt)?, rest)
            }
        };
        let (nonce, ciphertext) = rest
            .split_at_checked(NONCE_LEN)
            .ok_or_else(|| BackendError::Malformed("wrapped key too short".into()))?;

        let plaintext = cipher(&kek)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| BackendError::Crypto(format!("unwrap decrypt failed: {e}")))?;
        Ok(DataKey::from_bytes(plaintext))
    }
}

impl MasterKey for LocalKey {
    fn wrap_data_key(&mut self, data_key: &[u8]) -> Result<()> {
        match self.seal(data_key) {
            Ok(enc) => {
                self.encrypted_key = enc;
                log::info!("azkv: local encryption succeeded for {}", self.identity());
                Ok(())
            }
            Err(source) => {
                log::error!("azkv: local encryption failed for {}: {source}", self.identity());
                Err(Error::Wrap {
                    key: self.identity(),
                    version: String::new(),
                    source,
                })
            }
        }
    }

    fn unwrap_data_key(&self) -> Result<DataKey> {
        if self.encrypted_key.is_empty() {
            return Err(Error::NotWrapped {
                key: self.identity(),
                version: String::new(),
            });
        }
        self.open().map_err(|source| {
            log::error!("azkv: local decryption failed for {}: {source}", self.identity());
            Error::Unwrap {
                key: self.identity(),
                version: String::new(),
                source,
            }
        })
    }

    fn encrypted_data_key(&self) -> &str {
        &self.encrypted_key
    }

    fn set_encrypted_data_key(&mut self, enc: String) {
        self.encrypted_key = enc;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn identity(&self) -> String {
        match &self.source {
            KeySource::File(path) => format!("{FILE_PREFIX}{}", path.display()),
            KeySource::Passphrase { label, .. } => format!("{PASSPHRASE_PREFIX}{label}"),
        }
    }

    fn to_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("source".into(), Value::String(self.identity()));
        out.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        out.insert("enc".into(), Value::String(self.encrypted_key.clone()));
        out
    }
}

fn cipher(kek: &[u8; KEK_LEN]) -> Result<Aes256Gcm, BackendError> {
    Aes256Gcm::new_from_slice(kek).map_err(|e| BackendError::Crypto(e.to_string()))
}

fn derive_kek(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEK_LEN]>, BackendError> {
    let mut kek = Zeroizing::new([0u8; KEK_LEN]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut kek[..])
        .map_err(|e| BackendError::Crypto(format!("argon2 failed: {e}")))?;
    Ok(kek)
}

fn random_bytes<const N: usize>() -> Result<[u8; N], BackendError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf)
        .map_err(|e| BackendError::Crypto(format!("getrandom failed: {e}")))?;
    Ok(buf)
}
