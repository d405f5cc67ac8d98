use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::MasterKey;
use crate::{
    crypto::{envelope, keys::DataKey},
    error::Result,
    key::KeyReference,
    kms::ClientFactory,
};

/// A master key backed by an RSA key in Azure Key Vault.
pub struct AzureKeyVaultKey {
    reference: KeyReference,
    factory: Arc<dyn ClientFactory>,
}

impl AzureKeyVaultKey {
    pub fn new(reference: KeyReference, factory: Arc<dyn ClientFactory>) -> Self {
        Self { reference, factory }
    }

    pub fn from_url(url: &str, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        Ok(Self::new(KeyReference::from_url(url)?, factory))
    }

    /// One master key per URL in a comma-separated list.
    pub fn from_urls(urls: &str, factory: Arc<dyn ClientFactory>) -> Result<Vec<Self>> {
        Ok(KeyReference::from_urls(urls)?
            .into_iter()
            .map(|reference| Self::new(reference, factory.clone()))
            .collect())
    }

    pub fn from_map(map: &Map<String, Value>, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        Ok(Self::new(KeyReference::from_map(map)?, factory))
    }

    pub fn reference(&self) -> &KeyReference {
        &self.reference
    }

    pub fn into_reference(self) -> KeyReference {
        self.reference
    }
}

impl MasterKey for AzureKeyVaultKey {
    fn wrap_data_key(&mut self, data_key: &[u8]) -> Result<()> {
        envelope::wrap(&mut self.reference, self.factory.as_ref(), data_key)
    }

    fn wrap_if_unwrapped(&mut self, data_key: &[u8]) -> Result<()> {
        envelope::wrap_if_unwrapped(&mut self.reference, self.factory.as_ref(), data_key)
    }

    fn unwrap_data_key(&self) -> Result<DataKey> {
        envelope::unwrap(&self.reference, self.factory.as_ref())
    }

    fn encrypted_data_key(&self) -> &str {
        self.reference.encrypted_data_key()
    }

    fn set_encrypted_data_key(&mut self, enc: String) {
        self.reference.set_encrypted_data_key(enc);
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.reference.created_at()
    }

    fn identity(&self) -> String {
        self.reference.identity()
    }

    fn to_map(&self) -> Map<String, Value> {
        self.reference.to_map()
    }
}

impl fmt::Debug for AzureKeyVaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AzureKeyVaultKey")
            .field(&self.reference)
            .finish()
    }
}
