//! Azure Key Vault master keys for envelope encryption.
//!
//! A random data key encrypts the document; each master key wraps that
//! data key independently so any one of them can recover it. This crate
//! provides the Key Vault master key, its identity string and persisted
//! record, and its rotation policy.

pub mod config;
pub mod crypto;
pub mod error;
pub mod key;
pub mod kms;
pub mod master_key;
pub mod rotation;

pub use config::{Config, Credentials};
pub use crypto::keys::DataKey;
pub use error::{BackendError, Error, Result};
pub use key::{KeyRecord, KeyReference};
pub use kms::{ClientFactory, KeyVaultClient, WrappedKey, azure::EnvClientFactory};
pub use master_key::{MasterKey, azure::AzureKeyVaultKey, local::LocalKey};
pub use rotation::RotationPolicy;
