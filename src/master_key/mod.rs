pub mod azure;
pub mod local;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{crypto::keys::DataKey, error::Result, rotation::RotationPolicy};

/// One trust authority able to protect the data key. The orchestrating
/// layer holds a heterogeneous set of these (`Vec<Box<dyn MasterKey>>`)
/// and only talks to them through this trait.
pub trait MasterKey: Send + Sync {
    /// Wrap `data_key`, replacing any previously wrapped value.
    fn wrap_data_key(&mut self, data_key: &[u8]) -> Result<()>;

    /// Wrap `data_key` unless this key already holds a wrapped value.
    fn wrap_if_unwrapped(&mut self, data_key: &[u8]) -> Result<()> {
        if self.encrypted_data_key().is_empty() {
            self.wrap_data_key(data_key)
        } else {
            Ok(())
        }
    }

    /// Recover the data key from the wrapped value.
    fn unwrap_data_key(&self) -> Result<DataKey>;

    /// The wrapped data key, empty when nothing has been wrapped yet.
    fn encrypted_data_key(&self) -> &str;

    fn set_encrypted_data_key(&mut self, enc: String);

    fn created_at(&self) -> DateTime<Utc>;

    fn needs_rotation(&self, policy: &RotationPolicy, now: DateTime<Utc>) -> bool {
        policy.is_due(self.created_at(), now)
    }

    /// Human-readable identity, suitable for config files and logs.
    fn identity(&self) -> String;

    /// Record persisted alongside the document.
    fn to_map(&self) -> Map<String, Value>;
}
