//! Environment-driven configuration.
//!
//! Everything is read through a lookup function so callers (and tests)
//! can supply values without touching the process environment.

use std::time::Duration as StdDuration;

use chrono::Duration;
use zeroize::Zeroizing;

use crate::{
    error::{BackendError, Error, Result},
    rotation::{DEFAULT_ROTATION_DAYS, RotationPolicy},
};

pub const DEFAULT_API_VERSION: &str = "7.4";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tunables for the Key Vault adapter and the rotation policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Key Vault REST `api-version` query parameter.
    pub api_version: String,
    /// Entra ID authority used for the client-credentials token flow.
    pub authority_host: String,
    /// Per-request HTTP timeout. `None` leaves requests unbounded.
    pub timeout: Option<StdDuration>,
    pub rotation: RotationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.into(),
            timeout: None,
            rotation: RotationPolicy::default(),
        }
    }
}

impl Config {
    /// Read `AZKV_API_VERSION`, `AZKV_TIMEOUT_SECS`, `AZKV_ROTATION_DAYS`
    /// and `AZURE_AUTHORITY_HOST`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("AZKV_API_VERSION").filter(|v| !v.is_empty()) {
            config.api_version = v;
        }
        if let Some(host) = lookup("AZURE_AUTHORITY_HOST").filter(|v| !v.is_empty()) {
            config.authority_host = host.trim_end_matches('/').to_owned();
        }
        if let Some(raw) = lookup("AZKV_TIMEOUT_SECS") {
            let secs = parse_positive("AZKV_TIMEOUT_SECS", &raw)?;
            config.timeout = Some(StdDuration::from_secs(secs as u64));
        }
        if let Some(raw) = lookup("AZKV_ROTATION_DAYS") {
            let days = parse_positive("AZKV_ROTATION_DAYS", &raw)?;
            let threshold = Duration::try_days(days)
                .ok_or_else(|| Error::Config(format!("AZKV_ROTATION_DAYS={raw} is out of range")))?;
            config.rotation = RotationPolicy::new(threshold);
        }

        log::debug!(
            "azkv: api-version {}, rotation after {} days",
            config.api_version,
            config.rotation.threshold().num_days()
        );
        Ok(config)
    }
}

fn parse_positive(name: &str, raw: &str) -> Result<i64> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

/// Service principal credentials for the client-credentials flow.
#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
}

impl Credentials {
    /// Read `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackendError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(BackendError::MissingCredential(name))
        };
        Ok(Self {
            tenant_id: require("AZURE_TENANT_ID")?,
            client_id: require("AZURE_CLIENT_ID")?,
            client_secret: Zeroizing::new(require("AZURE_CLIENT_SECRET")?),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}
