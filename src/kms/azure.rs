use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{ClientFactory, KeyVaultClient, WrappedKey};
use crate::{
    config::{Config, Credentials},
    error::{BackendError, Result},
    key::kid_version,
};

/// Key Vault wrapping algorithm for RSA keys.
pub const WRAP_ALGORITHM: &str = "RSA-OAEP-256";

const VAULT_SCOPE: &str = "https://vault.azure.net/.default";

#[derive(Serialize)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct KeyOperationResponse {
    #[serde(default)]
    kid: Option<String>,
    value: Option<String>,
}

impl KeyOperationResponse {
    /// Version segment of `kid`, the key that actually served the call.
    fn key_version(&self) -> Option<&str> {
        self.kid.as_deref().and_then(kid_version)
    }

    fn into_value(self, operation: &str) -> Result<String, BackendError> {
        self.value
            .ok_or_else(|| BackendError::Malformed(format!("{operation} response has no value")))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Key Vault REST client authenticated with a bearer token.
pub struct HttpKeyVaultClient {
    agent: ureq::Agent,
    token: Zeroizing<String>,
    api_version: String,
}

impl HttpKeyVaultClient {
    pub fn new(agent: ureq::Agent, token: Zeroizing<String>, api_version: String) -> Self {
        Self {
            agent,
            token,
            api_version,
        }
    }

    /// Obtain a token through the client-credentials flow and build a
    /// client around it.
    pub fn connect(config: &Config, credentials: &Credentials) -> Result<Self, BackendError> {
        let agent = build_agent(config);
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.authority_host, credentials.tenant_id
        );

        let resp: TokenResponse = agent
            .post(&url)
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", VAULT_SCOPE),
            ])?
            .into_json()?;

        let token = Zeroizing::new(resp.access_token);
        if token.is_empty() {
            return Err(BackendError::Malformed("empty access token".into()));
        }
        Ok(Self::new(agent, token, config.api_version.clone()))
    }

    fn key_operation(
        &self,
        operation: &str,
        vault_url: &str,
        name: &str,
        version: &str,
        value: &str,
    ) -> Result<KeyOperationResponse, BackendError> {
        let url = operation_url(vault_url, name, version, operation);
        let body = serde_json::to_string(&KeyOperationRequest {
            alg: WRAP_ALGORITHM,
            value,
        })
        .map(Zeroizing::new)
        .map_err(|e| BackendError::Malformed(e.to_string()))?;
        let authorization = Zeroizing::new(format!("Bearer {}", self.token.as_str()));

        let resp: KeyOperationResponse = self
            .agent
            .post(&url)
            .query("api-version", &self.api_version)
            .set("Authorization", &authorization)
            .set("Content-Type", "application/json")
            .send_string(&body)?
            .into_json()?;

        log::debug!(
            "azkv: {operation} answered by {}",
            resp.kid.as_deref().unwrap_or("<unknown kid>")
        );
        Ok(resp)
    }
}

impl KeyVaultClient for HttpKeyVaultClient {
    fn wrap_key(
        &self,
        vault_url: &str,
        name: &str,
        version: &str,
        plaintext: &str,
    ) -> Result<WrappedKey, BackendError> {
        let resp = self.key_operation("encrypt", vault_url, name, version, plaintext)?;
        let version = resp.key_version().unwrap_or(version).to_owned();
        Ok(WrappedKey {
            ciphertext: resp.into_value("encrypt")?,
            version,
        })
    }

    fn unwrap_key(
        &self,
        vault_url: &str,
        name: &str,
        version: &str,
        ciphertext: &str,
    ) -> Result<String, BackendError> {
        self.key_operation("decrypt", vault_url, name, version, ciphertext)?
            .into_value("decrypt")
    }
}

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Reads service principal credentials from the environment each time a
/// client is requested.
pub struct EnvClientFactory {
    config: Config,
    lookup: Box<Lookup>,
}

impl EnvClientFactory {
    pub fn new(config: Config) -> Self {
        Self::with_lookup(config, |name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup` instead of the process environment.
    pub fn with_lookup<F>(config: Config, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            config,
            lookup: Box::new(lookup),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl ClientFactory for EnvClientFactory {
    fn client(&self) -> Result<Box<dyn KeyVaultClient>, BackendError> {
        let credentials = Credentials::from_lookup(&self.lookup)?;
        let client = HttpKeyVaultClient::connect(&self.config, &credentials)?;
        Ok(Box::new(client))
    }
}

fn build_agent(config: &Config) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// `{vault}/keys/{name}/{version}/{operation}`; an empty version
/// addresses the key's current version.
fn operation_url(vault_url: &str, name: &str, version: &str, operation: &str) -> String {
    if version.is_empty() {
        format!("{vault_url}/keys/{name}/{operation}")
    } else {
        format!("{vault_url}/keys/{name}/{version}/{operation}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            operation_url("https://v.vault.azure.net", "k", "abc123", "encrypt"),
            "https://v.vault.azure.net/keys/k/abc123/encrypt"
        );
        assert_eq!(
            operation_url("https://v.vault.azure.net", "k", "", "decrypt"),
            "https://v.vault.azure.net/keys/k/decrypt"
        );
    }

    #[test]
    fn request_body_shape() {
        let body = KeyOperationRequest {
            alg: WRAP_ALGORITHM,
            value: "AQID",
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"alg":"RSA-OAEP-256","value":"AQID"}"#
        );
    }

    #[test]
    fn response_body_shape() {
        let resp: KeyOperationResponse = serde_json::from_str(
            r#"{"kid":"https://v.vault.azure.net/keys/k/abc123","value":"CIPHERTEXT"}"#,
        )
        .unwrap();
        assert_eq!(resp.key_version(), Some("abc123"));
        assert_eq!(resp.into_value("encrypt").unwrap(), "CIPHERTEXT");

        let resp: KeyOperationResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.key_version().is_none());
        assert!(matches!(
            resp.into_value("decrypt"),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn token_response_shape() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"token_type":"Bearer","expires_in":3599,"access_token":"eyJ0eXAi"}"#,
        )
        .unwrap();
        assert_eq!(resp.access_token, "eyJ0eXAi");
    }

    #[test]
    fn factory_requires_credentials() {
        let factory = EnvClientFactory::with_lookup(Config::default(), |_| None);
        let err = factory.client().err().unwrap();
        assert!(matches!(
            err,
            BackendError::MissingCredential("AZURE_TENANT_ID")
        ));
    }

    #[test]
    fn unreachable_authority_is_a_transport_error() {
        let config = Config {
            authority_host: "http://127.0.0.1:9".into(),
            timeout: Some(std::time::Duration::from_secs(2)),
            ..Config::default()
        };
        let credentials = Credentials {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: Zeroizing::new("secret".into()),
        };
        let err = HttpKeyVaultClient::connect(&config, &credentials)
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
