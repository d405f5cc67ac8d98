use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of one master key. Never fatal to the caller: the other
/// master keys protecting the same data key are still usable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not parse valid key from {0:?}")]
    Parse(String),

    #[error("invalid key reference: {0}")]
    InvalidKey(String),

    #[error("invalid key record: {0}")]
    Record(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to create key vault client")]
    ClientConstruction(#[source] BackendError),

    #[error("failed to wrap data key with key {key:?} version {version:?}")]
    Wrap {
        key: String,
        version: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to unwrap data key with key {key:?} version {version:?}")]
    Unwrap {
        key: String,
        version: String,
        #[source]
        source: BackendError,
    },

    #[error("key {key:?} version {version:?} holds no wrapped data key")]
    NotWrapped { key: String, version: String },
}

/// The underlying cause reported by a key backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("transport error: {0}")]
    Transport(#[source] Box<ureq::Transport>),

    #[error("key vault returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("data key is not valid base64url")]
    Decode(#[from] base64::DecodeError),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for BackendError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let (code, message) = response
                    .into_json::<ServiceErrorBody>()
                    .map(ServiceErrorBody::into_parts)
                    .unwrap_or_else(|_| ("Unknown".into(), String::new()));
                BackendError::Service {
                    status,
                    code,
                    message,
                }
            }
            ureq::Error::Transport(t) => BackendError::Transport(Box::new(t)),
        }
    }
}

/// Error body of a failed call. Key Vault sends
/// `{"error": {"code", "message"}}`; the Entra ID token endpoint sends
/// `{"error": "<code>", "error_description": "..."}`.
#[derive(serde::Deserialize)]
pub(crate) struct ServiceErrorBody {
    error: ServiceErrorKind,
    #[serde(default)]
    error_description: String,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ServiceErrorKind {
    Code(String),
    Detail {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    },
}

impl ServiceErrorBody {
    /// `(code, message)`
    pub(crate) fn into_parts(self) -> (String, String) {
        match self.error {
            ServiceErrorKind::Code(code) => (code, self.error_description),
            ServiceErrorKind::Detail { code, message } => (code, message),
        }
    }
}
