//! Key Vault key references and their identity string / record forms.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, recognize},
    sequence::preceded,
};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const VAULT_SCHEME: &str = "https://";

/// A key held in Azure Key Vault, plus the data key it has wrapped.
///
/// Identity is the `(vault_url, name, version)` triple. The wrapped
/// data key and the creation time ride along but are not compared.
#[derive(Clone)]
pub struct KeyReference {
    vault_url: String,
    name: String,
    version: String,
    encrypted_key: String,
    created_at: DateTime<Utc>,
}

/// Persisted form of a [`KeyReference`]. Field names and order are
/// what the document format stores.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyRecord {
    #[serde(rename = "vaultUrl")]
    pub vault_url: String,
    pub key: String,
    pub version: String,
    pub created_at: String,
    #[serde(default)]
    pub enc: String,
}

fn segment(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != '/').parse(input)
}

fn vault_url(input: &str) -> IResult<&str, &str> {
    recognize((tag(VAULT_SCHEME), segment)).parse(input)
}

/// `https://{host}/keys/{name}/{version}`
fn key_url(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (
        vault_url,
        preceded(tag("/keys/"), segment),
        preceded(char('/'), segment),
    )
        .parse(input)
}

/// Version segment of a Key Vault key id (`kid`).
pub(crate) fn kid_version(kid: &str) -> Option<&str> {
    all_consuming(key_url)
        .parse(kid)
        .ok()
        .map(|(_, (_, _, version))| version)
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

impl KeyReference {
    /// Build a reference from its parts. `version` may be empty to mean
    /// the vault's current version; the first wrap pins it.
    pub fn new(
        vault_url: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self> {
        let vault_url = vault_url.into();
        let name = name.into();
        let version = version.into();

        if all_consuming(self::vault_url).parse(vault_url.as_str()).is_err() {
            return Err(Error::InvalidKey(format!(
                "vault url {vault_url:?} is not of the form https://host"
            )));
        }
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidKey(format!("invalid key name {name:?}")));
        }
        if version.contains('/') {
            return Err(Error::InvalidKey(format!("invalid key version {version:?}")));
        }

        Ok(Self {
            vault_url,
            name,
            version,
            encrypted_key: String::new(),
            created_at: now(),
        })
    }

    /// Parse `https://{host}/keys/{name}/{version}`. Any deviation from
    /// that shape is an error.
    pub fn from_url(url: &str) -> Result<Self> {
        let (_, (vault_url, name, version)) = all_consuming(key_url)
            .parse(url)
            .map_err(|_| Error::Parse(url.to_owned()))?;
        Ok(Self {
            vault_url: vault_url.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            encrypted_key: String::new(),
            created_at: now(),
        })
    }

    /// Parse a comma-separated list of key URLs, keeping input order.
    /// Empty segments are skipped; the first bad URL fails the call.
    pub fn from_urls(urls: &str) -> Result<Vec<Self>> {
        urls.split(',')
            .filter(|s| !s.is_empty())
            .map(Self::from_url)
            .collect()
    }

    /// Restore a reference from its persisted record.
    pub fn from_record(record: KeyRecord) -> Result<Self> {
        let created_at = DateTime::parse_from_rfc3339(&record.created_at)
            .map_err(|e| Error::Record(format!("created_at {:?}: {e}", record.created_at)))?
            .with_timezone(&Utc);
        let mut key = Self::new(record.vault_url, record.key, record.version)
            .map_err(|e| Error::Record(e.to_string()))?;
        if key.version.is_empty() && !record.enc.is_empty() {
            return Err(Error::Record(format!(
                "key {:?} holds a wrapped data key but no version",
                key.name
            )));
        }
        key.encrypted_key = record.enc;
        key.created_at = created_at;
        Ok(key)
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let record: KeyRecord = serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| Error::Record(e.to_string()))?;
        Self::from_record(record)
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The wrapped data key, empty until the first successful wrap.
    pub fn encrypted_data_key(&self) -> &str {
        &self.encrypted_key
    }

    pub fn set_encrypted_data_key(&mut self, enc: impl Into<String>) {
        self.encrypted_key = enc.into();
    }

    /// Fix the version a wrap was performed under.
    pub(crate) fn pin_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn is_wrapped(&self) -> bool {
        !self.encrypted_key.is_empty()
    }

    /// `{vault_url}/keys/{name}/{version}`
    pub fn identity(&self) -> String {
        self.to_string()
    }

    pub fn to_record(&self) -> KeyRecord {
        KeyRecord {
            vault_url: self.vault_url.clone(),
            key: self.name.clone(),
            version: self.version.clone(),
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            enc: self.encrypted_key.clone(),
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let record = self.to_record();
        let mut out = Map::new();
        out.insert("vaultUrl".into(), Value::String(record.vault_url));
        out.insert("key".into(), Value::String(record.key));
        out.insert("version".into(), Value::String(record.version));
        out.insert("created_at".into(), Value::String(record.created_at));
        out.insert("enc".into(), Value::String(record.enc));
        out
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/keys/{}/{}", self.vault_url, self.name, self.version)
    }
}

impl fmt::Debug for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyReference")
            .field("vault_url", &self.vault_url)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("wrapped", &self.is_wrapped())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("vault_url", &self.vault_url)
            .field("key", &self.key)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("enc", &if self.enc.is_empty() { "" } else { "***" })
            .finish()
    }
}

impl PartialEq for KeyReference {
    fn eq(&self, other: &Self) -> bool {
        self.vault_url == other.vault_url
            && self.name == other.name
            && self.version == other.version
    }
}

impl Eq for KeyReference {}

impl Hash for KeyReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vault_url.hash(state);
        self.name.hash(state);
        self.version.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone};

    use super::*;

    const URL: &str = "https://vault.example.com/keys/my-key/v1";

    #[test]
    fn parse_url() {
        let key = KeyReference::from_url(URL).unwrap();
        assert_eq!(key.vault_url(), "https://vault.example.com");
        assert_eq!(key.name(), "my-key");
        assert_eq!(key.version(), "v1");
        assert!(!key.is_wrapped());
        assert!(Utc::now() - key.created_at() < Duration::minutes(1));
    }

    #[test]
    fn format_round_trips() {
        for url in [
            URL,
            "https://myvault.vault.azure.net/keys/sops-key/0123456789abcdef0123456789abcdef",
            "https://localhost:8443/keys/k/1",
        ] {
            assert_eq!(KeyReference::from_url(url).unwrap().identity(), url);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        for url in [
            "",
            "https://vault.example.com/keys/my-key",
            "https://vault.example.com/keys/my-key/",
            "https://vault.example.com/keys//v1",
            "https://vault.example.com/keys/my-key/v1/extra",
            "https://vault.example.com//keys/my-key/v1",
            "https://vault.example.com/secrets/my-key/v1",
            "http://vault.example.com/keys/my-key/v1",
            "vault.example.com/keys/my-key/v1",
            "https:///keys/my-key/v1",
        ] {
            let err = KeyReference::from_url(url).unwrap_err();
            assert!(matches!(err, Error::Parse(ref s) if s == url), "{url:?}");
        }
    }

    #[test]
    fn parse_list() {
        assert!(KeyReference::from_urls("").unwrap().is_empty());

        let keys = KeyReference::from_urls(
            "https://a.example.com/keys/one/1,https://b.example.com/keys/two/2",
        )
        .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name(), "one");
        assert_eq!(keys[1].name(), "two");
    }

    #[test]
    fn parse_list_skips_empty_segments() {
        let keys = KeyReference::from_urls(
            ",https://a.example.com/keys/one/1,,https://b.example.com/keys/two/2,",
        )
        .unwrap();
        let names: Vec<_> = keys.iter().map(KeyReference::name).collect();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn parse_list_fails_whole_call() {
        let err = KeyReference::from_urls(
            "https://a.example.com/keys/one/1,not-a-url,https://b.example.com/keys/two/2",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(ref s) if s == "not-a-url"));

        // Segments are not trimmed.
        assert!(KeyReference::from_urls(
            "https://a.example.com/keys/one/1, https://b.example.com/keys/two/2"
        )
        .is_err());
    }

    #[test]
    fn new_validates() {
        assert!(KeyReference::new("https://vault.example.com", "k", "").is_ok());
        assert!(matches!(
            KeyReference::new("https://vault.example.com", "", "v1"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            KeyReference::new("vault.example.com", "k", "v1"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            KeyReference::new("https://vault.example.com/", "k", "v1"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn identity_ignores_wrapped_key() {
        let a = KeyReference::from_url(URL).unwrap();
        let mut b = KeyReference::from_url(URL).unwrap();
        b.set_encrypted_data_key("CIPHERTEXT");
        assert_eq!(a, b);

        let c = KeyReference::from_url("https://vault.example.com/keys/my-key/v2").unwrap();
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn map_has_fields_in_order() {
        let mut key = KeyReference::from_url(URL).unwrap();
        key.created_at = Utc.with_ymd_and_hms(2026, 10, 16, 8, 30, 5).unwrap();
        key.set_encrypted_data_key("c2VjcmV0");

        let map = key.to_map();
        let fields: Vec<_> = map.keys().map(String::as_str).collect();
        assert_eq!(fields, ["vaultUrl", "key", "version", "created_at", "enc"]);
        assert_eq!(map["vaultUrl"], "https://vault.example.com");
        assert_eq!(map["key"], "my-key");
        assert_eq!(map["version"], "v1");
        assert_eq!(map["created_at"], "2026-10-16T08:30:05Z");
        assert_eq!(map["enc"], "c2VjcmV0");
    }

    #[test]
    fn unwrapped_map_has_empty_enc() {
        let map = KeyReference::from_url(URL).unwrap().to_map();
        assert_eq!(map["enc"], "");
    }

    #[test]
    fn record_round_trips_to_the_second() {
        let mut key = KeyReference::from_url(URL).unwrap();
        key.set_encrypted_data_key("CIPHERTEXT");

        let restored = KeyReference::from_map(&key.to_map()).unwrap();
        assert_eq!(restored, key);
        assert_eq!(restored.created_at(), key.created_at());
        assert_eq!(restored.encrypted_data_key(), "CIPHERTEXT");

        let json = serde_json::to_string(&key.to_record()).unwrap();
        let record: KeyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, key.to_record());
    }

    #[test]
    fn record_accepts_offset_timestamps() {
        let record = KeyRecord {
            vault_url: "https://vault.example.com".into(),
            key: "my-key".into(),
            version: "v1".into(),
            created_at: "2026-10-16T10:30:05+02:00".into(),
            enc: String::new(),
        };
        let key = KeyReference::from_record(record).unwrap();
        assert_eq!(
            key.created_at(),
            Utc.with_ymd_and_hms(2026, 10, 16, 8, 30, 5).unwrap()
        );
    }

    #[test]
    fn record_rejects_bad_input() {
        let mut map = KeyReference::from_url(URL).unwrap().to_map();
        map.insert("created_at".into(), "yesterday".into());
        assert!(matches!(KeyReference::from_map(&map), Err(Error::Record(_))));

        let mut map = KeyReference::from_url(URL).unwrap().to_map();
        map.remove("key");
        assert!(matches!(KeyReference::from_map(&map), Err(Error::Record(_))));

        let mut map = KeyReference::from_url(URL).unwrap().to_map();
        map.insert("vaultUrl".into(), "ftp://vault".into());
        assert!(matches!(KeyReference::from_map(&map), Err(Error::Record(_))));
    }

    #[test]
    fn debug_hides_ciphertext() {
        let mut key = KeyReference::from_url(URL).unwrap();
        key.set_encrypted_data_key("SECRET-CIPHERTEXT");
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("SECRET-CIPHERTEXT"));
        assert!(dbg.contains("wrapped: true"));

        let dbg = format!("{:?}", key.to_record());
        assert!(!dbg.contains("SECRET-CIPHERTEXT"));
        assert!(dbg.contains(r#"enc: "***""#));
        assert!(dbg.contains(r#"version: "v1""#));
    }

    #[test]
    fn kid_version_is_last_segment() {
        assert_eq!(
            kid_version("https://v.vault.azure.net/keys/k/0123456789abcdef"),
            Some("0123456789abcdef")
        );
        assert_eq!(kid_version("https://v.vault.azure.net/keys/k"), None);
        assert_eq!(kid_version("https://v.vault.azure.net/keys/k/"), None);
        assert_eq!(kid_version(""), None);
    }

    #[test]
    fn record_with_ciphertext_needs_version() {
        let mut map = KeyReference::from_url(URL).unwrap().to_map();
        map.insert("version".into(), "".into());
        assert!(KeyReference::from_map(&map).is_ok());

        map.insert("enc".into(), "CIPHERTEXT".into());
        assert!(matches!(KeyReference::from_map(&map), Err(Error::Record(_))));
    }
}
