use crate::{
    backend::RetryPolicy,
    capability::{Ability, CapabilityTemplate},
    keypair::InvalidSecretKey,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, time::Duration};

const DEFAULT_DELEGATION_TTL_SECS: u64 = 24 * 60 * 60;

/// The configuration of a delegation issuer.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IssuerConfig {
    /// The domain sign-in messages must be bound to.
    pub domain: String,

    /// The hex encoded secp256k1 secret the issuer signs with. A random key is used when absent.
    #[serde(skip_serializing)]
    pub signing_key: Option<String>,

    /// How long an issued nonce can be used for, in seconds.
    pub nonce_ttl_secs: u64,

    /// How often expired nonces are dropped, in seconds.
    pub nonce_purge_interval_secs: u64,

    /// The deadline for handling a single issuance request, in seconds.
    pub request_timeout_secs: u64,

    /// How initializing the signing backend is retried.
    pub init_retry: RetryConfig,

    /// The endpoints delegations can be requested on.
    pub endpoints: Vec<EndpointProfile>,
}

impl IssuerConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that this configuration can be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.is_empty() {
            return Err(ConfigError::Validation { field: "domain", message: "cannot be empty".into() });
        }
        if self.nonce_ttl_secs == 0 {
            return Err(ConfigError::Validation { field: "nonce_ttl_secs", message: "must be positive".into() });
        }
        if self.nonce_purge_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "nonce_purge_interval_secs",
                message: "must be positive".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation { field: "request_timeout_secs", message: "must be positive".into() });
        }
        if self.init_retry.max_attempts == 0 {
            return Err(ConfigError::Validation {
                field: "init_retry.max_attempts",
                message: "must be positive".into(),
            });
        }
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name.clone()));
            }
            if endpoint.delegations.is_empty() || endpoint.delegations.iter().any(Vec::is_empty) {
                return Err(ConfigError::EmptyEndpoint(endpoint.name.clone()));
            }
        }
        Ok(())
    }

    /// Find the endpoint with the given name.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointProfile> {
        self.endpoints.iter().find(|endpoint| endpoint.name == name)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    pub fn nonce_purge_interval(&self) -> Duration {
        Duration::from_secs(self.nonce_purge_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".into(),
            signing_key: None,
            nonce_ttl_secs: 300,
            nonce_purge_interval_secs: 60,
            request_timeout_secs: 30,
            init_retry: RetryConfig::default(),
            endpoints: vec![EndpointProfile::delegate(), EndpointProfile::referral()],
        }
    }
}

impl fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("domain", &self.domain)
            .field("has_signing_key", &self.signing_key.is_some())
            .field("nonce_ttl_secs", &self.nonce_ttl_secs)
            .field("nonce_purge_interval_secs", &self.nonce_purge_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("init_retry", &self.init_retry)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Retry settings for initializing the signing backend.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// The number of attempts before a caller gives up.
    pub max_attempts: u32,

    /// The delay after the first failed attempt, in milliseconds. It doubles on every retry.
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 250 }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self { max_attempts: config.max_attempts, initial_backoff: Duration::from_millis(config.initial_backoff_ms) }
    }
}

/// An endpoint delegations can be requested on.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointProfile {
    /// The endpoint name.
    pub name: String,

    /// How long issued delegations are valid for, in seconds. They never expire when absent.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// The delegations issued by this endpoint. Each capability set becomes its own delegation.
    pub delegations: Vec<Vec<CapabilityTemplate>>,
}

impl EndpointProfile {
    /// The endpoint that grants storage rights on the caller's own space.
    pub fn delegate() -> Self {
        Self {
            name: "delegate".into(),
            ttl_secs: Some(DEFAULT_DELEGATION_TTL_SECS),
            delegations: vec![vec![
                CapabilityTemplate::on_subject(Ability::from(["upload", "add"])),
                CapabilityTemplate::on_subject(Ability::from(["store", "add"])),
            ]],
        }
    }

    /// The endpoint that lets a caller claim referrals.
    pub fn referral() -> Self {
        Self {
            name: "referral".into(),
            ttl_secs: None,
            delegations: vec![vec![CapabilityTemplate::on_subject(Ability::from(["referral", "claim"]))]],
        }
    }

    /// The lifetime of delegations issued by this endpoint.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// An error when loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("endpoint {0} is defined more than once")]
    DuplicateEndpoint(String),

    #[error("endpoint {0} issues no capabilities")]
    EmptyEndpoint(String),

    #[error("invalid signing key: {0}")]
    SigningKey(#[from] InvalidSecretKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_uses_defaults() {
        let config = IssuerConfig::from_toml_str("").expect("parse failed");
        assert_eq!(config.nonce_ttl(), Duration::from_secs(300));
        assert_eq!(config.nonce_purge_interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(RetryPolicy::from(&config.init_retry), RetryPolicy::default());
        let delegate = config.endpoint("delegate").expect("no delegate endpoint");
        assert_eq!(delegate.ttl(), Some(Duration::from_secs(86400)));
        let abilities: Vec<_> = delegate.delegations[0].iter().map(|t| t.can.to_string()).collect();
        assert_eq!(abilities, ["upload/add", "store/add"]);
        assert_eq!(config.endpoint("referral").expect("no referral endpoint").ttl(), None);
    }

    #[test]
    fn full_document() {
        let input = r#"
domain = "app.example.com"
signing_key = "0x0101010101010101010101010101010101010101010101010101010101010101"
nonce_ttl_secs = 60
nonce_purge_interval_secs = 600
request_timeout_secs = 5

[init_retry]
max_attempts = 5
initial_backoff_ms = 10

[[endpoints]]
name = "space"
ttl_secs = 3600
delegations = [
    [{ can = "space/info" }, { can = "store/list", with = "{subject}/files" }],
    [{ can = "*", with = "did:web:example.com" }],
]
"#;
        let config = IssuerConfig::from_toml_str(input).expect("parse failed");
        assert_eq!(config.domain, "app.example.com");
        assert_eq!(config.nonce_ttl_secs, 60);
        assert_eq!(config.nonce_purge_interval(), Duration::from_secs(600));
        assert_eq!(RetryPolicy::from(&config.init_retry).initial_backoff, Duration::from_millis(10));
        assert_eq!(config.endpoints.len(), 1);

        let endpoint = config.endpoint("space").expect("no space endpoint");
        assert_eq!(endpoint.delegations.len(), 2);
        assert_eq!(endpoint.delegations[0][0].with, "{subject}");
        assert_eq!(endpoint.delegations[0][1].with, "{subject}/files");
        assert_eq!(endpoint.delegations[1][0].can, Ability::any());
        assert!(config.endpoint("delegate").is_none());
    }

    #[rstest]
    #[case::unknown_field("colour = \"blue\"")]
    #[case::empty_domain("domain = \"\"")]
    #[case::zero_ttl("nonce_ttl_secs = 0")]
    #[case::zero_purge_interval("nonce_purge_interval_secs = 0")]
    #[case::zero_timeout("request_timeout_secs = 0")]
    #[case::zero_attempts("[init_retry]\nmax_attempts = 0")]
    #[case::bad_ability("[[endpoints]]\nname = \"x\"\ndelegations = [[{ can = \"store\" }]]")]
    #[case::empty_endpoint("[[endpoints]]\nname = \"x\"\ndelegations = []")]
    #[case::empty_set("[[endpoints]]\nname = \"x\"\ndelegations = [[]]")]
    #[case::duplicate(
        "[[endpoints]]\nname = \"x\"\ndelegations = [[{ can = \"a/b\" }]]\n[[endpoints]]\nname = \"x\"\ndelegations = [[{ can = \"a/b\" }]]"
    )]
    fn invalid_documents(#[case] input: &str) {
        IssuerConfig::from_toml_str(input).expect_err("parse succeeded");
    }

    #[test]
    fn debug_hides_signing_key() {
        let config = IssuerConfig { signing_key: Some("deadbeef".into()), ..Default::default() };
        let debug = format!("{config:?}");
        assert!(debug.contains("has_signing_key: true"));
        assert!(!debug.contains("deadbeef"));
    }
}
