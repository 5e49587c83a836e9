use crate::{
    block::EncodingError,
    capability::Capability,
    delegation::{Delegation, DelegationPayload, UCAN_VERSION},
    did::Did,
    signer::{Signer, SigningError},
};
use chrono::{DateTime, Duration, Utc};

// Helper to simplify unwrapping options in the builder
macro_rules! try_get {
    ($option:ident) => {
        $option.ok_or(BuildError::MissingField(stringify!($option)))
    };
}

/// A delegation builder.
#[derive(Clone, Debug, Default)]
pub struct DelegationBuilder {
    audience: Option<Did>,
    capabilities: Vec<Capability>,
    expires_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    nonce: Vec<u8>,
}

impl DelegationBuilder {
    /// Construct a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the audience for this delegation.
    pub fn audience(mut self, did: Did) -> Self {
        self.audience = Some(did);
        self
    }

    /// Add a capability to this delegation.
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add a sequence of capabilities to this delegation, in order.
    pub fn capabilities<I>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        self.capabilities.extend(capabilities);
        self
    }

    /// Set the expiration time for this delegation.
    pub fn expires_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.expires_at = Some(timestamp);
        self
    }

    /// Make this delegation expire `ttl` from now.
    pub fn expires_in(self, ttl: Duration) -> Self {
        self.expires_at(Utc::now() + ttl)
    }

    /// Make this delegation never expire.
    pub fn never_expires(mut self) -> Self {
        self.expires_at = None;
        self
    }

    /// Set the timestamp when this delegation first becomes valid.
    pub fn not_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.not_before = Some(timestamp);
        self
    }

    /// Set the nonce for this delegation.
    pub fn nonce<T: Into<Vec<u8>>>(mut self, nonce: T) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Build and sign a delegation.
    pub async fn build<S>(self, signer: &S) -> Result<Delegation, BuildError>
    where
        S: Signer + ?Sized,
    {
        let Self { audience, capabilities, expires_at, not_before, nonce } = self;

        let audience = try_get!(audience)?;
        if capabilities.is_empty() {
            return Err(BuildError::NoCapabilities);
        }
        let nonce = if nonce.is_empty() { rand::random::<[u8; 16]>().to_vec() } else { nonce };

        let payload = DelegationPayload {
            version: UCAN_VERSION.to_string(),
            issuer: signer.did().clone(),
            audience,
            capabilities,
            expires_at: expires_at.map(truncate_to_seconds),
            not_before: not_before.map(truncate_to_seconds),
            nonce,
            proofs: vec![],
        };
        let input = payload.signing_input()?;
        let signature = signer.sign(&input).await?;
        Ok(Delegation::new(payload, signature))
    }
}

// Timestamps are encoded in whole seconds; truncating up front keeps the signed payload and its
// decoded form identical.
fn truncate_to_seconds(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.timestamp(), 0).unwrap_or(timestamp)
}

/// An error when constructing a delegation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("delegation has no capabilities")]
    NoCapabilities,

    #[error("encoding delegation: {0}")]
    Encoding(#[from] EncodingError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
}
