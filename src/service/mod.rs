//! The issuance pipeline.
//!
//! A request is authenticated with a signed sign-in message, then every capability set configured for the
//! requested endpoint is issued as its own delegation to the requested audience. The delegations are
//! returned as a content addressable archive whose roots are the issued delegations.

use crate::{
    backend::{BackendError, DelegationOptions, IssuingBackend, LocalBackend, SigningClient},
    block::Block,
    capability::Capability,
    car::{self, ContainerError},
    config::{ConfigError, EndpointProfile, IssuerConfig},
    did::Did,
    keypair::Keypair,
    nonce::{MemoryNonceStore, Nonce, NonceRegistry},
    siwe::{AuthenticationProof, SiweMessage},
    time::{SystemClockTimeProvider, TimeProvider},
    verifier::ProofVerifier,
};
use bytes::Bytes;
use futures::Stream;
use ipld_core::cid::Cid;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod error;

pub use error::{ErrorResponse, IssueError};

/// The content type of a successful response.
pub const CONTENT_TYPE: &str = car::CONTENT_TYPE;

/// A request for delegations.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    /// The signed sign-in message, either as its fields or as the text that was signed.
    #[serde(default)]
    pub siwe: Option<MessageInput>,

    /// The signature over the message, hex or base64 encoded.
    #[serde(default)]
    pub signature: Option<String>,

    /// The DID delegations are issued to.
    #[serde(default)]
    pub aud: Option<String>,

    #[serde(default)]
    pub dao_login: bool,

    #[serde(default)]
    pub resolve_ens: bool,

    #[serde(default)]
    pub resolve_lens: bool,
}

/// The two ways a sign-in message can be sent.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageInput {
    Text(String),
    Fields(SiweMessage),
}

impl MessageInput {
    fn into_message(self) -> Result<SiweMessage, IssueError> {
        match self {
            Self::Text(text) => text.parse().map_err(IssueError::MalformedMessage),
            Self::Fields(message) => Ok(message),
        }
    }
}

/// The delegations issued for a request.
#[derive(Clone, Debug)]
pub struct IssuedDelegations {
    /// The ids of the issued delegations, in the order they were issued.
    pub roots: Vec<Cid>,

    /// The blocks to send, in order.
    pub blocks: Vec<Block>,
}

impl IssuedDelegations {
    /// Stream these delegations as a content addressable archive.
    ///
    /// Dropping the stream stops writing it.
    pub fn stream(self) -> impl Stream<Item = Result<Bytes, ContainerError>> + Send + 'static {
        car::stream(self.roots, futures::stream::iter(self.blocks.into_iter().map(Ok)))
    }
}

/// Authenticates callers and issues them delegations.
pub struct DelegationService {
    config: IssuerConfig,
    nonces: Arc<NonceRegistry>,
    verifier: ProofVerifier,
    client: Arc<SigningClient>,
    clock: Arc<dyn TimeProvider>,
}

impl DelegationService {
    /// Construct a service out of its parts.
    pub fn new(
        config: IssuerConfig,
        nonces: Arc<NonceRegistry>,
        client: Arc<SigningClient>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let verifier = ProofVerifier::new(nonces.clone(), clock.clone());
        Self { config, nonces, verifier, client, clock }
    }

    /// Construct a service that keeps nonces in memory and signs with the configured key.
    pub fn from_config(config: IssuerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keypair = match &config.signing_key {
            Some(key) => Keypair::from_hex(key)?,
            None => {
                warn!("No signing key configured, delegations will be signed with an ephemeral key");
                Keypair::generate()
            }
        };
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemClockTimeProvider);
        let nonces = NonceRegistry::new(Arc::new(MemoryNonceStore::default()), config.nonce_ttl(), clock.clone())
            .with_purge_interval(config.nonce_purge_interval());
        let nonces = Arc::new(nonces);
        let client = SigningClient::new(
            move || {
                let backend: Arc<dyn IssuingBackend> = Arc::new(LocalBackend::new(&keypair));
                async move { Ok::<_, BackendError>(backend) }
            },
            (&config.init_retry).into(),
        );
        Ok(Self::new(config, nonces, Arc::new(client), clock))
    }

    /// The configuration this service runs with.
    pub fn config(&self) -> &IssuerConfig {
        &self.config
    }

    /// Issue a nonce for a new sign-in.
    pub async fn nonce(&self) -> Result<Nonce, IssueError> {
        self.nonces.issue().await.map_err(IssueError::Nonce)
    }

    /// Drop every expired nonce now rather than waiting for the next purge while issuing.
    pub async fn purge_expired_nonces(&self) -> Result<usize, IssueError> {
        self.nonces.purge_expired().await.map_err(IssueError::Nonce)
    }

    /// Handle a request for the delegations configured on `endpoint`.
    ///
    /// `body` is the JSON encoded [DelegationRequest].
    pub async fn issue(&self, endpoint: &str, body: &[u8]) -> Result<IssuedDelegations, IssueError> {
        let result = tokio::time::timeout(self.config.request_timeout(), self.handle(endpoint, body)).await;
        let result = result.unwrap_or(Err(IssueError::Timeout));
        if let Err(e) = &result {
            info!("Rejected request on {endpoint} with status {}: {e}", e.status_code());
        }
        result
    }

    async fn handle(&self, endpoint: &str, body: &[u8]) -> Result<IssuedDelegations, IssueError> {
        let profile = self.config.endpoint(endpoint).ok_or_else(|| IssueError::UnknownEndpoint(endpoint.into()))?;
        let request: DelegationRequest = serde_json::from_slice(body).map_err(IssueError::MalformedBody)?;
        if request.dao_login || request.resolve_ens || request.resolve_lens {
            debug!("Ignoring identity enrichment flags on {endpoint}");
        }

        let message = request.siwe.ok_or(IssueError::MissingField("siwe"))?.into_message()?;
        let signature = request.signature.ok_or(IssueError::MissingField("signature"))?;
        let proof = AuthenticationProof::new(message, &signature).map_err(IssueError::MalformedMessage)?;
        let session = self.verifier.verify(&proof, &self.config.domain).await?;

        let audience: Did =
            request.aud.ok_or(IssueError::MissingAudience)?.parse().map_err(IssueError::InvalidAudience)?;
        let subject = session.identity();
        let capability_sets = expand(profile, &subject)?;

        let backend = self.client.get().await?;
        let options = DelegationOptions::with_ttl(profile.ttl(), self.clock.as_ref())?;
        let mut roots = Vec::with_capacity(capability_sets.len());
        let mut blocks = Vec::with_capacity(capability_sets.len());
        for capabilities in capability_sets {
            let delegation = backend.create_delegation(audience.clone(), capabilities, options.clone()).await?;
            let block = delegation.to_block()?;
            roots.push(*block.cid());
            blocks.push(block);
        }
        info!("Issued {} delegations on {endpoint} to {audience} for {subject}", roots.len());
        Ok(IssuedDelegations { roots, blocks })
    }
}

fn expand(profile: &EndpointProfile, subject: &Did) -> Result<Vec<Vec<Capability>>, IssueError> {
    let mut sets = Vec::with_capacity(profile.delegations.len());
    for templates in &profile.delegations {
        let capabilities: Result<Vec<_>, _> = templates.iter().map(|template| template.expand(subject)).collect();
        sets.push(capabilities?);
    }
    Ok(sets)
}

#[cfg(test)]
mod tests;
