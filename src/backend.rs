use crate::{
    builder::{BuildError, DelegationBuilder},
    capability::Capability,
    delegation::Delegation,
    did::Did,
    keypair::Keypair,
    signer::{Secp256k1Signer, Signer},
    time::TimeProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Options used when creating a delegation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DelegationOptions {
    /// The time the delegation expires at. `None` means it never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A backend that holds the issuing key and creates delegations with it.
#[async_trait]
pub trait IssuingBackend: Send + Sync {
    /// The identity delegations are issued by.
    fn agent_identity(&self) -> &Did;

    /// Create and sign a delegation for the given audience.
    async fn create_delegation(
        &self,
        audience: Did,
        capabilities: Vec<Capability>,
        options: DelegationOptions,
    ) -> Result<Delegation, BackendError>;
}

/// An issuing backend that signs with a local key.
pub struct LocalBackend {
    signer: Secp256k1Signer,
}

impl LocalBackend {
    /// Construct a backend for the given keypair.
    pub fn new(keypair: &Keypair) -> Self {
        Self { signer: keypair.signer() }
    }
}

#[async_trait]
impl IssuingBackend for LocalBackend {
    fn agent_identity(&self) -> &Did {
        self.signer.did()
    }

    async fn create_delegation(
        &self,
        audience: Did,
        capabilities: Vec<Capability>,
        options: DelegationOptions,
    ) -> Result<Delegation, BackendError> {
        let mut builder = DelegationBuilder::new().audience(audience).capabilities(capabilities);
        if let Some(expires_at) = options.expires_at {
            builder = builder.expires_at(expires_at);
        }
        Ok(builder.build(&self.signer).await?)
    }
}

impl DelegationOptions {
    /// Options for a delegation that lives for `ttl` from now, or forever if there's no time to live.
    pub fn with_ttl(ttl: Option<Duration>, clock: &dyn TimeProvider) -> Result<Self, BackendError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(|_| BackendError::InvalidTtl)?;
                Some(clock.current_time() + ttl)
            }
            None => None,
        };
        Ok(Self { expires_at })
    }
}

/// An error raised by an issuing backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    #[error("building delegation: {0}")]
    Build(#[from] BuildError),

    #[error("delegation time to live is out of range")]
    InvalidTtl,
}

/// How initialization of the signing backend is retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// The maximum number of attempts a caller makes before giving up.
    pub max_attempts: u32,

    /// The backoff after the first failed attempt. It doubles after every subsequent failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff: Duration::from_millis(250) }
    }
}

type Initializer = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn IssuingBackend>, BackendError>> + Send + Sync>;

/// A lazily initialized, shared issuing backend.
///
/// At most one initialization runs at a time and every concurrent caller waits on it. When an attempt
/// fails, the caller that ran it retries with backoff; once it gives up, the next waiter takes over.
pub struct SigningClient {
    backend: OnceCell<Arc<dyn IssuingBackend>>,
    initializer: Initializer,
    retry: RetryPolicy,
}

impl SigningClient {
    /// Construct a client that initializes its backend using the given function.
    pub fn new<F, Fut>(initializer: F, retry: RetryPolicy) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn IssuingBackend>, BackendError>> + Send + 'static,
    {
        let initializer: Initializer = Box::new(move || Box::pin(initializer()));
        Self { backend: OnceCell::new(), initializer, retry }
    }

    /// Construct a client around an already initialized backend.
    pub fn ready(backend: Arc<dyn IssuingBackend>) -> Self {
        let initializer: Initializer =
            Box::new(|| Box::pin(async { Err(BackendError::Unavailable("backend already initialized".into())) }));
        Self { backend: OnceCell::new_with(Some(backend)), initializer, retry: RetryPolicy::default() }
    }

    /// Get the backend, initializing it if needed.
    pub async fn get(&self) -> Result<Arc<dyn IssuingBackend>, BackendError> {
        self.backend.get_or_try_init(|| self.initialize()).await.cloned()
    }

    /// Whether the backend has been initialized.
    pub fn is_ready(&self) -> bool {
        self.backend.initialized()
    }

    async fn initialize(&self) -> Result<Arc<dyn IssuingBackend>, BackendError> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            match (self.initializer)().await {
                Ok(backend) => {
                    info!("Signing backend initialized as {}", backend.agent_identity());
                    return Ok(backend);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!("Signing backend initialization attempt {attempt} failed, retrying in {backoff:?}: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Signing backend initialization failed after {attempt} attempts: {e}");
                    return Err(BackendError::Unavailable(e.to_string()));
                }
            }
        }
    }
}
