use crate::time::TimeProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{Rng, distributions::Alphanumeric};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};

const NONCE_LENGTH: usize = 17;
const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(5 * 60);

/// A single-use value that binds an authentication message to one sign-in attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Nonce {
    /// The nonce value.
    pub value: String,

    /// When this nonce was issued.
    pub issued_at: DateTime<Utc>,

    /// The first instant at which this nonce can no longer be consumed.
    pub expires_at: DateTime<Utc>,

    /// Whether this nonce has already been consumed.
    pub consumed: bool,
}

impl Nonce {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An error when consuming a nonce.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum NonceError {
    #[error("nonce not found")]
    NotFound,

    #[error("nonce expired")]
    Expired,

    #[error("nonce already consumed")]
    AlreadyConsumed,

    #[error("nonce store failure: {0}")]
    Backend(String),
}

/// The storage behind a [NonceRegistry].
///
/// `consume` must be atomic per value: when several callers race on the same nonce, exactly one of them
/// can succeed.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Store a freshly issued nonce.
    async fn put(&self, nonce: Nonce) -> Result<(), NonceError>;

    /// Mark a nonce as consumed, failing if it's unknown, expired, or was already consumed.
    async fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Nonce, NonceError>;

    /// Drop every nonce that expired before `now`, returning how many were dropped.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, NonceError>;
}

/// A nonce store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryNonceStore {
    nonces: Mutex<HashMap<String, Nonce>>,
}

impl MemoryNonceStore {
    /// The number of nonces held, consumed or not.
    pub fn len(&self) -> usize {
        self.nonces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.lock().is_empty()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn put(&self, nonce: Nonce) -> Result<(), NonceError> {
        self.nonces.lock().insert(nonce.value.clone(), nonce);
        Ok(())
    }

    async fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Nonce, NonceError> {
        let mut nonces = self.nonces.lock();
        let nonce = nonces.get_mut(value).ok_or(NonceError::NotFound)?;
        if nonce.consumed {
            return Err(NonceError::AlreadyConsumed);
        }
        if nonce.is_expired(now) {
            return Err(NonceError::Expired);
        }
        nonce.consumed = true;
        Ok(nonce.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, NonceError> {
        let mut nonces = self.nonces.lock();
        let before = nonces.len();
        nonces.retain(|_, nonce| !nonce.is_expired(now));
        Ok(before - nonces.len())
    }
}

/// Issues and consumes single-use nonces.
///
/// Expired nonces are dropped from the store while issuing new ones, at most once per purge interval. The
/// interval defaults to the nonce time to live.
pub struct NonceRegistry {
    store: Arc<dyn NonceStore>,
    ttl: Duration,
    purge_interval: Duration,
    last_purge: Mutex<DateTime<Utc>>,
    clock: Arc<dyn TimeProvider>,
}

impl NonceRegistry {
    /// Construct a new registry.
    pub fn new(store: Arc<dyn NonceStore>, ttl: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        let last_purge = Mutex::new(clock.current_time());
        Self { store, ttl, purge_interval: ttl, last_purge, clock }
    }

    /// Set how often expired nonces are purged while issuing.
    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Construct a registry backed by memory that uses the default time to live.
    pub fn in_memory(clock: Arc<dyn TimeProvider>) -> Self {
        Self::new(Arc::new(MemoryNonceStore::default()), DEFAULT_NONCE_TTL, clock)
    }

    /// Issue a new nonce.
    pub async fn issue(&self) -> Result<Nonce, NonceError> {
        let value: String = rand::thread_rng().sample_iter(&Alphanumeric).take(NONCE_LENGTH).map(char::from).collect();
        let issued_at = self.clock.current_time();
        if self.purge_due(issued_at) {
            if let Err(e) = self.purge_at(issued_at).await {
                warn!("Failed to purge expired nonces: {e}");
            }
        }
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| NonceError::Backend(e.to_string()))?;
        let nonce = Nonce { value, issued_at, expires_at: issued_at + ttl, consumed: false };
        self.store.put(nonce.clone()).await?;
        Ok(nonce)
    }

    /// Consume a nonce. This succeeds at most once per issued nonce.
    pub async fn consume(&self, value: &str) -> Result<Nonce, NonceError> {
        let now = self.clock.current_time();
        self.store.consume(value, now).await
    }

    /// Drop expired nonces from the underlying store.
    pub async fn purge_expired(&self) -> Result<usize, NonceError> {
        let now = self.clock.current_time();
        *self.last_purge.lock() = now;
        self.purge_at(now).await
    }

    fn purge_due(&self, now: DateTime<Utc>) -> bool {
        let mut last_purge = self.last_purge.lock();
        let elapsed = (now - *last_purge).to_std().unwrap_or_default();
        if elapsed < self.purge_interval {
            return false;
        }
        *last_purge = now;
        true
    }

    async fn purge_at(&self, now: DateTime<Utc>) -> Result<usize, NonceError> {
        let purged = self.store.purge_expired(now).await?;
        debug!("Purged {purged} expired nonces");
        Ok(purged)
    }
}
