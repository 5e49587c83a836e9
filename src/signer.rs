use crate::did::Did;
use async_trait::async_trait;
use k256::ecdsa::{Signature, SigningKey};
use signature::Signer as _;

/// A delegation signer.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The DID of this signer.
    fn did(&self) -> &Did;

    /// Sign the given payload, returning the raw signature.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// An error that can occur when signing a delegation.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A signer that uses a local `secp256k1` key.
///
/// Signatures are ES256K: ECDSA over the SHA-256 digest of the payload, in their 64 byte compact form.
#[derive(Clone)]
pub struct Secp256k1Signer {
    key: SigningKey,
    did: Did,
}

impl Secp256k1Signer {
    pub(crate) fn new(key: SigningKey, did: Did) -> Self {
        Self { key, did }
    }
}

#[async_trait]
impl Signer for Secp256k1Signer {
    fn did(&self) -> &Did {
        &self.did
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature: Signature = self.key.try_sign(payload).map_err(|e| SigningError::SigningFailed(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}
