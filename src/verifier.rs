use crate::{
    did::{Did, ethr::format_address},
    nonce::{NonceError, NonceRegistry},
    siwe::{AuthenticationProof, SiweError},
    time::TimeProvider,
};
use ethers::types::Signature;
use std::sync::Arc;
use tracing::debug;

/// An authenticated sign-in.
///
/// This never carries the signature that proved it.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedSession {
    /// The account that signed in.
    pub address: [u8; 20],

    /// The chain the account is bound to.
    pub chain_id: u64,

    /// The URI the sign-in was requested for.
    pub uri: String,

    /// The exact text that was signed.
    pub raw_message: String,
}

impl VerifiedSession {
    /// The identity of the account that signed in.
    pub fn identity(&self) -> Did {
        Did::from_chain_account(self.chain_id, self.address)
    }
}

/// Verifies signed authentication messages.
pub struct ProofVerifier {
    nonces: Arc<NonceRegistry>,
    clock: Arc<dyn TimeProvider>,
}

impl ProofVerifier {
    /// Construct a new verifier that consumes nonces from the given registry.
    pub fn new(nonces: Arc<NonceRegistry>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { nonces, clock }
    }

    /// Verify a proof that was requested for `expected_domain`.
    ///
    /// Checks run in a fixed order and stop at the first failure. The message's nonce is consumed as soon
    /// as the message is known to be well formed and bound to this domain, so a proof can't be retried
    /// even if a later check fails.
    pub async fn verify(
        &self,
        proof: &AuthenticationProof,
        expected_domain: &str,
    ) -> Result<VerifiedSession, AuthError> {
        let message = &proof.message;
        let validated = message.validate().map_err(AuthError::Malformed)?;
        if message.domain != expected_domain {
            debug!("Rejecting sign-in for domain {}", message.domain);
            return Err(AuthError::DomainMismatch);
        }

        self.nonces.consume(&message.nonce).await?;

        let now = self.clock.current_time();
        if validated.issued_at > now {
            return Err(AuthError::NotYetValid);
        }
        if validated.not_before.is_some_and(|not_before| not_before > now) {
            return Err(AuthError::NotYetValid);
        }
        if validated.expiration_time.is_some_and(|expiration| now > expiration) {
            return Err(AuthError::Expired);
        }

        let raw_message = message.to_string();
        let signature = Signature::try_from(proof.signature.as_slice()).map_err(|_| AuthError::BadSignature)?;
        let recovered = signature.recover(raw_message.as_str()).map_err(|_| AuthError::BadSignature)?;
        if recovered.0 != validated.address {
            debug!("Signature recovers to {} rather than {}", format_address(&recovered.0), message.address);
            return Err(AuthError::BadSignature);
        }

        debug!("Verified sign-in for {} on chain {}", message.address, message.chain_id);
        Ok(VerifiedSession { address: validated.address, chain_id: message.chain_id, uri: message.uri.clone(), raw_message })
    }
}

/// An error when verifying an authentication proof.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed message: {0}")]
    Malformed(#[source] SiweError),

    #[error("message is not bound to this domain")]
    DomainMismatch,

    #[error("invalid nonce: {0}")]
    InvalidNonce(#[from] NonceError),

    #[error("message is expired")]
    Expired,

    #[error("message is not yet valid")]
    NotYetValid,

    #[error("invalid signature")]
    BadSignature,
}
