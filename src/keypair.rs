use crate::{did::Did, signer::Secp256k1Signer};
use k256::{SecretKey, ecdsa::SigningKey};
use std::fmt;

/// An abstraction over a secp256k1 key pair.
///
/// This is the issuing identity of the service: every delegation it hands out is signed with it.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a new, random `Keypair`.
    pub fn generate() -> Self {
        let secret_key = SecretKey::random(&mut rand::thread_rng());
        Self { signing_key: secret_key.into() }
    }

    /// Creates a `Keypair` from a 32-byte secret key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, InvalidSecretKey> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| InvalidSecretKey::Scalar)?;
        Ok(Self { signing_key: secret_key.into() })
    }

    /// Creates a `Keypair` from a hex encoded 32-byte secret key, optionally `0x` prefixed.
    pub fn from_hex(input: &str) -> Result<Self, InvalidSecretKey> {
        let input = input.trim();
        let input = input.strip_prefix("0x").unwrap_or(input);
        let mut bytes = [0; 32];
        hex::decode_to_slice(input, &mut bytes).map_err(|_| InvalidSecretKey::Hex)?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw 33-byte compressed public key.
    pub fn public_key(&self) -> [u8; 33] {
        let encoded = self.signing_key.verifying_key().to_sec1_bytes();
        let mut public_key = [0; 33];
        public_key.copy_from_slice(&encoded);
        public_key
    }

    /// Creates a `did:key` from this keypair's public key.
    pub fn to_did(&self) -> Did {
        Did::key(self.public_key())
    }

    /// Creates a `Secp256k1Signer` from this keypair.
    pub fn signer(&self) -> Secp256k1Signer {
        Secp256k1Signer::new(self.signing_key.clone(), self.to_did())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("did", &self.to_did().to_string()).finish_non_exhaustive()
    }
}

/// An error when loading a secret key.
#[derive(Debug, thiserror::Error)]
pub enum InvalidSecretKey {
    #[error("secret key must be 32 hex encoded bytes")]
    Hex,

    #[error("secret key is not a valid secp256k1 scalar")]
    Scalar,
}
