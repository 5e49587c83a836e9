use crate::{
    block::{Block, EncodingError},
    capability::Capability,
    did::{Did, KeyDid},
};
use chrono::{DateTime, Utc};
use ipld_core::cid::Cid;
use k256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use signature::Verifier;

/// The UCAN version delegations are issued with.
pub const UCAN_VERSION: &str = "0.9.1";

/// The signed part of a [Delegation].
///
/// Field order and encodings are fixed so that the same logical delegation always encodes to the same
/// bytes: capabilities keep their insertion order and timestamps are whole seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegationPayload {
    /// The UCAN version.
    #[serde(rename = "v")]
    pub version: String,

    /// The delegation issuer.
    #[serde(rename = "iss")]
    pub issuer: Did,

    /// The delegation audience.
    #[serde(rename = "aud")]
    pub audience: Did,

    /// The capabilities being delegated.
    #[serde(rename = "att")]
    pub capabilities: Vec<Capability>,

    /// The timestamp at which this delegation becomes invalid, if any.
    #[serde(rename = "exp", default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The first timestamp at which this delegation is valid.
    #[serde(
        rename = "nbf",
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before: Option<DateTime<Utc>>,

    /// The delegation nonce.
    #[serde(rename = "nnc", with = "hex::serde")]
    pub nonce: Vec<u8>,

    /// The delegations this one is derived from.
    #[serde(rename = "prf", default)]
    pub proofs: Vec<Cid>,
}

impl DelegationPayload {
    /// The canonical bytes that get signed.
    pub fn signing_input(&self) -> Result<Vec<u8>, EncodingError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| EncodingError::Encode(e.to_string()))
    }
}

/// A signed delegation of capabilities from an issuer to an audience.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Delegation {
    #[serde(rename = "p")]
    payload: DelegationPayload,

    #[serde(rename = "s", with = "serde_bytes")]
    signature: Vec<u8>,
}

impl Delegation {
    pub(crate) fn new(payload: DelegationPayload, signature: Vec<u8>) -> Self {
        Self { payload, signature }
    }

    /// Decode a delegation out of a block.
    pub fn from_block(block: &Block) -> Result<Self, EncodingError> {
        block.decode()
    }

    /// Encode this delegation as a content addressed block.
    pub fn to_block(&self) -> Result<Block, EncodingError> {
        Block::encode(self)
    }

    /// The id of this delegation's block.
    pub fn cid(&self) -> Result<Cid, EncodingError> {
        Ok(*self.to_block()?.cid())
    }

    /// The payload in this delegation.
    pub fn payload(&self) -> &DelegationPayload {
        &self.payload
    }

    /// The delegation issuer.
    pub fn issuer(&self) -> &Did {
        &self.payload.issuer
    }

    /// The delegation audience.
    pub fn audience(&self) -> &Did {
        &self.payload.audience
    }

    /// The delegated capabilities.
    pub fn capabilities(&self) -> &[Capability] {
        &self.payload.capabilities
    }

    /// The expiration time, if any.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.payload.expires_at
    }

    /// The raw signature.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Validate the issuer's signature over the payload.
    pub fn verify_signature(&self) -> Result<(), InvalidSignature> {
        let Did::Key(KeyDid::Secp256k1(public_key)) = &self.payload.issuer else {
            return Err(InvalidSignature::UnsupportedIssuer);
        };
        let verifying_key = VerifyingKey::from_sec1_bytes(public_key).map_err(|_| InvalidSignature::IssuerPublicKey)?;
        let signature = Signature::try_from(self.signature.as_slice()).map_err(|_| InvalidSignature::Signature)?;
        let input = self.payload.signing_input()?;
        verifying_key.verify(&input, &signature).map_err(|_| InvalidSignature::Signature)?;
        Ok(())
    }
}

/// An error during the verification of a delegation signature.
#[derive(Debug, thiserror::Error)]
pub enum InvalidSignature {
    #[error("issuer is not a secp256k1 did:key")]
    UnsupportedIssuer,

    #[error("invalid issuer public key")]
    IssuerPublicKey,

    #[error("invalid signature")]
    Signature,

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::DelegationBuilder, keypair::Keypair};

    fn capabilities() -> Vec<Capability> {
        vec![
            Capability::new("did:web:example.com", "upload/add".parse().unwrap()).unwrap(),
            Capability::new("did:web:example.com", "store/add".parse().unwrap()).unwrap(),
        ]
    }

    async fn build(keypair: &Keypair, capabilities: Vec<Capability>) -> Delegation {
        DelegationBuilder::new()
            .audience(Did::ed25519_key([0xbb; 32]))
            .capabilities(capabilities)
            .expires_at(DateTime::from_timestamp(1740495955, 0).unwrap())
            .nonce([1, 2, 3])
            .build(&keypair.signer())
            .await
            .expect("build failed")
    }

    #[tokio::test]
    async fn same_delegation_same_block() {
        let keypair = Keypair::generate();
        let first = build(&keypair, capabilities()).await.to_block().expect("encode failed");
        let second = build(&keypair, capabilities()).await.to_block().expect("encode failed");
        assert_eq!(first.bytes(), second.bytes());
        assert_eq!(first.cid(), second.cid());
        assert_eq!(&build(&keypair, capabilities()).await.cid().unwrap(), first.cid());
    }

    #[tokio::test]
    async fn capability_order_changes_block() {
        let keypair = Keypair::generate();
        let mut reversed = capabilities();
        reversed.reverse();
        let first = build(&keypair, capabilities()).await.to_block().expect("encode failed");
        let second = build(&keypair, reversed).await.to_block().expect("encode failed");
        assert_ne!(first.cid(), second.cid());
    }

    #[tokio::test]
    async fn block_round_trip() {
        let keypair = Keypair::generate();
        let delegation = build(&keypair, capabilities()).await;
        let block = delegation.to_block().expect("encode failed");
        let decoded = Delegation::from_block(&block).expect("decode failed");
        assert_eq!(decoded, delegation);
        assert_eq!(decoded.capabilities(), capabilities().as_slice());
        decoded.verify_signature().expect("signature validation failed");
    }

    #[tokio::test]
    async fn tampered_payload() {
        let keypair = Keypair::generate();
        let mut delegation = build(&keypair, capabilities()).await;
        delegation.payload.audience = Did::ed25519_key([0xcc; 32]);
        let err = delegation.verify_signature().expect_err("validation succeeded");
        assert!(matches!(err, InvalidSignature::Signature));
    }

    #[tokio::test]
    async fn tampered_signature() {
        let keypair = Keypair::generate();
        let delegation = build(&keypair, capabilities()).await;
        for index in 0..delegation.signature.len() {
            let mut tampered = delegation.clone();
            tampered.signature[index] ^= 0x01;
            tampered.verify_signature().expect_err("validation succeeded");
        }
    }

    #[tokio::test]
    async fn non_expiring_encodes_null() {
        let keypair = Keypair::generate();
        let delegation = DelegationBuilder::new()
            .audience(Did::ed25519_key([0xbb; 32]))
            .capabilities(capabilities())
            .build(&keypair.signer())
            .await
            .expect("build failed");
        assert_eq!(delegation.expires_at(), None);
        let block = delegation.to_block().expect("encode failed");
        let decoded = Delegation::from_block(&block).expect("decode failed");
        assert_eq!(decoded.expires_at(), None);
        assert_eq!(decoded.payload().nonce.len(), 16);
    }
}
