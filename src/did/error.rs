use hex::FromHexError;
use std::num::ParseIntError;

/// An error when parsing a DID.
#[derive(Debug, thiserror::Error)]
pub enum ParseDidError {
    #[error("not a valid Did prefix")]
    NoDid,

    #[error("no method in did")]
    NoMethod,

    #[error("unsupported did method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid address hex characters: {0}")]
    AddressChars(#[source] FromHexError),

    #[error("address is missing the 0x prefix")]
    AddressPrefix,

    #[error("address does not match its EIP-55 checksum")]
    AddressChecksum,

    #[error("invalid multibase encoding")]
    Multibase,

    #[error("unsupported multibase encoding, expected base58btc")]
    UnsupportedMultibase,

    #[error("unsupported multicodec, expected secp256k1-pub or ed25519-pub")]
    UnsupportedMulticodec,

    #[error("invalid public key length")]
    InvalidKeyLength,

    #[error("unsupported blockchain namespace: {0}")]
    UnsupportedNamespace(String),

    #[error("invalid chain id: {0}")]
    ChainId(#[from] ParseIntError),

    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error("invalid did:web identifier")]
    InvalidWebId,
}

impl ParseDidError {
    /// Whether the input was well formed but uses a method or key type that isn't supported.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMethod(_)
                | Self::UnsupportedMultibase
                | Self::UnsupportedMulticodec
                | Self::UnsupportedNamespace(_)
        )
    }
}
