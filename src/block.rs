use bytes::Bytes;
use ipld_core::cid::{Cid, multihash::Multihash};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

/// The multicodec code for DAG-CBOR.
pub const DAG_CBOR: u64 = 0x71;

/// The multihash code for SHA2-256.
pub const SHA2_256: u64 = 0x12;

/// A content addressed block.
///
/// The id is a pure function of the bytes: it's always the CIDv1 of their SHA2-256 digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    /// Construct a block out of already encoded bytes.
    pub fn new<B: Into<Bytes>>(codec: u64, bytes: B) -> Result<Self, EncodingError> {
        let bytes = bytes.into();
        let cid = compute_cid(codec, &bytes)?;
        Ok(Self { cid, bytes })
    }

    /// Canonically encode a value as DAG-CBOR and wrap it in a block.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, EncodingError> {
        let bytes = serde_ipld_dagcbor::to_vec(value).map_err(|e| EncodingError::Encode(e.to_string()))?;
        Self::new(DAG_CBOR, bytes)
    }

    /// Decode the DAG-CBOR value stored in this block.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        if self.cid.codec() != DAG_CBOR {
            return Err(EncodingError::UnsupportedCodec(self.cid.codec()));
        }
        serde_ipld_dagcbor::from_slice(&self.bytes).map_err(|e| EncodingError::Decode(e.to_string()))
    }

    /// The id of this block.
    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The bytes in this block.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Whether the id still matches the bytes.
    pub fn is_valid(&self) -> bool {
        compute_cid(self.cid.codec(), &self.bytes).is_ok_and(|cid| cid == self.cid)
    }

    pub(crate) fn from_parts(cid: Cid, bytes: Bytes) -> Result<Self, EncodingError> {
        let expected = compute_cid(cid.codec(), &bytes)?;
        if expected != cid {
            return Err(EncodingError::CidMismatch(cid));
        }
        Ok(Self { cid, bytes })
    }
}

/// Compute the CIDv1 for the given bytes.
pub fn compute_cid(codec: u64, bytes: &[u8]) -> Result<Cid, EncodingError> {
    let digest = Sha256::digest(bytes);
    let hash = Multihash::wrap(SHA2_256, &digest).map_err(|e| EncodingError::Multihash(e.to_string()))?;
    Ok(Cid::new_v1(codec, hash))
}

/// An error when content addressing a value.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("decoding failed: {0}")]
    Decode(String),

    #[error("invalid multihash: {0}")]
    Multihash(String),

    #[error("unsupported codec: {0:#x}")]
    UnsupportedCodec(u64),

    #[error("block contents don't match {0}")]
    CidMismatch(Cid),
}
