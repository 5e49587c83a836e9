use super::{KeyDid, error::ParseDidError};
use multibase::{Base, encode};

const SECP256K1_PREFIX: [u8; 2] = [0xe7, 0x01];
const ED25519_PREFIX: [u8; 2] = [0xed, 0x01];

pub(super) fn format(key: &KeyDid) -> String {
    let (prefix, public_key) = match key {
        KeyDid::Secp256k1(public_key) => (SECP256K1_PREFIX, public_key.as_slice()),
        KeyDid::Ed25519(public_key) => (ED25519_PREFIX, public_key.as_slice()),
    };
    let mut prefixed_key = Vec::with_capacity(prefix.len() + public_key.len());
    prefixed_key.extend_from_slice(&prefix);
    prefixed_key.extend_from_slice(public_key);
    let multibase_key = encode(Base::Base58Btc, prefixed_key);
    format!("did:key:{multibase_key}")
}

pub(super) fn parse(s: &str) -> Result<KeyDid, ParseDidError> {
    let (base, input) = multibase::decode(s).map_err(|_| ParseDidError::Multibase)?;
    if base != Base::Base58Btc {
        return Err(ParseDidError::UnsupportedMultibase);
    }
    if let Some(public_key) = input.strip_prefix(&SECP256K1_PREFIX) {
        let public_key = public_key.try_into().map_err(|_| ParseDidError::InvalidKeyLength)?;
        Ok(KeyDid::Secp256k1(public_key))
    } else if let Some(public_key) = input.strip_prefix(&ED25519_PREFIX) {
        let public_key = public_key.try_into().map_err(|_| ParseDidError::InvalidKeyLength)?;
        Ok(KeyDid::Ed25519(public_key))
    } else {
        Err(ParseDidError::UnsupportedMulticodec)
    }
}
