mod error;
pub(crate) mod ethr;
mod key;
mod pkh;
mod web;

pub use error::ParseDidError;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use std::{fmt, str::FromStr};

/// A Decentralised Identifier (Did).
///
/// Two DIDs are equal if and only if their canonical string forms are equal: parsing normalizes
/// address checksums and `did:web` hosts, so the variants below only hold canonical data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Did {
    /// The `key` method.
    Key(KeyDid),
    /// The `pkh` method, bound to an account on an EIP-155 chain.
    Pkh { chain_id: u64, address: [u8; 20] },
    /// The `ethr` method.
    Ethr { address: [u8; 20] },
    /// The `web` method.
    Web(WebId),
}

/// The method specific id of a `did:web`, with its host lowercased.
///
/// This can only be built by parsing, so it is always canonical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WebId(String);

impl WebId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The public key behind a `did:key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyDid {
    /// A compressed secp256k1 public key.
    Secp256k1([u8; 33]),
    /// An ed25519 public key.
    Ed25519([u8; 32]),
}

impl Did {
    /// Constructs a Did for the `key` method using a secp256k1 public key.
    pub fn key(public_key: [u8; 33]) -> Self {
        Self::Key(KeyDid::Secp256k1(public_key))
    }

    /// Constructs a Did for the `key` method using an ed25519 public key.
    pub fn ed25519_key(public_key: [u8; 32]) -> Self {
        Self::Key(KeyDid::Ed25519(public_key))
    }

    /// Constructs a Did for the `ethr` method.
    pub fn ethr(address: [u8; 20]) -> Self {
        Self::Ethr { address }
    }

    /// Constructs a Did for the `web` method out of its method specific id, such as `example.com:user:alice`.
    pub fn web(id: &str) -> Result<Self, ParseDidError> {
        Ok(Self::Web(WebId(web::parse(id)?)))
    }

    /// Constructs the Did for an account on an EIP-155 chain.
    ///
    /// This is the identity a signed-in wallet gets once its authentication message is verified.
    pub fn from_chain_account(chain_id: u64, address: [u8; 20]) -> Self {
        Self::Pkh { chain_id, address }
    }

    /// The method name of this Did.
    pub fn method(&self) -> &'static str {
        match self {
            Did::Key(_) => "key",
            Did::Pkh { .. } => "pkh",
            Did::Ethr { .. } => "ethr",
            Did::Web(_) => "web",
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Did::Key(key) => key::format(key),
            Did::Pkh { chain_id, address } => pkh::format(*chain_id, address),
            Did::Ethr { address } => ethr::format(address),
            Did::Web(id) => web::format(id.as_str()),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Did {
    type Err = ParseDidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("did:").ok_or(ParseDidError::NoDid)?;
        let (method, id) = s.split_once(':').ok_or(ParseDidError::NoMethod)?;
        match method {
            "key" => Ok(Self::Key(key::parse(id)?)),
            "pkh" => {
                let (chain_id, address) = pkh::parse(id)?;
                Ok(Self::Pkh { chain_id, address })
            }
            "ethr" => Ok(Self::Ethr { address: ethr::parse(id)? }),
            "web" => Self::web(id),
            "" => Err(ParseDidError::NoMethod),
            other => Err(ParseDidError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl Serialize for Did {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Did>().map_err(D::Error::custom)
    }
}
