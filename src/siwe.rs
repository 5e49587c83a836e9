use crate::did::{ParseDidError, ethr::parse_address};
use base64::{
    Engine,
    prelude::{BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, iter::Peekable, num::ParseIntError, str::FromStr, str::Split};

const PREAMBLE: &str = " wants you to sign in with your Ethereum account:";
const SUPPORTED_VERSION: &str = "1";
const MIN_NONCE_LENGTH: usize = 8;

/// A Sign-In with Ethereum (EIP-4361) message.
///
/// Fields are kept as they were received so the text that was signed can be rebuilt byte for byte. Use
/// [SiweMessage::validate] to check the message is well formed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiweMessage {
    /// The domain requesting the signature.
    #[serde(default)]
    pub domain: String,

    /// The signing account, as a `0x` prefixed address.
    #[serde(default)]
    pub address: String,

    /// A human readable assertion the user signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,

    /// The resource that is the subject of the signing.
    #[serde(default)]
    pub uri: String,

    /// The message version, always `1`.
    #[serde(default)]
    pub version: String,

    /// The EIP-155 chain id the account is bound to.
    #[serde(default)]
    pub chain_id: u64,

    /// The server issued nonce.
    #[serde(default)]
    pub nonce: String,

    /// The RFC 3339 time at which the message was issued.
    #[serde(default)]
    pub issued_at: String,

    /// The RFC 3339 time after which the message is no longer valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,

    /// The RFC 3339 time before which the message is not yet valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    /// A system specific identifier for the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Resources the user wishes to have resolved as part of the authentication.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

/// The parsed pieces of a structurally valid [SiweMessage].
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedMessage {
    pub address: [u8; 20],
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
}

impl SiweMessage {
    /// Check that every required field is present and well formed.
    pub fn validate(&self) -> Result<ValidatedMessage, SiweError> {
        require(&self.domain, "domain")?;
        if self.domain.chars().any(char::is_whitespace) {
            return Err(SiweError::Domain);
        }
        require(&self.address, "address")?;
        let address = parse_address(&self.address).map_err(SiweError::Address)?;
        if self.statement.as_deref().is_some_and(|s| s.is_empty() || has_line_break(s)) {
            return Err(SiweError::Statement);
        }
        require(&self.uri, "uri")?;
        if !self.uri.contains(':') || has_line_break(&self.uri) {
            return Err(SiweError::Uri);
        }
        require(&self.version, "version")?;
        if self.version != SUPPORTED_VERSION {
            return Err(SiweError::UnsupportedVersion(self.version.clone()));
        }
        if self.chain_id == 0 {
            return Err(SiweError::MissingField("chainId"));
        }
        require(&self.nonce, "nonce")?;
        if self.nonce.len() < MIN_NONCE_LENGTH || !self.nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SiweError::Nonce);
        }
        require(&self.issued_at, "issuedAt")?;
        let issued_at = parse_timestamp(&self.issued_at, "issuedAt")?;
        let expiration_time =
            self.expiration_time.as_deref().map(|t| parse_timestamp(t, "expirationTime")).transpose()?;
        let not_before = self.not_before.as_deref().map(|t| parse_timestamp(t, "notBefore")).transpose()?;
        if self.request_id.as_deref().is_some_and(has_line_break) {
            return Err(SiweError::LineBreak("requestId"));
        }
        if self.resources.iter().any(|resource| has_line_break(resource)) {
            return Err(SiweError::LineBreak("resources"));
        }
        Ok(ValidatedMessage { address, issued_at, expiration_time, not_before })
    }
}

fn require(value: &str, field: &'static str) -> Result<(), SiweError> {
    if value.is_empty() {
        Err(SiweError::MissingField(field))
    } else {
        Ok(())
    }
}

// Every field is rendered on a line of its own.
fn has_line_break(value: &str) -> bool {
    value.contains(['\n', '\r'])
}

fn parse_timestamp(value: &str, field: &'static str) -> Result<DateTime<Utc>, SiweError> {
    let timestamp = DateTime::parse_from_rfc3339(value).map_err(|e| SiweError::Timestamp(field, e))?;
    Ok(timestamp.with_timezone(&Utc))
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{PREAMBLE}", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Issued At: {}", self.issued_at)?;
        if let Some(expiration_time) = &self.expiration_time {
            write!(f, "\nExpiration Time: {expiration_time}")?;
        }
        if let Some(not_before) = &self.not_before {
            write!(f, "\nNot Before: {not_before}")?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, "\nRequest ID: {request_id}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\nResources:")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for SiweMessage {
    type Err = SiweError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.split('\n').peekable();
        let domain = lines.next().and_then(|l| l.strip_suffix(PREAMBLE)).ok_or(SiweError::Line("preamble"))?;
        let address = lines.next().ok_or(SiweError::Line("address"))?;
        expect_blank(&mut lines)?;
        let statement = match lines.next() {
            Some("") => None,
            Some(statement) => {
                expect_blank(&mut lines)?;
                Some(statement.to_string())
            }
            None => return Err(SiweError::Line("statement")),
        };
        let uri = tagged(&mut lines, "URI: ")?;
        let version = tagged(&mut lines, "Version: ")?;
        let chain_id = tagged(&mut lines, "Chain ID: ")?.parse()?;
        let nonce = tagged(&mut lines, "Nonce: ")?;
        let issued_at = tagged(&mut lines, "Issued At: ")?;
        let expiration_time = optional_tagged(&mut lines, "Expiration Time: ");
        let not_before = optional_tagged(&mut lines, "Not Before: ");
        let request_id = optional_tagged(&mut lines, "Request ID: ");
        let mut resources = Vec::new();
        if lines.next_if_eq(&"Resources:").is_some() {
            for line in lines.by_ref() {
                let resource = line.strip_prefix("- ").ok_or(SiweError::Line("resource"))?;
                resources.push(resource.to_string());
            }
        }
        if lines.next().is_some() {
            return Err(SiweError::TrailingData);
        }
        Ok(Self {
            domain: domain.to_string(),
            address: address.to_string(),
            statement,
            uri: uri.to_string(),
            version: version.to_string(),
            chain_id,
            nonce: nonce.to_string(),
            issued_at: issued_at.to_string(),
            expiration_time: expiration_time.map(ToString::to_string),
            not_before: not_before.map(ToString::to_string),
            request_id: request_id.map(ToString::to_string),
            resources,
        })
    }
}

type Lines<'a> = Peekable<Split<'a, char>>;

fn expect_blank(lines: &mut Lines<'_>) -> Result<(), SiweError> {
    match lines.next() {
        Some("") => Ok(()),
        _ => Err(SiweError::Line("blank")),
    }
}

fn tagged<'a>(lines: &mut Lines<'a>, tag: &'static str) -> Result<&'a str, SiweError> {
    lines.next().and_then(|l| l.strip_prefix(tag)).ok_or(SiweError::Line(tag.trim_end_matches(": ")))
}

fn optional_tagged<'a>(lines: &mut Lines<'a>, tag: &'static str) -> Option<&'a str> {
    let value = lines.peek().and_then(|l| l.strip_prefix(tag))?;
    lines.next();
    Some(value)
}

/// A signed authentication message.
#[derive(Clone, Debug)]
pub struct AuthenticationProof {
    /// The message that was signed.
    pub message: SiweMessage,

    /// The raw signature bytes.
    pub signature: Vec<u8>,
}

impl AuthenticationProof {
    /// Construct a proof from a message and a textual signature.
    ///
    /// The signature can be `0x` prefixed hex, bare hex, or base64.
    pub fn new(message: SiweMessage, signature: &str) -> Result<Self, SiweError> {
        let signature = decode_signature(signature)?;
        Ok(Self { message, signature })
    }
}

fn decode_signature(input: &str) -> Result<Vec<u8>, SiweError> {
    if let Some(hex_chars) = input.strip_prefix("0x") {
        return hex::decode(hex_chars).map_err(|_| SiweError::SignatureEncoding);
    }
    if let Ok(bytes) = hex::decode(input) {
        return Ok(bytes);
    }
    BASE64_STANDARD
        .decode(input)
        .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(input))
        .map_err(|_| SiweError::SignatureEncoding)
}

/// An error when a Sign-In with Ethereum message is malformed.
#[derive(Debug, thiserror::Error)]
pub enum SiweError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("invalid domain")]
    Domain,

    #[error("invalid address: {0}")]
    Address(#[source] ParseDidError),

    #[error("statement must be a single non-empty line")]
    Statement,

    #[error("{0} cannot contain line breaks")]
    LineBreak(&'static str),

    #[error("uri is not a valid URI")]
    Uri,

    #[error("unsupported message version: {0}")]
    UnsupportedVersion(String),

    #[error("nonce must be at least 8 alphanumeric characters")]
    Nonce,

    #[error("invalid {0} timestamp: {1}")]
    Timestamp(&'static str, chrono::ParseError),

    #[error("invalid chain id: {0}")]
    ChainId(#[from] ParseIntError),

    #[error("missing or malformed {0} line")]
    Line(&'static str),

    #[error("unexpected data after message")]
    TrailingData,

    #[error("signature is neither hex nor base64")]
    SignatureEncoding,
}
