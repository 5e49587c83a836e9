use crate::did::Did;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{fmt, str::FromStr};

const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// An action that can be performed on a resource, e.g. `store/add`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Ability(Vec<String>);

impl Ability {
    /// The ability that covers every action.
    pub fn any() -> Self {
        Self(vec!["*".into()])
    }

    /// The segments in this ability.
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&[&str]> for Ability {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Ability {
    fn from(segments: [&str; N]) -> Self {
        Self::from(segments.as_slice())
    }
}

impl FromStr for Ability {
    type Err = MalformedAbilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MalformedAbilityError::Empty);
        }
        if s == "*" {
            return Ok(Self::any());
        }
        let mut segments = Vec::new();
        for segment in s.split('/') {
            if segment.is_empty() {
                return Err(MalformedAbilityError::EmptySegment);
            }
            if segment.chars().any(|c| c.is_whitespace()) {
                return Err(MalformedAbilityError::Whitespace);
            }
            segments.push(segment.to_string());
        }
        if segments.len() < 2 {
            return Err(MalformedAbilityError::NoNamespace);
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// An encountered error when parsing an ability.
#[derive(Debug, thiserror::Error)]
pub enum MalformedAbilityError {
    #[error("empty ability")]
    Empty,

    #[error("empty segment")]
    EmptySegment,

    #[error("whitespace in ability")]
    Whitespace,

    #[error("ability needs a namespace and an action")]
    NoNamespace,

    #[error("resource is not a URI: {0}")]
    Resource(String),
}

/// A permission to perform an action on a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// The resource this capability is scoped to.
    pub with: String,

    /// The action being granted.
    pub can: Ability,
}

impl Capability {
    /// Constructs a capability, ensuring the resource is a URI.
    pub fn new<S: Into<String>>(with: S, can: Ability) -> Result<Self, MalformedAbilityError> {
        let with = with.into();
        if !is_uri(&with) {
            return Err(MalformedAbilityError::Resource(with));
        }
        Ok(Self { with, can })
    }
}

/// A capability whose resource refers to the subject it will be granted for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTemplate {
    /// The action to grant.
    pub can: Ability,

    /// The resource, where `{subject}` is replaced with the subject's DID.
    #[serde(default = "default_resource")]
    pub with: String,
}

impl CapabilityTemplate {
    /// Creates a template granting `can` on the subject itself.
    pub fn on_subject(can: Ability) -> Self {
        Self { can, with: default_resource() }
    }

    /// Expands this template for the given subject.
    pub fn expand(&self, subject: &Did) -> Result<Capability, MalformedAbilityError> {
        let with = self.with.replace(SUBJECT_PLACEHOLDER, &subject.to_string());
        Capability::new(with, self.can.clone())
    }
}

fn default_resource() -> String {
    SUBJECT_PLACEHOLDER.to_string()
}

fn is_uri(s: &str) -> bool {
    match s.split_once(':') {
        Some((scheme, rest)) => {
            let mut chars = scheme.chars();
            let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
            starts_with_letter
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.is_empty()
        }
        None => false,
    }
}
