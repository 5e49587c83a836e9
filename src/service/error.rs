use crate::{
    backend::BackendError,
    block::EncodingError,
    capability::MalformedAbilityError,
    did::ParseDidError,
    nonce::NonceError,
    siwe::SiweError,
    verifier::AuthError,
};
use serde::Serialize;

/// An error when handling an issuance request.
///
/// Every error is raised before any part of the response is produced.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// No endpoint with the given name is configured.
    #[error("Invalid API route")]
    UnknownEndpoint(String),

    #[error("malformed request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("malformed sign-in message: {0}")]
    MalformedMessage(#[source] SiweError),

    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("missing required field: aud")]
    MissingAudience,

    #[error("invalid aud: {0}")]
    InvalidAudience(#[source] ParseDidError),

    #[error("invalid capability: {0}")]
    InvalidCapability(#[from] MalformedAbilityError),

    #[error("signing unavailable: {0}")]
    SigningUnavailable(#[source] BackendError),

    #[error("issuing delegation: {0}")]
    Issuance(#[source] BackendError),

    #[error("nonce unavailable: {0}")]
    Nonce(#[source] NonceError),

    #[error("encoding delegation: {0}")]
    Encoding(#[from] EncodingError),

    #[error("request timed out")]
    Timeout,
}

impl IssueError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        use IssueError::*;
        match self {
            // 400 Bad Request
            MissingAudience | InvalidAudience(_) | InvalidCapability(_) => 400,

            // 401 Unauthorized, unless the message itself was unusable
            Authentication(AuthError::Malformed(_)) => 422,
            Authentication(_) => 401,

            // 404 Not Found
            UnknownEndpoint(_) => 404,

            // 422 Unprocessable Entity
            MalformedBody(_) | MissingField(_) | MalformedMessage(_) => 422,

            // 503 Service Unavailable
            SigningUnavailable(_) => 503,

            // 504 Gateway Timeout
            Timeout => 504,

            // 500 Internal Server Error
            Issuance(_) | Nonce(_) | Encoding(_) => 500,
        }
    }

    /// The body to respond with.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { message: self.to_string(), success: false }
    }
}

impl From<BackendError> for IssueError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unavailable(_) => Self::SigningUnavailable(e),
            _ => Self::Issuance(e),
        }
    }
}

/// A failed response body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// A description of what went wrong.
    pub message: String,

    /// Always `false`.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::endpoint(IssueError::UnknownEndpoint("x".into()), 404)]
    #[case::missing(IssueError::MissingField("siwe"), 422)]
    #[case::malformed(IssueError::Authentication(AuthError::Malformed(SiweError::Nonce)), 422)]
    #[case::signature(IssueError::Authentication(AuthError::BadSignature), 401)]
    #[case::nonce(IssueError::Authentication(AuthError::InvalidNonce(NonceError::AlreadyConsumed)), 401)]
    #[case::expired(IssueError::Authentication(AuthError::Expired), 401)]
    #[case::audience(IssueError::MissingAudience, 400)]
    #[case::unavailable(IssueError::from(BackendError::Unavailable("down".into())), 503)]
    #[case::ttl(IssueError::from(BackendError::InvalidTtl), 500)]
    #[case::timeout(IssueError::Timeout, 504)]
    fn status_codes(#[case] error: IssueError, #[case] expected: u16) {
        assert_eq!(error.status_code(), expected);
    }

    #[test]
    fn response_body() {
        let body = serde_json::to_value(IssueError::MissingAudience.to_response()).expect("serialize failed");
        assert_eq!(body, serde_json::json!({ "message": "missing required field: aud", "success": false }));
    }

    #[test]
    fn unknown_endpoint_body() {
        let response = IssueError::UnknownEndpoint("admin".into()).to_response();
        let body = serde_json::to_value(response).expect("serialize failed");
        assert_eq!(body, serde_json::json!({ "message": "Invalid API route", "success": false }));
    }
}
