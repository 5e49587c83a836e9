use super::error::ParseDidError;

pub(super) fn format(id: &str) -> String {
    format!("did:web:{id}")
}

/// Parses a `did:web` method specific id, lowercasing the host.
pub(super) fn parse(s: &str) -> Result<String, ParseDidError> {
    let mut segments = s.split(':');
    let host = segments.next().unwrap_or_default();
    if !is_valid_segment(host) {
        return Err(ParseDidError::InvalidWebId);
    }
    let mut id = host.to_ascii_lowercase();
    for segment in segments {
        if !is_valid_segment(segment) {
            return Err(ParseDidError::InvalidWebId);
        }
        id.push(':');
        id.push_str(segment);
    }
    Ok(id)
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '%'))
}
