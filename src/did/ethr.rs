use super::error::ParseDidError;
use ethers::types::Address;
use ethers::utils::to_checksum;

pub(super) fn format(address: &[u8; 20]) -> String {
    format!("did:ethr:{}", format_address(address))
}

pub(super) fn parse(s: &str) -> Result<[u8; 20], ParseDidError> {
    parse_address(s)
}

/// Formats an address using its EIP-55 checksummed form.
pub(crate) fn format_address(address: &[u8; 20]) -> String {
    to_checksum(&Address::from(*address), None)
}

/// Parses a `0x` prefixed address.
///
/// Mixed case addresses must match their EIP-55 checksum.
pub(crate) fn parse_address(s: &str) -> Result<[u8; 20], ParseDidError> {
    let hex_chars = s.strip_prefix("0x").ok_or(ParseDidError::AddressPrefix)?;
    let mut address = [0; 20];
    hex::decode_to_slice(hex_chars, &mut address).map_err(ParseDidError::AddressChars)?;

    let has_lower = hex_chars.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_chars.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && format_address(&address) != s {
        return Err(ParseDidError::AddressChecksum);
    }
    Ok(address)
}
