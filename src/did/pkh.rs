use super::{
    error::ParseDidError,
    ethr::{format_address, parse_address},
};

const EIP155_NAMESPACE: &str = "eip155";

pub(super) fn format(chain_id: u64, address: &[u8; 20]) -> String {
    format!("did:pkh:{EIP155_NAMESPACE}:{chain_id}:{}", format_address(address))
}

pub(super) fn parse(s: &str) -> Result<(u64, [u8; 20]), ParseDidError> {
    let mut parts = s.splitn(3, ':');
    let namespace = parts.next().filter(|n| !n.is_empty()).ok_or(ParseDidError::MissingComponent("namespace"))?;
    if namespace != EIP155_NAMESPACE {
        return Err(ParseDidError::UnsupportedNamespace(namespace.to_string()));
    }
    let chain_id = parts.next().ok_or(ParseDidError::MissingComponent("chain id"))?.parse()?;
    let address = parts.next().ok_or(ParseDidError::MissingComponent("address"))?;
    let address = parse_address(address)?;
    Ok((chain_id, address))
}
