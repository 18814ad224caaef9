use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use sha3::{Digest, Keccak256};

use crate::core::base58;
use crate::core::domain::ChainKind;
use crate::core::errors::WalletError;

pub const TRON_ADDRESS_VERSION: u8 = 0x41;

static EVM_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Hardcoded regex should always compile"));
static HEX_CHAIN_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0[xX][0-9a-fA-F]{1,16}$").expect("Hardcoded regex should always compile"));

/// Validates an EVM address. Mixed case must carry a valid EIP-55 checksum;
/// all-lower or all-upper bodies are accepted.
pub fn validate_evm_address(address: &str) -> Result<(), WalletError> {
    if !EVM_ADDRESS_RE.is_match(address) {
        return Err(WalletError::InvalidAddress(format!("not an EVM address: {}", address)));
    }
    let body = &address[2..];
    let is_all_lower = body.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = body.chars().all(|c| !c.is_ascii_lowercase());
    if is_all_lower || is_all_upper {
        return Ok(());
    }
    if !is_eip55_checksum_valid(address) {
        return Err(WalletError::InvalidAddress("invalid EIP-55 checksum".into()));
    }
    Ok(())
}

fn is_eip55_checksum_valid(addr: &str) -> bool {
    let body = &addr[2..];
    let hash = Keccak256::digest(body.to_lowercase().as_bytes());
    for (i, ch) in body.chars().enumerate() {
        let nibble = (hash[i / 2] >> (4 * (1 - (i % 2)))) & 0x0f;
        match ch {
            'a'..='f' if nibble >= 8 => return false,
            'A'..='F' if nibble < 8 => return false,
            _ => {}
        }
    }
    true
}

/// EIP-55 checksummed `0x` address for 20 raw bytes.
pub fn to_checksum_address(bytes: &[u8; 20]) -> String {
    let lower = hex::encode(bytes);
    let hash = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (4 * (1 - (i % 2)))) & 0x0f;
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Tron base58 address: Base58Check of `0x41 ‖ 20 bytes`.
pub fn validate_tron_address(address: &str) -> Result<(), WalletError> {
    if address.len() != 34 || !address.starts_with('T') {
        return Err(WalletError::InvalidAddress(format!("not a Tron address: {}", address)));
    }
    let payload = base58::decode_check(address)?;
    if payload.len() != 21 || payload[0] != TRON_ADDRESS_VERSION {
        return Err(WalletError::InvalidAddress("bad Tron address payload".into()));
    }
    Ok(())
}

/// Raw 21-byte form of a Tron address.
pub fn tron_address_bytes(address: &str) -> Result<[u8; 21], WalletError> {
    validate_tron_address(address)?;
    let payload = base58::decode_check(address)?;
    let mut out = [0u8; 21];
    out.copy_from_slice(&payload);
    Ok(out)
}

pub fn validate_bitcoin_address(address: &str, network: bitcoin::Network) -> Result<(), WalletError> {
    let parsed = bitcoin::Address::from_str(address)
        .map_err(|e| WalletError::InvalidAddress(format!("not a Bitcoin address: {}", e)))?;
    if !parsed.is_valid_for_network(network) {
        return Err(WalletError::InvalidAddress(format!("address is not for {}", network)));
    }
    Ok(())
}

/// BioForest address: `prefix ‖ Base58Check(20-byte hash)`.
pub fn validate_bioforest_address(address: &str, prefix: &str) -> Result<(), WalletError> {
    let payload = address
        .strip_prefix(prefix)
        .ok_or_else(|| WalletError::InvalidAddress(format!("expected prefix {}", prefix)))?;
    let hash = base58::decode_check(payload)?;
    if hash.len() != 20 {
        return Err(WalletError::InvalidAddress("bad BioForest address payload".into()));
    }
    Ok(())
}

/// Kind-level address check used before any chain call.
pub fn is_valid_address(address: &str, kind: ChainKind, prefix: Option<&str>) -> bool {
    match kind {
        ChainKind::Evm => validate_evm_address(address).is_ok(),
        ChainKind::Tron => validate_tron_address(address).is_ok(),
        ChainKind::Bitcoin => validate_bitcoin_address(address, bitcoin::Network::Bitcoin).is_ok(),
        ChainKind::BioForest => {
            prefix.map_or(false, |p| validate_bioforest_address(address, p).is_ok())
        }
        ChainKind::Custom => false,
    }
}

/// `56 -> "0x38"`.
pub fn to_hex_chain_id(chain_id: u64) -> String {
    format!("{:#x}", chain_id)
}

/// `"0x38" -> 56`. Rejects missing prefix and non-hex digits.
pub fn parse_hex_chain_id(hex_id: &str) -> Result<u64, WalletError> {
    let trimmed = hex_id.trim();
    if !HEX_CHAIN_ID_RE.is_match(trimmed) {
        return Err(WalletError::ValidationError(format!("invalid hex chain id: {}", hex_id)));
    }
    u64::from_str_radix(&trimmed[2..], 16)
        .map_err(|_| WalletError::ValidationError(format!("invalid hex chain id: {}", hex_id)))
}
