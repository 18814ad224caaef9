use sha3::{Digest, Keccak256};

use crate::core::errors::WalletError;

pub const ERC20_TRANSFER_SIGNATURE: &str = "transfer(address,uint256)";

/// First 4 bytes of Keccak256 over a function signature.
pub fn selector_from_signature(signature: &str) -> [u8; 4] {
    let out = Keccak256::digest(signature.as_bytes());
    [out[0], out[1], out[2], out[3]]
}

/// Left-pads a 20-byte address into a 32-byte ABI word.
pub fn abi_word_address(addr: &[u8; 20]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr);
    out
}

/// Parses `0x`-prefixed or bare 40-char hex into 20 bytes.
pub fn parse_evm_address_bytes(addr_hex: &str) -> Result<[u8; 20], WalletError> {
    let body = addr_hex.strip_prefix("0x").unwrap_or(addr_hex);
    let bytes = hex::decode(body)
        .map_err(|_| WalletError::InvalidAddress(format!("invalid hex address: {}", addr_hex)))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidAddress(format!("address must be 20 bytes: {}", addr_hex)))
}

pub fn abi_word_uint(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

pub fn abi_pack(selector: [u8; 4], words: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32 * words.len());
    out.extend_from_slice(&selector);
    for w in words {
        out.extend_from_slice(w);
    }
    out
}

/// Argument words of `transfer(address,uint256)`, without selector. Tron's
/// `triggersmartcontract` takes exactly this as its `parameter`.
pub fn token_transfer_params(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&abi_word_address(to));
    out.extend_from_slice(&abi_word_uint(amount));
    out
}

/// Full ERC-20 `transfer` calldata.
pub fn erc20_transfer_calldata(to: &[u8; 20], amount: u128) -> Vec<u8> {
    abi_pack(
        selector_from_signature(ERC20_TRANSFER_SIGNATURE),
        &[abi_word_address(to), abi_word_uint(amount)],
    )
}
