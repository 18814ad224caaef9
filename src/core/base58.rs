//! Base58 and Base58Check helpers shared by Tron and BioForest addresses.

use sha2::{Digest, Sha256};

use crate::core::errors::WalletError;

const CHECKSUM_LEN: usize = 4;

pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

pub fn decode(s: &str) -> Result<Vec<u8>, WalletError> {
    bs58::decode(s)
        .into_vec()
        .map_err(|e| WalletError::InvalidAddress(format!("invalid base58: {}", e)))
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

/// Appends the first four bytes of double SHA-256 before encoding.
pub fn encode_check(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum(payload));
    encode(&data)
}

/// Decodes and verifies the trailing checksum, returning the payload.
pub fn decode_check(s: &str) -> Result<Vec<u8>, WalletError> {
    let data = decode(s)?;
    if data.len() < CHECKSUM_LEN {
        return Err(WalletError::InvalidAddress("base58check payload too short".into()));
    }
    let (payload, check) = data.split_at(data.len() - CHECKSUM_LEN);
    if checksum(payload) != check {
        return Err(WalletError::InvalidAddress("base58check checksum mismatch".into()));
    }
    Ok(payload.to_vec())
}
