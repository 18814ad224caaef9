//! BIP32/BIP44 HD derivation for the secp256k1 chain families.
//!
//! Path format: m/purpose'/coin_type'/account'/change/address_index
//!
//! - Ethereum: m/44'/60'/a'/0/i, EIP-55 address
//! - Tron: m/44'/195'/a'/0/i, Base58Check address with version 0x41
//! - Bitcoin: m/84'/0'/a'/0/i, native SegWit (bc1q) address

use std::fmt;

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar, SecretKey};
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::core::base58;
use crate::core::domain::{ChainKind, DerivedKey, PrivateKey};
use crate::core::errors::WalletError;
use crate::core::mnemonic::mnemonic_to_seed;
use crate::core::validation::{to_checksum_address, TRON_ADDRESS_VERSION};
use crate::security::secret::WalletSecret;

type HmacSha512 = Hmac<Sha512>;

pub const HARDENED: u32 = 0x8000_0000;

/// BIP44-style derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip44Path {
    /// 44 for BIP44, 84 for BIP84 native SegWit
    pub purpose: u32,
    pub coin_type: u32,
    pub account: u32,
    /// External/internal chain (0=external, 1=internal change)
    pub change: u32,
    pub address_index: u32,
}

impl Bip44Path {
    /// Default path for a chain family. BioForest and custom chains have none.
    pub fn for_chain(kind: ChainKind, account: u32, address_index: u32) -> Result<Self, WalletError> {
        let coin_type = kind
            .coin_type()
            .ok_or_else(|| WalletError::UnsupportedChain(format!("{} has no BIP44 path", kind)))?;
        let purpose = if kind == ChainKind::Bitcoin { 84 } else { 44 };
        Ok(Self { purpose, coin_type, account, change: 0, address_index })
    }

    pub fn ethereum_default() -> Self {
        Self { purpose: 44, coin_type: 60, account: 0, change: 0, address_index: 0 }
    }

    pub fn to_indices(&self) -> [u32; 5] {
        [
            HARDENED | self.purpose,
            HARDENED | self.coin_type,
            HARDENED | self.account,
            self.change,
            self.address_index,
        ]
    }
}

impl fmt::Display for Bip44Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m/{}'/{}'/{}'/{}/{}",
            self.purpose, self.coin_type, self.account, self.change, self.address_index
        )
    }
}

/// Extended private key (key + chain code).
pub struct Bip32 {
    chain_code: Zeroizing<[u8; 32]>,
    key: SecretKey,
}

impl Bip32 {
    /// Master key from a BIP39 seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletError> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(WalletError::KeyDerivationError(
                "seed must be between 16 and 64 bytes".to_string(),
            ));
        }
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .map_err(|e| WalletError::CryptoError(format!("HMAC initialization failed: {}", e)))?;
        mac.update(seed);
        let mut result = Zeroizing::new([0u8; 64]);
        result.copy_from_slice(&mac.finalize().into_bytes());

        let key = SecretKey::from_slice(&result[..32])
            .map_err(|_| WalletError::KeyDerivationError("invalid master key".to_string()))?;
        let mut chain_code = Zeroizing::new([0u8; 32]);
        chain_code.copy_from_slice(&result[32..]);
        Ok(Self { chain_code, key })
    }

    /// CKDpriv. Hardened indices hash the private key, normal ones the
    /// compressed public key.
    pub fn derive_child(&self, index: u32) -> Result<Self, WalletError> {
        let mut data = Zeroizing::new(Vec::with_capacity(37));
        if index >= HARDENED {
            data.push(0x00);
            data.extend_from_slice(&self.key.to_bytes());
        } else {
            data.extend_from_slice(&self.public_key_compressed());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let mut mac = HmacSha512::new_from_slice(&self.chain_code[..])
            .map_err(|e| WalletError::CryptoError(format!("HMAC initialization failed: {}", e)))?;
        mac.update(&data);
        let mut result = Zeroizing::new([0u8; 64]);
        result.copy_from_slice(&mac.finalize().into_bytes());

        let tweak: Option<Scalar> =
            Scalar::from_repr(FieldBytes::clone_from_slice(&result[..32])).into();
        let tweak = tweak.ok_or_else(|| {
            WalletError::KeyDerivationError(format!("invalid child at index {}", index))
        })?;
        let child_scalar = tweak + *self.key.to_nonzero_scalar();
        let key = SecretKey::from_bytes(&child_scalar.to_bytes()).map_err(|_| {
            WalletError::KeyDerivationError(format!("invalid child at index {}", index))
        })?;

        let mut chain_code = Zeroizing::new([0u8; 32]);
        chain_code.copy_from_slice(&result[32..]);
        Ok(Self { chain_code, key })
    }

    pub fn derive_indices(&self, indices: &[u32]) -> Result<Self, WalletError> {
        let mut current = Self { chain_code: self.chain_code.clone(), key: self.key.clone() };
        for index in indices {
            current = current.derive_child(*index)?;
        }
        Ok(current)
    }

    pub fn derive_path(&self, path: &Bip44Path) -> Result<Self, WalletError> {
        self.derive_indices(&path.to_indices())
    }

    pub fn private_key(&self) -> PrivateKey {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&self.key.to_bytes());
        PrivateKey::new(arr)
    }

    pub fn public_key_compressed(&self) -> Vec<u8> {
        self.key.public_key().to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn public_key_uncompressed(&self) -> Vec<u8> {
        self.key.public_key().to_encoded_point(false).as_bytes().to_vec()
    }
}

/// Last 20 bytes of Keccak256 over the 64-byte uncompressed key body.
fn keccak_address_bytes(uncompressed: &[u8]) -> [u8; 20] {
    let hash = Keccak256::digest(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

pub fn ethereum_address(uncompressed: &[u8]) -> String {
    to_checksum_address(&keccak_address_bytes(uncompressed))
}

pub fn tron_address(uncompressed: &[u8]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_ADDRESS_VERSION);
    payload.extend_from_slice(&keccak_address_bytes(uncompressed));
    base58::encode_check(&payload)
}

pub fn bitcoin_segwit_address(compressed: &[u8], network: bitcoin::Network) -> Result<String, WalletError> {
    let pubkey = bitcoin::PublicKey::from_slice(compressed)
        .map_err(|e| WalletError::KeyDerivationError(format!("invalid public key: {}", e)))?;
    let address = bitcoin::Address::p2wpkh(&pubkey, network)
        .map_err(|e| WalletError::KeyDerivationError(format!("SegWit address failed: {}", e)))?;
    Ok(address.to_string())
}

/// Derives the key for one BIP44 chain family from a mnemonic secret.
/// Deterministic in (secret, kind, account, index).
pub fn derive_key(
    secret: &WalletSecret,
    kind: ChainKind,
    account: u32,
    index: u32,
) -> Result<DerivedKey, WalletError> {
    let path = Bip44Path::for_chain(kind, account, index)?;
    let seed = mnemonic_to_seed(secret.expose(), "")?;
    let node = Bip32::from_seed(&seed[..])?.derive_path(&path)?;

    let compressed = node.public_key_compressed();
    let uncompressed = node.public_key_uncompressed();
    let (address, public_key) = match kind {
        ChainKind::Evm => (ethereum_address(&uncompressed), uncompressed),
        ChainKind::Tron => (tron_address(&uncompressed), uncompressed),
        ChainKind::Bitcoin => {
            (bitcoin_segwit_address(&compressed, bitcoin::Network::Bitcoin)?, compressed)
        }
        other => return Err(WalletError::UnsupportedChain(other.to_string())),
    };

    tracing::debug!(chain = %kind, path = %path, "derived key");
    Ok(DerivedKey {
        chain: kind,
        derivation_path: Some(path.to_string()),
        private_key: node.private_key(),
        public_key,
        address,
    })
}
