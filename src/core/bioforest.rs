//! BioForest key derivation and signing.
//!
//! Any string is a valid BioForest secret. The Ed25519 seed is SHA-256 of
//! the secret, so every BioForest chain shares one keypair and only the
//! address prefix differs between chains.

use bitcoin::hashes::{ripemd160, Hash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::core::base58;
use crate::core::domain::{ChainKind, DerivedKey, PrivateKey};
use crate::core::errors::WalletError;

/// Ed25519 keypair derived from a BioForest secret.
pub struct BioforestKeypair {
    signing: SigningKey,
}

impl BioforestKeypair {
    pub fn from_secret(secret: &str) -> Self {
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(secret.as_bytes()).into());
        BioforestKeypair { signing: SigningKey::from_bytes(&seed) }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn address(&self, prefix: &str) -> String {
        address_from_public_key(&self.public_key(), prefix)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message))
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey::new(self.signing.to_bytes())
    }
}

/// Payload shared by every BioForest chain: Base58Check(RIPEMD160(SHA-256(pk))).
pub fn address_payload(public_key: &[u8]) -> String {
    let sha = Sha256::digest(public_key);
    let hash = ripemd160::Hash::hash(&sha);
    base58::encode_check(hash.as_byte_array())
}

pub fn address_from_public_key(public_key: &[u8], prefix: &str) -> String {
    format!("{}{}", prefix, address_payload(public_key))
}

/// Derives the BioForest key for one chain prefix.
pub fn derive_key(secret: &str, prefix: &str) -> DerivedKey {
    let keypair = BioforestKeypair::from_secret(secret);
    DerivedKey {
        chain: ChainKind::BioForest,
        derivation_path: None,
        private_key: keypair.private_key(),
        public_key: keypair.public_key().to_vec(),
        address: keypair.address(prefix),
    }
}

/// Verifies a detached Ed25519 signature.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool, WalletError> {
    let pk: [u8; 32] = public_key
        .try_into()
        .map_err(|_| WalletError::CryptoError("public key must be 32 bytes".into()))?;
    let sig: [u8; 64] = signature
        .try_into()
        .map_err(|_| WalletError::CryptoError("signature must be 64 bytes".into()))?;
    let vk = VerifyingKey::from_bytes(&pk)
        .map_err(|e| WalletError::CryptoError(format!("invalid public key: {}", e)))?;
    Ok(vk.verify(message, &Signature::from_bytes(&sig)).is_ok())
}
