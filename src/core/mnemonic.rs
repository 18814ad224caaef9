use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;
use crate::security::secret::WalletSecret;

/// Word counts accepted by `generate_mnemonic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    Twelve,
    TwentyFour,
}

impl WordCount {
    fn entropy_len(self) -> usize {
        match self {
            WordCount::Twelve => 16,
            WordCount::TwentyFour => 32,
        }
    }
}

impl TryFrom<usize> for WordCount {
    type Error = WalletError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            12 => Ok(WordCount::Twelve),
            24 => Ok(WordCount::TwentyFour),
            n => Err(WalletError::ValidationError(format!("unsupported word count: {}", n))),
        }
    }
}

/// Fresh English mnemonic from OS randomness.
pub fn generate_mnemonic(words: WordCount) -> Result<WalletSecret, WalletError> {
    let mut entropy = Zeroizing::new(vec![0u8; words.entropy_len()]);
    OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| WalletError::CryptoError(e.to_string()))?;
    Ok(WalletSecret::new(mnemonic.to_string()))
}

/// Collapses whitespace and case so pasted phrases parse.
fn normalize(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(phrase.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" "))
}

pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = normalize(phrase);
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

/// BIP39 seed with an optional passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}
