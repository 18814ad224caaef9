//! Small helpers and wrappers for secret material that must be zeroized on drop.
use std::fmt;

use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroizing;

/// Common alias for secret byte buffers which will be zeroed when dropped.
pub type SecretVec = Zeroizing<Vec<u8>>;

/// Convert a Vec<u8> into a `SecretVec` which will be zeroized on drop.
pub fn vec_to_secret(v: Vec<u8>) -> SecretVec {
    Zeroizing::new(v)
}

/// Wallet secret: a mnemonic or an arbitrary BioForest passphrase.
///
/// Zeroed on drop. Has no `Display`; `Debug` only shows a marker.
pub struct WalletSecret(Secret<String>);

impl WalletSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        WalletSecret(Secret::new(secret.into()))
    }

    /// Borrow the plaintext. Keep the borrow short.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    /// Decodes a decrypted byte buffer; the buffer is zeroized either way.
    pub fn from_utf8(bytes: SecretVec) -> Option<Self> {
        std::str::from_utf8(&bytes).ok().map(WalletSecret::new)
    }

    /// Explicit deep copy; the type is not `Clone`.
    pub fn duplicate(&self) -> Self {
        WalletSecret::new(self.expose())
    }
}

impl fmt::Debug for WalletSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WalletSecret([REDACTED])")
    }
}

impl From<String> for WalletSecret {
    fn from(value: String) -> Self {
        WalletSecret(Secret::new(value))
    }
}

impl From<&str> for WalletSecret {
    fn from(value: &str) -> Self {
        WalletSecret::new(value)
    }
}
