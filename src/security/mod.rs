//! Secret handling: zeroizing wrappers, password-based encryption,
//! password policy and log redaction.

pub mod encryption;
pub mod password_validator;
pub mod secret;

// Redaction helpers to avoid accidental secret prints
pub mod redaction;
pub use redaction::{redact_body, redact_hex_bytes};

pub use encryption::{decrypt_secret, encrypt_secret, verify_password, EncryptedBlob};
pub use secret::{SecretVec, WalletSecret};
