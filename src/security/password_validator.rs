//! Wallet password policy.

use crate::core::config::SecurityConfig;
use crate::core::errors::WalletError;

const WEAK_PASSWORDS: &[&str] = &[
    "password", "123456", "12345678", "qwerty", "abc123", "letmein", "welcome", "monkey",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub reject_common: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8, reject_common: true }
    }
}

impl From<&SecurityConfig> for PasswordPolicy {
    fn from(config: &SecurityConfig) -> Self {
        Self { min_length: config.min_password_length, ..Self::default() }
    }
}

/// Length is counted in characters, not bytes.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Result<(), WalletError> {
    if password.is_empty() {
        return Err(WalletError::ValidationError("password must not be empty".into()));
    }
    if password.chars().count() < policy.min_length {
        return Err(WalletError::ValidationError(format!(
            "password must be at least {} characters",
            policy.min_length
        )));
    }
    if policy.reject_common {
        let lower = password.to_lowercase();
        if WEAK_PASSWORDS.iter().any(|weak| lower == *weak) {
            return Err(WalletError::ValidationError("password is too common".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", false ; "empty")]
    #[test_case("short", false ; "too short")]
    #[test_case("Password", false ; "common")]
    #[test_case("correct horse", true ; "passphrase")]
    #[test_case("密码密码密码密码", true ; "multibyte counted by chars")]
    fn test_default_policy(password: &str, ok: bool) {
        assert_eq!(validate_password(password, &PasswordPolicy::default()).is_ok(), ok);
    }

    #[test]
    fn test_policy_from_config() {
        let config = SecurityConfig { min_password_length: 12, ..SecurityConfig::default() };
        let policy = PasswordPolicy::from(&config);
        assert!(validate_password("elevenchars", &policy).is_err());
        assert!(validate_password("twelve chars", &policy).is_ok());
    }
}
