//! Signing key material and the providers that supply it.
//!
//! The issuer and validator never read the environment themselves; they are
//! handed a `KeyProvider` at construction so tests can pin a fixed key and a
//! rotating source can be layered in later.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::ConfigError;

/// HMAC key bytes. Wiped from memory on drop.
#[derive(Clone)]
pub struct SigningKey(Arc<Zeroizing<Vec<u8>>>);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ConfigError::MissingSecret);
        }
        Ok(Self(Arc::new(Zeroizing::new(bytes))))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Supplies the shared signing secret.
pub trait KeyProvider: Send + Sync {
    fn signing_key(&self) -> SigningKey;
}

/// Fixed key, used by tests and the CLI.
pub struct StaticKeyProvider {
    key: SigningKey,
}

impl StaticKeyProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        Ok(Self {
            key: SigningKey::new(secret)?,
        })
    }
}

impl KeyProvider for StaticKeyProvider {
    fn signing_key(&self) -> SigningKey {
        self.key.clone()
    }
}

/// Reads the secret once from an environment variable at construction.
/// A missing or blank variable is a `ConfigError`, so a provider that exists
/// always holds a usable key.
pub struct EnvKeyProvider {
    key: SigningKey,
}

pub const SECRET_ENV_VAR: &str = "SSO_SECRET_KEY";

impl EnvKeyProvider {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_var(SECRET_ENV_VAR)
    }

    pub fn from_var(name: &str) -> Result<Self, ConfigError> {
        let raw = std::env::var(name).map_err(|_| ConfigError::MissingSecret)?;
        Ok(Self {
            key: SigningKey::new(raw)?,
        })
    }
}

impl KeyProvider for EnvKeyProvider {
    fn signing_key(&self) -> SigningKey {
        self.key.clone()
    }
}

/// Generate a random 32-byte secret, hex-encoded, suitable for SSO_SECRET_KEY.
pub fn generate_secret_hex() -> String {
    use rand::RngCore;
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    hex::encode(&bytes[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(
            StaticKeyProvider::new("").err(),
            Some(ConfigError::MissingSecret)
        );
        assert_eq!(
            StaticKeyProvider::new("  \n").err(),
            Some(ConfigError::MissingSecret)
        );
    }

    #[test]
    fn test_unset_env_var_is_config_error() {
        let res = EnvKeyProvider::from_var("SSO_GATEWAY_TEST_UNSET_SECRET_VAR");
        assert_eq!(res.err(), Some(ConfigError::MissingSecret));
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = SigningKey::new("topsecret").unwrap();
        assert_eq!(format!("{:?}", key), "SigningKey(<redacted>)");
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_secret_hex();
        let b = generate_secret_hex();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
