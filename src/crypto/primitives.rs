//! Shared primitives used by both password verification and session sealing:
//! OS randomness, constant-time comparison, and the process-wide session key.
//! Nothing outside `crate::crypto` ever sees raw key bytes.

use std::fmt;
use std::fs;
use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

/// AES-256 key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"hackweight-session-salt";
const HKDF_INFO: &[u8] = b"hackweight session cookie v1";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key length {0}; expected 32 bytes")]
    InvalidKeyLength(usize),
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),
    #[error("key source unreadable: {0}")]
    KeySourceUnreadable(String),
    #[error("base64 decoding failed: {0}")]
    Base64DecodeFailed(String),
    #[error("secret must not be empty")]
    EmptySecret,
}

/// Fills a fixed-size array from the platform's secure entropy source.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Compares two byte strings without short-circuiting on the first
/// differing byte. Slices of different lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// The symmetric secret used to seal session tokens.
///
/// Loaded once at startup and handed to [`crate::crypto::session::SessionTokenCodec`].
/// The bytes are wiped when the value is dropped and never printed.
#[derive(Clone)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Builds a key from exactly 32 raw bytes.
    pub fn from_bytes(key_bytes: &[u8]) -> Result<Self, KeyError> {
        if key_bytes.len() != SESSION_KEY_LEN {
            return Err(KeyError::InvalidKeyLength(key_bytes.len()));
        }
        let mut key = [0u8; SESSION_KEY_LEN];
        key.copy_from_slice(key_bytes);
        Ok(Self(key))
    }

    /// Draws a fresh random key.
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    /// Decodes a base64 key; trailing padding is optional.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let mut decoded = STANDARD_NO_PAD
            .decode(trimmed.as_bytes())
            .map_err(|e| KeyError::Base64DecodeFailed(format!("{e}")))?;
        let key = Self::from_bytes(&decoded);
        decoded.zeroize();
        key
    }

    /// Reads a base64-encoded key from an environment variable.
    pub fn from_env_var(var: &str) -> Result<Self, KeyError> {
        let encoded =
            std::env::var(var).map_err(|e| KeyError::KeySourceUnreadable(format!("{var}: {e}")))?;
        Self::from_base64(&encoded)
    }

    /// Reads a base64-encoded key from disk.
    pub fn from_key_file(path: &Path) -> Result<Self, KeyError> {
        let content = fs::read_to_string(path)
            .map_err(|e| KeyError::KeySourceUnreadable(format!("{}: {e}", path.display())))?;
        Self::from_base64(&content)
    }

    /// Derives a key from an operator passphrase using Argon2id. The salt must
    /// be random per deployment and stored alongside the configuration.
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, KeyError> {
        if passphrase.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        let params = Params::new(19 * 1024, 3, 1, Some(SESSION_KEY_LEN))
            .map_err(|e| KeyError::DerivationFailed(format!("{e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; SESSION_KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| KeyError::DerivationFailed(format!("{e}")))?;

        let key = Self(output);
        output.zeroize();
        Ok(key)
    }

    /// Stretches an arbitrary-length secret string into a key with
    /// HKDF-SHA256. Suitable for high-entropy secrets only; use
    /// [`SessionKey::derive_from_passphrase`] for anything a human typed.
    pub fn derive_from_secret(secret: &str) -> Result<Self, KeyError> {
        if secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut okm = [0u8; SESSION_KEY_LEN];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| KeyError::DerivationFailed(format!("{e}")))?;
        let key = Self(okm);
        okm.zeroize();
        Ok(key)
    }

    /// Base64 form suitable for `key_env` / `key_path` sources.
    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SessionKey {}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::{constant_time_eq, random_bytes, KeyError, SessionKey};
    use hex::ToHex;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn compares_in_constant_time() {
        assert!(constant_time_eq(b"same-bytes", b"same-bytes"));
        assert!(!constant_time_eq(b"same-bytes", b"same-bytez"));
        assert!(!constant_time_eq(b"short", b"longer-value"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn random_bytes_differ_between_calls() {
        let a: [u8; 16] = random_bytes();
        let b: [u8; 16] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_key_lengths() {
        let err = SessionKey::from_bytes(&[1u8; 16]).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyLength(16)));
        assert!(format!("{err}").contains("invalid key length"));
    }

    #[test]
    fn base64_round_trips_with_and_without_padding() {
        let key = SessionKey::generate();
        let encoded = key.to_base64();
        assert_eq!(SessionKey::from_base64(&encoded).unwrap(), key);
        assert_eq!(SessionKey::from_base64(&format!("{encoded}=\n")).unwrap(), key);
    }

    #[test]
    fn loads_key_from_file() {
        let key = SessionKey::from_bytes(&[9u8; 32]).unwrap();
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), format!("{}\n", key.to_base64())).unwrap();
        assert_eq!(SessionKey::from_key_file(file.path()).unwrap(), key);
    }

    #[test]
    fn secret_derivation_is_deterministic() {
        let a = SessionKey::derive_from_secret("a-long-random-deployment-secret").unwrap();
        let b = SessionKey::derive_from_secret("a-long-random-deployment-secret").unwrap();
        let c = SessionKey::derive_from_secret("another-secret").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // HKDF-SHA256 (RFC 5869) with the session salt and info strings.
        assert_eq!(
            a.as_bytes().encode_hex::<String>(),
            "f12b7fbb10a5a9aa9d9a8f01e5839aa832555ab2e01bedd288b87705beaa88cc"
        );
        assert!(matches!(
            SessionKey::derive_from_secret(""),
            Err(KeyError::EmptySecret)
        ));
    }

    #[test]
    fn derives_key_from_passphrase() {
        let salt = b"static-test-salt-123";
        let a = SessionKey::derive_from_passphrase("pa55phrase", salt).unwrap();
        let b = SessionKey::derive_from_passphrase("pa55phrase", salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = SessionKey::from_bytes(&[0xAB; 32]).unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("171"));
        assert!(printed.contains("redacted"));
    }
}
