//! Configuration loader. The file names where the session key comes from but
//! never holds the key itself; key material is resolved into a
//! [`SessionKey`] in memory and handed to the components that need it.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use chrono::Duration;
use serde::Deserialize;
use thiserror::Error;

use crate::basic_auth::DEFAULT_REALM;
use crate::cookie::{SessionCookies, DEFAULT_COOKIE_NAME};
use crate::crypto::passwords::{CredentialVerifier, HashParams, PasswordError};
use crate::crypto::primitives::SessionKey;
use crate::crypto::session::{SessionTokenCodec, DEFAULT_MAX_FUTURE_SKEW_SECS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("session key error: {0}")]
    Key(String),
    #[error("no usable session key source configured")]
    MissingKeySource,
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Where the session key comes from. The first populated source wins, in
/// field order.
#[derive(Debug, Default, Deserialize)]
pub struct KeySourceConfig {
    /// Environment variable holding a base64-encoded 32 byte key.
    pub key_env: Option<String>,
    /// File containing a base64-encoded 32 byte key.
    pub key_path: Option<PathBuf>,
    /// Environment variable holding a passphrase (Argon2id KDF).
    pub passphrase_env: Option<String>,
    /// Base64-encoded salt used alongside the passphrase.
    pub salt_b64: Option<String>,
    /// Environment variable holding a high-entropy secret string (HKDF).
    pub secret_env: Option<String>,
}

impl KeySourceConfig {
    pub fn build_key(&self) -> Result<SessionKey, ConfigError> {
        let key_err = |e: crate::crypto::primitives::KeyError| ConfigError::Key(format!("{e}"));

        if let Some(var) = &self.key_env {
            return SessionKey::from_env_var(var).map_err(key_err);
        }
        if let Some(path) = &self.key_path {
            return SessionKey::from_key_file(path).map_err(key_err);
        }
        if let (Some(pass_env), Some(salt_b64)) = (&self.passphrase_env, &self.salt_b64) {
            let passphrase = std::env::var(pass_env)
                .map_err(|e| ConfigError::Key(format!("{pass_env}: {e}")))?;
            let salt = STANDARD_NO_PAD
                .decode(salt_b64.trim().trim_end_matches('=').as_bytes())
                .map_err(|e| ConfigError::Key(format!("salt_b64: {e}")))?;
            return SessionKey::derive_from_passphrase(&passphrase, &salt).map_err(key_err);
        }
        if let Some(var) = &self.secret_env {
            let secret =
                std::env::var(var).map_err(|e| ConfigError::Key(format!("{var}: {e}")))?;
            return SessionKey::derive_from_secret(&secret).map_err(key_err);
        }
        Err(ConfigError::MissingKeySource)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthConfig {
    pub database_path: PathBuf,
    /// Session lifetime in minutes.
    #[serde(default = "default_cookie_age")]
    pub cookie_age: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: i64,
    pub log_level: Option<String>,
    #[serde(default)]
    pub password_hashing: HashParams,
    #[serde(default)]
    pub session_key: KeySourceConfig,
}

fn default_cookie_age() -> i64 {
    30
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

fn default_clock_skew() -> i64 {
    DEFAULT_MAX_FUTURE_SKEW_SECS
}

/// Immutable settings resolved once at startup.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub database_path: PathBuf,
    pub cookie_name: String,
    pub cookie_age: Duration,
    pub realm: String,
    pub clock_skew: Duration,
    pub log_level: Option<String>,
    pub password_hashing: HashParams,
    session_key: SessionKey,
}

impl RuntimeConfig {
    pub fn credential_verifier(&self) -> Result<CredentialVerifier, PasswordError> {
        CredentialVerifier::new(self.password_hashing)
    }

    pub fn session_codec(&self) -> SessionTokenCodec {
        SessionTokenCodec::new(self.session_key.clone(), self.cookie_age)
            .with_max_future_skew(self.clock_skew)
    }

    pub fn session_cookies(&self) -> SessionCookies {
        SessionCookies::new(self.session_codec(), self.cookie_name.clone())
    }
}

impl TryFrom<RawAuthConfig> for RuntimeConfig {
    type Error = ConfigError;

    fn try_from(raw: RawAuthConfig) -> Result<Self, Self::Error> {
        if raw.cookie_age <= 0 {
            return Err(ConfigError::Invalid(format!(
                "cookieAge must be positive, got {}",
                raw.cookie_age
            )));
        }
        if raw.clock_skew_seconds < 0 {
            return Err(ConfigError::Invalid(format!(
                "clockSkewSeconds must not be negative, got {}",
                raw.clock_skew_seconds
            )));
        }
        if raw.cookie_name.is_empty()
            || raw
                .cookie_name
                .contains(|c: char| c.is_whitespace() || matches!(c, '=' | ';' | ','))
        {
            return Err(ConfigError::Invalid(format!(
                "cookieName {:?} is not a valid cookie name",
                raw.cookie_name
            )));
        }
        raw.password_hashing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("passwordHashing: {e}")))?;
        let cookie_age = Duration::try_minutes(raw.cookie_age)
            .ok_or_else(|| ConfigError::Invalid("cookieAge is out of range".to_string()))?;
        let clock_skew = Duration::try_seconds(raw.clock_skew_seconds)
            .ok_or_else(|| ConfigError::Invalid("clockSkewSeconds is out of range".to_string()))?;

        let session_key = raw.session_key.build_key()?;

        Ok(Self {
            database_path: raw.database_path,
            cookie_name: raw.cookie_name,
            cookie_age,
            realm: raw.realm,
            clock_skew,
            log_level: raw.log_level,
            password_hashing: raw.password_hashing,
            session_key,
        })
    }
}

/// Loads the JSON configuration file and resolves the session key.
pub fn load_config(path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
    let path = path.as_ref();
    let raw_json = fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
    let raw_config: RawAuthConfig =
        serde_json::from_str(&raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;
    let config = RuntimeConfig::try_from(raw_config)?;
    tracing::debug!(
        path = %path.display(),
        cookie_age_minutes = config.cookie_age.num_minutes(),
        "configuration loaded"
    );
    Ok(config)
}
