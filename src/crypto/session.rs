//! Sealed, self-expiring session tokens.
//!
//! Wire form: `base64(nonce || AES-256-GCM(issued_at "|" payload))`, where
//! `issued_at` is an RFC 3339 UTC timestamp. Tokens are never renewed in
//! place; a fresh one is sealed instead.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroize;

use super::primitives::{random_bytes, SessionKey};

/// AES-GCM nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// How far in the future an issue timestamp may lie before the token is refused.
pub const DEFAULT_MAX_FUTURE_SKEW_SECS: i64 = 60;

const DELIMITER: u8 = b'|';

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("token sealing failed")]
    Sealing,
    #[error("token is not valid base64")]
    Decode,
    #[error("token is shorter than the nonce")]
    Truncated,
    #[error("token failed authentication")]
    AuthenticationFailed,
    #[error("token plaintext is malformed: {0}")]
    Malformed(&'static str),
    #[error("token has expired")]
    Expired,
    #[error("token issue time lies too far in the future")]
    IssuedInFuture,
    #[error("session cookie is missing")]
    MissingCookie,
    #[error("session payload could not be (de)serialized: {0}")]
    Payload(String),
}

/// What the HTTP layer is allowed to tell the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    Invalid,
    Expired,
}

impl SessionRejection {
    pub fn message(&self) -> &'static str {
        match self {
            SessionRejection::Invalid => "invalid session",
            SessionRejection::Expired => "session expired",
        }
    }
}

impl SessionTokenError {
    /// Collapses every failure except expiry into one opaque rejection.
    pub fn rejection(&self) -> SessionRejection {
        match self {
            SessionTokenError::Expired => SessionRejection::Expired,
            _ => SessionRejection::Invalid,
        }
    }
}

/// Seals `payload` together with the issue time `now` under `key`.
///
/// A fresh random nonce is drawn for every call.
pub fn seal(
    payload: &[u8],
    key: &SessionKey,
    now: DateTime<Utc>,
) -> Result<String, SessionTokenError> {
    let issued = now.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    let mut plaintext = Vec::with_capacity(issued.len() + 1 + payload.len());
    plaintext.extend_from_slice(issued.as_bytes());
    plaintext.push(DELIMITER);
    plaintext.extend_from_slice(payload);

    let sealed = encrypt(&plaintext, key);
    plaintext.zeroize();
    Ok(STANDARD.encode(sealed?))
}

/// Opens a token sealed by [`seal`], rejecting it if it fails
/// authentication, cannot be parsed, or is older than `max_age`.
pub fn open(
    token: &str,
    key: &SessionKey,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<Vec<u8>, SessionTokenError> {
    open_checked(
        token,
        key,
        now,
        max_age,
        Duration::seconds(DEFAULT_MAX_FUTURE_SKEW_SECS),
    )
}

fn open_checked(
    token: &str,
    key: &SessionKey,
    now: DateTime<Utc>,
    max_age: Duration,
    max_future_skew: Duration,
) -> Result<Vec<u8>, SessionTokenError> {
    let sealed = STANDARD
        .decode(token.trim().as_bytes())
        .map_err(|_| SessionTokenError::Decode)?;
    let mut plaintext = decrypt(&sealed, key)?;
    let result = split_and_check(&plaintext, now, max_age, max_future_skew);
    plaintext.zeroize();
    result
}

fn split_and_check(
    plaintext: &[u8],
    now: DateTime<Utc>,
    max_age: Duration,
    max_future_skew: Duration,
) -> Result<Vec<u8>, SessionTokenError> {
    let split = plaintext
        .iter()
        .position(|b| *b == DELIMITER)
        .ok_or(SessionTokenError::Malformed("missing delimiter"))?;
    let issued = std::str::from_utf8(&plaintext[..split])
        .map_err(|_| SessionTokenError::Malformed("timestamp is not utf-8"))?;
    let issued = DateTime::parse_from_rfc3339(issued)
        .map_err(|_| SessionTokenError::Malformed("unparseable timestamp"))?
        .with_timezone(&Utc);

    let elapsed = now.signed_duration_since(issued);
    if elapsed > max_age {
        return Err(SessionTokenError::Expired);
    }
    if -elapsed > max_future_skew {
        return Err(SessionTokenError::IssuedInFuture);
    }

    Ok(plaintext[split + 1..].to_vec())
}

fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<Vec<u8>, SessionTokenError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| SessionTokenError::Sealing)?;
    let nonce_bytes: [u8; NONCE_LEN] = random_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| SessionTokenError::Sealing)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

fn decrypt(sealed: &[u8], key: &SessionKey) -> Result<Vec<u8>, SessionTokenError> {
    if sealed.len() < NONCE_LEN {
        return Err(SessionTokenError::Truncated);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SessionTokenError::AuthenticationFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SessionTokenError::AuthenticationFailed)
}

/// Seals and opens tokens with one key and one maximum age, both fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct SessionTokenCodec {
    key: SessionKey,
    max_age: Duration,
    max_future_skew: Duration,
}

impl SessionTokenCodec {
    pub fn new(key: SessionKey, max_age: Duration) -> Self {
        Self {
            key,
            max_age,
            max_future_skew: Duration::seconds(DEFAULT_MAX_FUTURE_SKEW_SECS),
        }
    }

    pub fn with_max_future_skew(mut self, skew: Duration) -> Self {
        self.max_future_skew = skew;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn seal(&self, payload: &[u8], now: DateTime<Utc>) -> Result<String, SessionTokenError> {
        seal(payload, &self.key, now)
    }

    pub fn open(&self, token: &str, now: DateTime<Utc>) -> Result<Vec<u8>, SessionTokenError> {
        open_checked(token, &self.key, now, self.max_age, self.max_future_skew).map_err(|err| {
            tracing::debug!(reason = %err, "rejected session token");
            err
        })
    }

    /// Serializes `value` as JSON and seals it.
    pub fn seal_json<T: Serialize>(
        &self,
        value: &T,
        now: DateTime<Utc>,
    ) -> Result<String, SessionTokenError> {
        let mut payload =
            serde_json::to_vec(value).map_err(|e| SessionTokenError::Payload(format!("{e}")))?;
        let token = self.seal(&payload, now);
        payload.zeroize();
        token
    }

    /// Opens a token and deserializes its JSON payload.
    pub fn open_json<T: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<T, SessionTokenError> {
        let mut payload = self.open(token, now)?;
        let value = serde_json::from_slice(&payload)
            .map_err(|e| SessionTokenError::Payload(format!("{e}")));
        payload.zeroize();
        value
    }
}
