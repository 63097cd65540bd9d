//! HTTP Basic authentication header handling.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::Zeroize;

pub const DEFAULT_REALM: &str = "Hack Weight Authentication";

/// Username and password lifted from an `Authorization: Basic` header.
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Drop for BasicCredentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Parses an `Authorization` header value. Returns `None` for any other
/// scheme or an undecodable value.
pub fn parse_authorization(header: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let mut decoded = STANDARD.decode(encoded.trim()).ok()?;
    let parsed = std::str::from_utf8(&decoded).ok().and_then(|text| {
        let (username, password) = text.split_once(':')?;
        Some(BasicCredentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    });
    decoded.zeroize();
    parsed
}

/// Value for the `WWW-Authenticate` header sent with a 401.
pub fn challenge(realm: &str) -> String {
    format!("Basic realm=\"{}\"", realm.replace('"', "'"))
}
