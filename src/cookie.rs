//! Session cookie transport: rendering `Set-Cookie` values and reading the
//! session cookie back out of a request's `Cookie` header.

use chrono::{DateTime, Duration, Utc};

use crate::crypto::session::{SessionTokenCodec, SessionTokenError};

pub const DEFAULT_COOKIE_NAME: &str = "user";

const CLEARED_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Name and lifetime of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub max_age: Duration,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            max_age,
        }
    }

    /// `Set-Cookie` value carrying `value`, expiring `max_age` after `now`.
    pub fn set_header(&self, value: &str, now: DateTime<Utc>) -> String {
        let expires = http_date(now + self.max_age);
        self.render(value, &expires)
    }

    /// `Set-Cookie` value that overwrites the cookie with an empty, already
    /// expired one.
    pub fn clear_header(&self) -> String {
        self.render("", CLEARED_EXPIRES)
    }

    fn render(&self, value: &str, expires: &str) -> String {
        format!(
            "{}={}; Path=/; Expires={}; HttpOnly; SameSite=Lax",
            self.name, value, expires
        )
    }
}

/// IMF-fixdate, e.g. `Mon, 01 Jan 2024 00:30:00 GMT`.
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Finds cookie `name` in a request `Cookie` header value.
pub fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Issues and reads sealed session cookies.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    codec: SessionTokenCodec,
    cookie: SessionCookie,
}

impl SessionCookies {
    /// The cookie expires together with the token it carries.
    pub fn new(codec: SessionTokenCodec, name: impl Into<String>) -> Self {
        let cookie = SessionCookie::new(name, codec.max_age());
        Self { codec, cookie }
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Seals `payload` and returns the `Set-Cookie` value to send.
    pub fn issue(&self, payload: &[u8], now: DateTime<Utc>) -> Result<String, SessionTokenError> {
        let token = self.codec.seal(payload, now)?;
        Ok(self.cookie.set_header(&token, now))
    }

    /// Opens the session cookie found in `cookie_header`.
    pub fn read(
        &self,
        cookie_header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, SessionTokenError> {
        let token = cookie_header
            .and_then(|header| cookie_value(header, &self.cookie.name))
            .filter(|token| !token.is_empty())
            .ok_or(SessionTokenError::MissingCookie)?;
        self.codec.open(token, now)
    }

    pub fn clear(&self) -> String {
        self.cookie.clear_header()
    }
}
