//! Credential provisioning and checking on top of a [`CredentialStore`].

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::basic_auth::{challenge, parse_authorization, DEFAULT_REALM};
use crate::crypto::passwords::{CredentialVerifier, PasswordError};
use crate::store::{CredentialStore, StoreError};

const DUMMY_PASSWORD: &str = "hackweight-timing-equaliser";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("password must not be empty")]
    EmptyPassword,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of gating a request on its `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasicAuthOutcome {
    /// The request may proceed as this user.
    Granted(String),
    /// Respond 401 with this `WWW-Authenticate` value.
    Challenge(String),
}

pub struct Authenticator<S> {
    store: S,
    verifier: CredentialVerifier,
    realm: String,
    dummy_digest: Option<String>,
}

impl<S: CredentialStore> Authenticator<S> {
    /// Hashes a throwaway password once up front, so construction costs one
    /// Argon2 run and every unknown-user check afterwards costs one verify.
    pub fn new(store: S, verifier: CredentialVerifier) -> Self {
        let dummy_digest = match verifier.hash(DUMMY_PASSWORD) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(error = %err, "could not prepare the unknown-user digest");
                None
            }
        };
        Self {
            store,
            verifier,
            realm: DEFAULT_REALM.to_string(),
            dummy_digest,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the user or replaces their digest.
    pub fn provision(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        let digest = self.verifier.hash(password)?;
        let affected = self.store.upsert_digest(username, &digest)?;
        info!(username, affected, "credential provisioned");
        Ok(())
    }

    /// Checks a username/password pair against the store.
    ///
    /// Unknown users and corrupt stored digests both yield `Ok(false)`.
    /// Digests made with outdated parameters are re-hashed on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let digest = match self.store.lookup_digest(username) {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                self.equalise_timing(password);
                return Ok(false);
            }
            Err(err) => {
                warn!(error = %err, "credential lookup failed");
                return Err(err.into());
            }
        };

        match self.verifier.verify(password, &digest) {
            Ok(true) => {
                self.refresh_if_stale(username, password, &digest);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(PasswordError::MalformedDigest(reason)) => {
                debug!(username, %reason, "stored digest is malformed; denying");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Gates a request on its optional `Authorization` header value.
    pub fn authorize_basic(&self, header: Option<&str>) -> Result<BasicAuthOutcome, AuthError> {
        let Some(creds) = header.and_then(parse_authorization) else {
            return Ok(BasicAuthOutcome::Challenge(challenge(&self.realm)));
        };
        if self.authenticate(&creds.username, &creds.password)? {
            Ok(BasicAuthOutcome::Granted(creds.username.clone()))
        } else {
            Ok(BasicAuthOutcome::Challenge(challenge(&self.realm)))
        }
    }

    fn equalise_timing(&self, password: &str) {
        if let Some(digest) = &self.dummy_digest {
            let _ = self.verifier.verify(password, digest);
        }
    }

    fn refresh_if_stale(&self, username: &str, password: &str, digest: &str) {
        if !matches!(self.verifier.needs_rehash(digest), Ok(true)) {
            return;
        }
        match self
            .verifier
            .hash(password)
            .map_err(AuthError::from)
            .and_then(|fresh| Ok(self.store.upsert_digest(username, &fresh)?))
        {
            Ok(_) => info!(username, "credential re-hashed with current parameters"),
            Err(err) => warn!(username, error = %err, "credential re-hash failed"),
        }
    }
}
