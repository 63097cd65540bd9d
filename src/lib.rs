//! Credential verification and sealed session cookies for the Hack Weight
//! tracker. Password digests are Argon2id PHC strings; sessions are
//! AES-256-GCM sealed, timestamped tokens carried in an HTTP cookie. Both
//! halves are stateless and safe to share across request threads.

pub mod auth;
pub mod basic_auth;
pub mod config;
pub mod cookie;
pub mod crypto;
pub mod logging;
pub mod store;
