//! Cryptography for credentials and sessions. Password hashing and session
//! sealing never depend on each other; both draw on the shared primitives.

pub mod passwords;
pub mod primitives;
pub mod session;
