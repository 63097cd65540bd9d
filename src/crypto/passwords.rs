//! Password hashing and verification built around Argon2id.
//!
//! Digests are PHC strings (`$argon2id$v=19$m=65536,t=1,p=4$<salt>$<key>`), so
//! each stored record carries the parameters it was produced with. Raising the
//! configured costs later never invalidates digests already in the store.

use argon2::password_hash::{Output, ParamsString, PasswordHash, Salt, SaltString};
use argon2::{Algorithm, Argon2, Block, Params, Version};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use super::primitives::constant_time_eq;

/// Refuse memory costs above 4 GiB rather than letting the allocator abort.
const MAX_MEMORY_COST_KIB: u32 = 4 * 1024 * 1024;
/// Stored digests asking for more passes than this are treated as corrupt.
const MAX_TIME_COST: u32 = 64;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("stored digest is malformed: {0}")]
    MalformedDigest(String),
}

/// Argon2 cost parameters applied when producing new digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HashParams {
    /// Number of passes over memory.
    pub time_cost: u32,
    /// Memory in KiB.
    pub memory_cost: u32,
    /// Lanes.
    pub parallelism: u32,
    /// Derived key length in bytes.
    pub key_length: usize,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 64 * 1024,
            parallelism: 4,
            key_length: 32,
        }
    }
}

impl HashParams {
    /// Checks the parameters against Argon2's accepted ranges.
    pub fn validate(&self) -> Result<(), PasswordError> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        if self.memory_cost > MAX_MEMORY_COST_KIB {
            return Err(PasswordError::Hashing(format!(
                "memory cost {} KiB exceeds the {} KiB ceiling",
                self.memory_cost, MAX_MEMORY_COST_KIB
            )));
        }
        if self.time_cost > MAX_TIME_COST {
            return Err(PasswordError::Hashing(format!(
                "time cost {} exceeds the ceiling of {}",
                self.time_cost, MAX_TIME_COST
            )));
        }
        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.key_length),
        )
        .map_err(|e| PasswordError::Hashing(format!("{e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hashes a cleartext password with a fresh random salt and returns the PHC
/// string. The cleartext is never retained.
pub fn hash_password(cleartext: &str, params: &HashParams) -> Result<String, PasswordError> {
    let argon2 = params.argon2()?;
    let salt = SaltString::generate(&mut OsRng);
    let mut salt_buf = [0u8; Salt::MAX_LENGTH];
    let salt_bytes = salt
        .decode_b64(&mut salt_buf)
        .map_err(|e| PasswordError::Hashing(format!("{e}")))?;

    let mut key = vec![0u8; params.key_length];
    derive_key(&argon2, cleartext.as_bytes(), salt_bytes, &mut key)
        .map_err(|e| PasswordError::Hashing(format!("{e}")))?;
    let output = Output::new(&key);
    key.zeroize();

    let digest = PasswordHash {
        algorithm: Algorithm::Argon2id.ident(),
        version: Some(Version::V0x13.into()),
        params: ParamsString::try_from(argon2.params())
            .map_err(|e| PasswordError::Hashing(format!("{e}")))?,
        salt: Some(salt.as_salt()),
        hash: Some(output.map_err(|e| PasswordError::Hashing(format!("{e}")))?),
    };
    Ok(digest.to_string())
}

/// Re-derives a key from `cleartext` using the parameters and salt stored in
/// `digest` and compares it with the stored key in constant time.
///
/// A mismatch is `Ok(false)`. `Err(MalformedDigest)` means the stored record
/// could not be parsed or re-derived, and callers must treat it as a failed
/// check. `Err(Hashing)` only reports that the work memory could not be
/// reserved.
pub fn verify_password(cleartext: &str, digest: &str) -> Result<bool, PasswordError> {
    let record = DigestRecord::parse(digest)?;
    let argon2 = Argon2::new(record.algorithm, record.version, record.params.clone());

    let mut derived = vec![0u8; record.key.len()];
    derive_key(&argon2, cleartext.as_bytes(), &record.salt, &mut derived).map_err(
        |e| match e {
            DeriveError::OutOfMemory(_) => PasswordError::Hashing(format!("{e}")),
            DeriveError::Argon2(_) => malformed(e),
        },
    )?;
    let matches = constant_time_eq(&derived, &record.key);
    derived.zeroize();
    Ok(matches)
}

#[derive(Debug, Error)]
enum DeriveError {
    #[error("cannot reserve {0} KiB of argon2 work memory")]
    OutOfMemory(usize),
    #[error("{0}")]
    Argon2(argon2::Error),
}

/// Runs Argon2 over a block buffer reserved up front, so an oversized memory
/// cost comes back as an error instead of an allocator abort.
fn derive_key(
    argon2: &Argon2<'_>,
    cleartext: &[u8],
    salt: &[u8],
    out: &mut [u8],
) -> Result<(), DeriveError> {
    let block_count = argon2.params().block_count();
    let mut blocks: Vec<Block> = Vec::new();
    blocks
        .try_reserve_exact(block_count)
        .map_err(|_| DeriveError::OutOfMemory(block_count))?;
    blocks.resize(block_count, Block::default());
    let result = argon2
        .hash_password_into_with_memory(cleartext, salt, out, &mut blocks[..])
        .map_err(DeriveError::Argon2);
    blocks.zeroize();
    result
}

/// Reports whether `digest` was produced with parameters other than `params`,
/// meaning it should be replaced the next time the cleartext is available.
pub fn needs_rehash(digest: &str, params: &HashParams) -> Result<bool, PasswordError> {
    let record = DigestRecord::parse(digest)?;
    Ok(record.algorithm != Algorithm::Argon2id
        || record.version != Version::V0x13
        || record.params.t_cost() != params.time_cost
        || record.params.m_cost() != params.memory_cost
        || record.params.p_cost() != params.parallelism
        || record.key.len() != params.key_length)
}

/// A parsed digest: everything needed to recompute the derived key.
struct DigestRecord {
    algorithm: Algorithm,
    version: Version,
    params: Params,
    salt: Vec<u8>,
    key: Vec<u8>,
}

impl DigestRecord {
    fn parse(digest: &str) -> Result<Self, PasswordError> {
        let hash = PasswordHash::new(digest).map_err(malformed)?;

        let algorithm = match hash.algorithm.as_str() {
            "argon2id" => Algorithm::Argon2id,
            "argon2i" => Algorithm::Argon2i,
            "argon2d" => Algorithm::Argon2d,
            other => {
                return Err(PasswordError::MalformedDigest(format!(
                    "unsupported algorithm {other}"
                )))
            }
        };
        let version = match hash.version {
            Some(v) => Version::try_from(v).map_err(malformed)?,
            None => Version::V0x13,
        };
        let params = Params::try_from(&hash).map_err(malformed)?;
        if params.m_cost() > MAX_MEMORY_COST_KIB || params.t_cost() > MAX_TIME_COST {
            return Err(PasswordError::MalformedDigest(format!(
                "costs m={} t={} exceed the accepted ceiling",
                params.m_cost(),
                params.t_cost()
            )));
        }

        let salt = hash
            .salt
            .ok_or_else(|| PasswordError::MalformedDigest("missing salt".to_string()))?;
        let mut salt_buf = [0u8; Salt::MAX_LENGTH];
        let salt = salt.decode_b64(&mut salt_buf).map_err(malformed)?.to_vec();

        let key = hash
            .hash
            .ok_or_else(|| PasswordError::MalformedDigest("missing derived key".to_string()))?
            .as_bytes()
            .to_vec();

        if salt.len() < argon2::MIN_SALT_LEN {
            return Err(PasswordError::MalformedDigest(format!(
                "salt of {} bytes is shorter than {}",
                salt.len(),
                argon2::MIN_SALT_LEN
            )));
        }
        if !(Params::MIN_OUTPUT_LEN..=Params::MAX_OUTPUT_LEN).contains(&key.len()) {
            return Err(PasswordError::MalformedDigest(format!(
                "derived key of {} bytes is out of range",
                key.len()
            )));
        }

        Ok(Self {
            algorithm,
            version,
            params,
            salt,
            key,
        })
    }
}

impl Drop for DigestRecord {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn malformed(err: impl std::fmt::Display) -> PasswordError {
    PasswordError::MalformedDigest(format!("{err}"))
}

/// Hashes and verifies passwords with one fixed set of parameters.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    params: HashParams,
}

impl CredentialVerifier {
    pub fn new(params: HashParams) -> Result<Self, PasswordError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &HashParams {
        &self.params
    }

    pub fn hash(&self, cleartext: &str) -> Result<String, PasswordError> {
        hash_password(cleartext, &self.params)
    }

    pub fn verify(&self, cleartext: &str, digest: &str) -> Result<bool, PasswordError> {
        verify_password(cleartext, digest)
    }

    pub fn needs_rehash(&self, digest: &str) -> Result<bool, PasswordError> {
        needs_rehash(digest, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        hash_password, needs_rehash, verify_password, CredentialVerifier, HashParams,
        PasswordError,
    };

    fn light_params() -> HashParams {
        HashParams {
            time_cost: 1,
            memory_cost: 1024,
            parallelism: 1,
            key_length: 32,
        }
    }

    #[test]
    fn hashes_and_verifies_with_default_params() {
        let verifier = CredentialVerifier::new(HashParams::default()).expect("valid params");
        let digest = verifier.hash("correct-horse").expect("hashing should succeed");
        assert!(digest.starts_with("$argon2id$v=19$m=65536,t=1,p=4$"));
        assert!(verifier.verify("correct-horse", &digest).unwrap());
        assert!(!verifier.verify("wrong-password", &digest).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_digests() {
        let params = light_params();
        let first = hash_password("weigh-in-password", &params).unwrap();
        let second = hash_password("weigh-in-password", &params).unwrap();
        assert_ne!(first, second);
        assert!(verify_password("weigh-in-password", &first).unwrap());
        assert!(verify_password("weigh-in-password", &second).unwrap());
    }

    #[test]
    fn rejects_zero_time_cost() {
        let params = HashParams {
            time_cost: 0,
            ..light_params()
        };
        let err = hash_password("pw", &params).unwrap_err();
        assert!(matches!(err, PasswordError::Hashing(_)));
        assert!(CredentialVerifier::new(params).is_err());
    }

    #[test]
    fn rejects_excessive_memory_cost() {
        let params = HashParams {
            memory_cost: u32::MAX,
            ..light_params()
        };
        assert!(matches!(params.validate(), Err(PasswordError::Hashing(_))));
    }

    #[test]
    fn corrupt_digest_is_malformed_not_false() {
        for corrupt in [
            "",
            "not-a-digest",
            "$argon2id$v=19$m=1024,t=1,p=1",
            "$bcrypt$v=19$m=1024,t=1,p=1$c2FsdHNhbHRzYWx0$aGFzaA",
            // Parses as PHC, but a four byte salt is below Argon2's minimum.
            "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaGhhc2hoYXNo",
        ] {
            let err = verify_password("pw", corrupt).unwrap_err();
            assert!(
                matches!(err, PasswordError::MalformedDigest(_)),
                "{corrupt:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn oversized_costs_in_digest_are_rejected_before_deriving() {
        let huge_memory = concat!(
            "$argon2id$v=19$m=4294967295,t=1,p=1",
            "$c2FsdHNhbHRzYWx0c2FsdA$aGFzaGhhc2hoYXNo"
        );
        let huge_time = concat!(
            "$argon2id$v=19$m=1024,t=4294967295,p=1",
            "$c2FsdHNhbHRzYWx0c2FsdA$aGFzaGhhc2hoYXNo"
        );
        for digest in [huge_memory, huge_time] {
            let err = verify_password("pw", digest).unwrap_err();
            assert!(
                matches!(err, PasswordError::MalformedDigest(_)),
                "{digest:?} gave {err:?}"
            );
            assert!(needs_rehash(digest, &light_params()).is_err());
        }
    }

    #[test]
    fn rejects_excessive_time_cost() {
        let params = HashParams {
            time_cost: 1000,
            ..light_params()
        };
        assert!(matches!(params.validate(), Err(PasswordError::Hashing(_))));
    }

    #[test]
    fn verifies_digests_made_with_older_params() {
        let old = light_params();
        let digest = hash_password("reparam", &old).unwrap();

        let newer = HashParams {
            time_cost: 2,
            memory_cost: 2048,
            ..old
        };
        let verifier = CredentialVerifier::new(newer).unwrap();
        assert!(verifier.verify("reparam", &digest).unwrap());
        assert!(verifier.needs_rehash(&digest).unwrap());
        assert!(!needs_rehash(&digest, &old).unwrap());
    }

    #[test]
    fn honours_custom_key_length() {
        let params = HashParams {
            key_length: 64,
            ..light_params()
        };
        let digest = hash_password("longer-key", &params).unwrap();
        assert!(verify_password("longer-key", &digest).unwrap());
        assert!(!verify_password("longer-kez", &digest).unwrap());
    }

    #[test]
    fn error_messages_do_not_echo_cleartext() {
        let params = HashParams {
            parallelism: 0,
            ..light_params()
        };
        let err = hash_password("super-secret-cleartext", &params).unwrap_err();
        assert!(!format!("{err}").contains("super-secret-cleartext"));
    }
}
