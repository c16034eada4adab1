//! One-way secret hashing with Argon2id.
//!
//! The gateway stores and verifies credential secrets as Argon2id PHC
//! strings. Hashing is deliberately CPU-expensive (configurable cost, the
//! default lands around 100-150ms per hash on commodity hardware) and never
//! stores or logs the plaintext.
//!
//! # Cryptographic Standards
//! - Argon2id: RFC 9106
//! - Cost defaults: OWASP Password Storage Cheat Sheet (2024)

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{Error as PasswordHashError, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{GatewayError, Result};

/// Argon2id memory cost: 19 MiB (19456 KiB)
///
/// OWASP's 2024 interactive-login baseline. Combined with the iteration
/// default below, one hash costs roughly 100-150ms on commodity hardware.
const DEFAULT_MEMORY_KIB: u32 = 19_456;

/// Argon2id time cost: 3 iterations
const DEFAULT_ITERATIONS: u32 = 3;

/// Argon2id parallelism: 1 lane
///
/// Request handlers hash at most one secret per call; extra lanes would
/// only fight the runtime's own task parallelism.
const DEFAULT_PARALLELISM: u32 = 1;

/// Minimum accepted memory cost: 8 MiB. Below this Argon2id degrades to a
/// GPU-friendly workload.
const MIN_MEMORY_KIB: u32 = 8_192;

/// Cost parameters for one-way secret hashing.
///
/// Validated at construction time; raising the cost slows every hash and
/// verify by the same factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCost {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Time cost (iterations)
    pub iterations: u32,
    /// Parallelism (lanes)
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl HashCost {
    /// Validates that cost parameters meet minimum security thresholds.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if any parameter is below its floor.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < MIN_MEMORY_KIB {
            return Err(GatewayError::invalid_argument(format!(
                "hash memory cost must be at least {MIN_MEMORY_KIB} KiB"
            )));
        }
        if self.iterations == 0 {
            return Err(GatewayError::invalid_argument(
                "hash iterations must be at least 1",
            ));
        }
        if self.parallelism == 0 {
            return Err(GatewayError::invalid_argument(
                "hash parallelism must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Returns true when a stored value already looks like a one-way hash.
///
/// Recognizes Argon2 PHC strings produced by this gateway and the bcrypt
/// prefixes (`$2a$`, `$2b$`, `$2y$`) so legacy values imported into a table
/// are not hashed a second time.
pub fn looks_hashed(value: &str) -> bool {
    value.starts_with("$argon2")
        || value.starts_with("$2a$")
        || value.starts_with("$2b$")
        || value.starts_with("$2y$")
}

/// Argon2id hasher and verifier for credential secrets.
///
/// # Security
/// - Each hash uses a fresh random salt; equal plaintexts produce distinct
///   PHC strings.
/// - Verification reads algorithm and cost from the stored string and
///   compares in constant time.
/// - Plaintext copies made during verification are zeroed on drop.
#[derive(Debug, Clone)]
pub struct SecretHasher {
    cost: HashCost,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self {
            cost: HashCost::default(),
        }
    }
}

impl SecretHasher {
    /// Creates a hasher with the given cost.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the cost fails validation.
    pub fn new(cost: HashCost) -> Result<Self> {
        cost.validate()?;
        Ok(Self { cost })
    }

    /// The configured cost.
    pub fn cost(&self) -> HashCost {
        self.cost
    }

    /// Hashes a plaintext secret into an Argon2id PHC string.
    ///
    /// # Errors
    /// Returns an operational error if the hashing backend fails.
    pub fn hash(&self, plain: &str) -> Result<String> {
        let argon2 = self.instance()?;
        let salt = SaltString::generate(&mut OsRng);
        let phc = argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| GatewayError::operational("secret hashing failed", e))?;
        Ok(phc.to_string())
    }

    /// Verifies a plaintext secret against a stored PHC string.
    ///
    /// A mismatch is `Ok(false)`, not an error; only a malformed stored
    /// hash or a backend failure produces `Err`.
    pub fn verify(&self, plain: &str, stored: &str) -> Result<bool> {
        let plain = Zeroizing::new(plain.as_bytes().to_vec());
        let parsed = PasswordHash::new(stored)
            .map_err(|e| GatewayError::operational("stored secret hash is malformed", e))?;
        match Argon2::default().verify_password(plain.as_slice(), &parsed) {
            Ok(()) => Ok(true),
            Err(PasswordHashError::Password) => Ok(false),
            Err(e) => Err(GatewayError::operational("secret verification failed", e)),
        }
    }

    fn instance(&self) -> Result<Argon2<'static>> {
        self.cost.validate()?;
        let params = Params::new(
            self.cost.memory_kib,
            self.cost.iterations,
            self.cost.parallelism,
            None,
        )
        .map_err(|e| GatewayError::invalid_argument(format!("invalid hash cost: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low-cost hasher so the round-trip tests stay fast.
    fn test_hasher() -> SecretHasher {
        SecretHasher::new(HashCost {
            memory_kib: MIN_MEMORY_KIB,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_verify_round_trip() {
        let hasher = test_hasher();
        let hash = hasher.hash("s3cret").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("s3cret", &hash).unwrap());
        assert!(!hasher.verify("other", &hash).unwrap());
    }

    #[test]
    fn test_hash_salts_are_unique() {
        let hasher = test_hasher();
        let first = hasher.hash("same").unwrap();
        let second = hasher.hash("same").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("same", &first).unwrap());
        assert!(hasher.verify("same", &second).unwrap());
    }

    #[test]
    fn test_verify_malformed_hash_is_operational_error() {
        let hasher = test_hasher();
        let err = hasher.verify("x", "not-a-phc-string").unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_looks_hashed_prefixes() {
        assert!(looks_hashed("$argon2id$v=19$m=19456,t=3,p=1$abc$def"));
        assert!(looks_hashed("$2a$10$abcdefghijklmnopqrstuv"));
        assert!(looks_hashed("$2b$12$abcdefghijklmnopqrstuv"));
        assert!(looks_hashed("$2y$10$abcdefghijklmnopqrstuv"));
        assert!(!looks_hashed("plaintext"));
        assert!(!looks_hashed("$1$md5crypt"));
        assert!(!looks_hashed(""));
    }

    #[test]
    fn test_cost_validation() {
        assert!(HashCost::default().validate().is_ok());

        let too_small = HashCost {
            memory_kib: 1024,
            iterations: 3,
            parallelism: 1,
        };
        assert!(too_small.validate().is_err());

        let zero_iterations = HashCost {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: 0,
            parallelism: 1,
        };
        assert!(SecretHasher::new(zero_iterations).is_err());
    }
}
