// Password hashing - plaintext in, one-way encoded hash out
//
// Encoded form: pbkdf2_sha256$<iterations>$<salt b64>$<key b64>

use crate::error::{ImportError, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

pub const ALGORITHM: &str = "pbkdf2_sha256";

/// OWASP 2023 recommendation for PBKDF2-HMAC-SHA256
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Prefix of stored values that can never match a password
pub const UNUSABLE_PREFIX: char = '!';

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

// ============================================================================
// PLAINTEXT STAGING
// ============================================================================

/// Plaintext password taken from a row.
///
/// Only lives until the commit phase hashes it; the buffer is overwritten
/// with volatile writes on drop and never printed.
pub struct PlaintextPassword(Vec<u8>);

impl PlaintextPassword {
    pub fn new(plaintext: &str) -> Self {
        PlaintextPassword(plaintext.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for PlaintextPassword {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}

/// Zero a buffer in a way the optimizer may not elide
fn wipe(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned, exclusive reference
        unsafe { std::ptr::write_volatile(byte, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

impl fmt::Debug for PlaintextPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextPassword(<redacted>)")
    }
}

// ============================================================================
// HASHER
// ============================================================================

/// One-way password hashing primitive used by the commit phase
pub trait PasswordHasher: Send + Sync {
    /// Derive an encoded hash from plaintext
    fn hash(&self, plaintext: &[u8]) -> Result<String>;

    /// Check plaintext against a stored encoded hash
    fn verify(&self, plaintext: &[u8], encoded: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new() -> Self {
        Pbkdf2Hasher {
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn with_iterations(iterations: u32) -> Self {
        Pbkdf2Hasher {
            iterations: iterations.max(1),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn derive(plaintext: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(plaintext, salt, iterations, &mut key);
        key
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Pbkdf2Hasher::new()
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn hash(&self, plaintext: &[u8]) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| ImportError::PasswordHash(e.to_string()))?;

        let key = Self::derive(plaintext, &salt, self.iterations);
        Ok(format!(
            "{}${}${}${}",
            ALGORITHM,
            self.iterations,
            B64.encode(salt),
            B64.encode(key)
        ))
    }

    fn verify(&self, plaintext: &[u8], encoded: &str) -> bool {
        if !is_usable(encoded) {
            return false;
        }

        let parts: Vec<&str> = encoded.split('$').collect();
        let [algorithm, iterations, salt, expected] = parts.as_slice() else {
            return false;
        };
        if *algorithm != ALGORITHM {
            return false;
        }

        // Stored iteration count wins so older hashes keep verifying
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        if iterations == 0 {
            return false;
        }
        let (Ok(salt), Ok(expected)) = (B64.decode(salt), B64.decode(expected)) else {
            return false;
        };
        if expected.len() != KEY_LEN {
            return false;
        }

        let key = Self::derive(plaintext, &salt, iterations);
        key.as_slice().ct_eq(expected.as_slice()).into()
    }
}

/// Marker stored for accounts created without a password
pub fn unusable_password() -> String {
    format!("{}{}", UNUSABLE_PREFIX, uuid::Uuid::new_v4().simple())
}

pub fn is_usable(encoded: &str) -> bool {
    !encoded.is_empty() && !encoded.starts_with(UNUSABLE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Pbkdf2Hasher {
        Pbkdf2Hasher::with_iterations(1_000)
    }

    #[test]
    fn test_hash_then_verify() {
        let hasher = fast_hasher();
        let encoded = hasher.hash(b"secretpass").unwrap();

        assert!(encoded.starts_with("pbkdf2_sha256$1000$"));
        assert!(!encoded.contains("secretpass"));
        assert!(hasher.verify(b"secretpass", &encoded));
        assert!(!hasher.verify(b"secretpasS", &encoded));
    }

    #[test]
    fn test_salt_makes_hashes_distinct() {
        let hasher = fast_hasher();
        let a = hasher.hash(b"same").unwrap();
        let b = hasher.hash(b"same").unwrap();

        assert_ne!(a, b);
        assert!(hasher.verify(b"same", &a));
        assert!(hasher.verify(b"same", &b));
    }

    #[test]
    fn test_verify_uses_stored_iterations() {
        let old = Pbkdf2Hasher::with_iterations(500).hash(b"pw").unwrap();
        assert!(fast_hasher().verify(b"pw", &old));
    }

    #[test]
    fn test_unusable_and_malformed_never_verify() {
        let hasher = fast_hasher();
        let marker = unusable_password();

        assert!(marker.starts_with('!'));
        assert!(!is_usable(&marker));
        assert!(!hasher.verify(b"", &marker));
        assert!(!hasher.verify(b"pw", ""));
        assert!(!hasher.verify(b"pw", "md5$abc"));
        assert!(!hasher.verify(b"pw", "pbkdf2_sha256$x$AAAA$AAAA"));
        assert!(!hasher.verify(b"pw", "pbkdf2_sha256$0$AAAA$AAAA"));
        assert!(!hasher.verify(b"pw", "pbkdf2_sha256$10$***$AAAA"));
    }

    #[test]
    fn test_wipe_zeroes_buffer() {
        let mut buf = b"hunter2".to_vec();
        wipe(&mut buf);
        assert_eq!(buf, vec![0u8; 7]);
    }

    #[test]
    fn test_plaintext_debug_is_redacted() {
        let plaintext = PlaintextPassword::new("hunter2");
        assert_eq!(plaintext.as_bytes(), b"hunter2");
        assert!(!format!("{:?}", plaintext).contains("hunter2"));
    }
}
