use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Prefix carried by every issued agent secret. Lets operators spot a
/// leaked credential in logs or scanners without storing the secret.
pub const SECRET_PREFIX: &str = "xat_";

const HASH_DOMAIN: &str = "xpanel-agent-token-v1";

/// Generate a fresh agent secret: prefix plus 256 bits of hex.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Deterministic peppered digest of a secret.
///
/// The digest doubles as the lookup key for authentication, so it must
/// be salt-free; the pepper keeps an offline database dump alone from
/// being enough to forge secrets.
pub fn secret_hash(secret: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN.as_bytes());
    hasher.update(b":");
    hasher.update(pepper.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of arbitrary bytes. Shared with bundle checksums.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Constant-time equality for secret digests.
pub fn hashes_match(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len() && expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_secret_is_prefixed_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert!(a.starts_with(SECRET_PREFIX));
        assert_eq!(a.len(), SECRET_PREFIX.len() + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn secret_hash_is_deterministic_and_peppered() {
        let secret = "xat_0011";
        assert_eq!(secret_hash(secret, "p1"), secret_hash(secret, "p1"));
        assert_ne!(secret_hash(secret, "p1"), secret_hash(secret, "p2"));
        assert_ne!(secret_hash(secret, "p1"), secret_hash("xat_0012", "p1"));
    }

    #[test]
    fn hashes_match_requires_equal_length() {
        let digest = secret_hash("xat_0011", "pepper");
        assert!(hashes_match(&digest, &digest));
        assert!(!hashes_match(&digest, &digest[..32]));
        assert!(!hashes_match(&digest, &sha256_hex(b"other")));
    }
}
