use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

/// Hash a plaintext password with a fresh random salt.
pub fn hash(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// Check a plaintext password against a stored hash. `Err` means the stored
/// hash itself is unreadable, not that the password was wrong.
pub fn verify(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("stored hash is malformed: {e}"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_not_the_plaintext() {
        let hashed = hash("swordfish-42").expect("hashing should succeed");
        assert_ne!(hashed, "swordfish-42");
        assert!(hashed.starts_with("$argon2"));
        // A second hash of the same input gets a different salt.
        assert_ne!(hashed, hash("swordfish-42").unwrap());
    }

    #[test]
    fn verify_accepts_the_original_password() {
        let hashed = hash("tr0ub4dor&3").expect("hashing should succeed");
        assert!(verify("tr0ub4dor&3", &hashed).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_a_different_password() {
        let hashed = hash("tr0ub4dor&3").expect("hashing should succeed");
        assert!(!verify("tr0ub4dor&4", &hashed).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_garbage_hash() {
        assert!(verify("anything", "definitely-not-a-phc-string").is_err());
    }
}
