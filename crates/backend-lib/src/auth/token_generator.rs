// ============================
// crates/backend-lib/src/auth/token_generator.rs
// ============================
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
/** Salt and token identifier generation
Salts come straight from the operating system's entropy source; there is
no fallback generator, so an unavailable source is an error. */
use rand::{rngs::OsRng, TryRngCore};
use thiserror::Error;
use uuid::Uuid;

/// Default salt length in characters
pub const DEFAULT_SALT_LENGTH: usize = 32;

/// The OS randomness source could not be read
#[derive(Error, Debug)]
#[error("entropy source unavailable: {0}")]
pub struct EntropyError(pub String);

/** Generate a salt of exactly `length` URL-safe base64 characters
# Arguments
* `length` - Number of characters in the salt
# Returns
The salt, or an error if the OS entropy source failed */
pub fn generate_salt(length: usize) -> Result<String, EntropyError> {
    // 3 random bytes encode to 4 characters
    let mut buffer = vec![0u8; length.div_ceil(4) * 3];
    OsRng
        .try_fill_bytes(&mut buffer)
        .map_err(|e| EntropyError(e.to_string()))?;

    let mut salt = URL_SAFE_NO_PAD.encode(&buffer);
    salt.truncate(length);
    Ok(salt)
}

/// Random identifier embedded as a token's `jti`
pub fn generate_token_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_salt_has_exact_length() {
        for length in [0, 1, 7, 16, 31, 32, 33, 64] {
            let salt = generate_salt(length).unwrap();
            assert_eq!(salt.len(), length, "length {length}");
        }
    }

    #[test]
    fn test_salt_alphabet_is_printable() {
        let salt = generate_salt(128).unwrap();
        assert!(salt
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_salts_differ() {
        let salt1 = generate_salt(DEFAULT_SALT_LENGTH).unwrap();
        let salt2 = generate_salt(DEFAULT_SALT_LENGTH).unwrap();
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_token_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_token_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }
}
