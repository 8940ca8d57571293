use ring::rand::{SecureRandom, SystemRandom};
use ring::{hmac, pbkdf2};
use std::num::NonZeroU32;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const SCHEME: &str = "pbkdf2-sha256";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Failed to generate salt")]
    RandomFailed,

    #[error("Invalid password hash format")]
    InvalidFormat,

    #[error("Password must be at least {0} characters")]
    TooShort(usize),
}

pub const MIN_PASSWORD_LEN: usize = 10;

/// Hashes a password with PBKDF2-HMAC-SHA256 and a random salt.
///
/// Format: `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort(MIN_PASSWORD_LEN));
    }

    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| PasswordError::RandomFailed)?;

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).ok_or(PasswordError::InvalidFormat)?;
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        PBKDF2_ITERATIONS,
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Verifies a password against a stored hash in constant time.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PasswordError::InvalidFormat);
    };

    if scheme != SCHEME {
        return Err(PasswordError::InvalidFormat);
    }

    let iterations = iterations
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(PasswordError::InvalidFormat)?;
    let salt = hex::decode(salt).map_err(|_| PasswordError::InvalidFormat)?;
    let hash = hex::decode(hash).map_err(|_| PasswordError::InvalidFormat)?;

    let matches = pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt,
        password.as_bytes(),
        &hash,
    )
    .is_ok();

    Ok(matches)
}

/// Compares a presented API key with the configured one without leaking
/// timing information: both sides are tagged with a per-process HMAC key and
/// the tags are checked with `hmac::verify`.
pub fn keys_match(presented: &str, expected: &str) -> bool {
    let rng = SystemRandom::new();
    let Ok(key) = hmac::Key::generate(hmac::HMAC_SHA256, &rng) else {
        return false;
    };

    let expected_tag = hmac::sign(&key, expected.as_bytes());
    hmac::verify(&key, presented.as_bytes(), expected_tag.as_ref()).is_ok()
}
