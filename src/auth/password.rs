use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{rngs::OsRng, seq::SliceRandom, Rng};

pub const MIN_PASSWORD_LENGTH: usize = 8;
const GENERATED_PASSWORD_LENGTH: usize = 12;
const GENERATED_PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash).map_err(|err| anyhow!(err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}

/// Returns every rule the password breaks; an empty list means it is acceptable.
pub fn password_strength_errors(password: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push("password must be at least 8 characters");
    }
    if !password.chars().any(|ch| ch.is_ascii_uppercase()) {
        errors.push("password must contain an uppercase letter");
    }
    if !password.chars().any(|ch| ch.is_ascii_lowercase()) {
        errors.push("password must contain a lowercase letter");
    }
    if !password.chars().any(|ch| ch.is_ascii_digit()) {
        errors.push("password must contain a digit");
    }
    errors
}

pub fn generate_password() -> String {
    let mut rng = OsRng;
    let mut chars: Vec<u8> = vec![
        pick(&mut rng, b"ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
        pick(&mut rng, b"abcdefghijklmnopqrstuvwxyz"),
        pick(&mut rng, b"0123456789"),
    ];
    while chars.len() < GENERATED_PASSWORD_LENGTH {
        chars.push(pick(&mut rng, GENERATED_PASSWORD_CHARSET));
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

fn pick<R: Rng>(rng: &mut R, charset: &[u8]) -> u8 {
    charset[rng.gen_range(0..charset.len())]
}
