// src/common/id_generator.rs
//! Identifier generation
//!
//! Account ids are prefixed Crockford Base32 strings (e.g. `U_K7NP3XY2M4QA`);
//! correlation ids and token ids are UUID v4 so they can be joined against
//! external log pipelines.

use rand::Rng;
use uuid::Uuid;

/// Crockford Base32 alphabet (excludes I, L, O, U to avoid confusion)
const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Random characters in an account id (~60 bits)
const USER_ID_LENGTH: usize = 12;

const USER_ID_PREFIX: &str = "U_";

/// Generate a User ID (U_ + 12 Crockford chars)
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..USER_ID_LENGTH)
        .map(|_| CROCKFORD_ALPHABET[rng.gen_range(0..CROCKFORD_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", USER_ID_PREFIX, suffix)
}

/// Correlation id threading one authentication flow through the audit log
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Unique token id (`jti` claim)
pub fn generate_token_id() -> String {
    Uuid::new_v4().to_string()
}
