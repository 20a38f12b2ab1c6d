//! Cache-busting token generator.
//!
//! Tokens are used as the `t` query value of polling requests. They are not
//! secrets and are only meant to be unlikely to repeat within one process run.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Fixed namespace tag at the start of every token.
pub const TOKEN_PREFIX: &str = "PLM";

/// Number of random base-36 characters after the prefix.
const RANDOM_LEN: usize = 5;

/// Leading characters of the base-36 timestamp that are dropped. They change
/// only every few years and add nothing to disambiguation.
const TIMESTAMP_SKIP: usize = 5;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a token: prefix, random base-36 component, compacted timestamp.
pub fn generate_cache_buster() -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..RANDOM_LEN)
        .map(|_| base36_digit(rng.gen_range(0..36)))
        .collect();

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let timestamp = to_base36(millis);
    let tail = timestamp.get(TIMESTAMP_SKIP..).unwrap_or_default();

    format!("{TOKEN_PREFIX}{random}{tail}")
}

/// Encode an integer in lowercase base 36.
pub fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let idx = usize::try_from(value % 36).unwrap_or_default();
        digits.push(base36_digit(idx));
        value /= 36;
    }
    digits.into_iter().rev().collect()
}

fn base36_digit(idx: usize) -> char {
    char::from(BASE36.get(idx).copied().unwrap_or(b'0'))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn token_has_prefix_and_base36_body() {
        let token = generate_cache_buster();
        assert!(token.starts_with(TOKEN_PREFIX));
        let body = &token[TOKEN_PREFIX.len()..];
        assert!(body.len() >= RANDOM_LEN);
        assert!(body
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn tokens_rarely_repeat() {
        let tokens: std::collections::HashSet<String> =
            (0..200).map(|_| generate_cache_buster()).collect();
        assert!(tokens.len() > 190);
    }
}
