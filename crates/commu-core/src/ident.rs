//! Identifiers peers hand to each other out of band.
//!
//! Two shapes exist, depending on the transport:
//! - `adjective-noun-NNN` (e.g. `swift-tiger-042`), easy to read aloud
//! - an uppercase 6-character alphanumeric code (e.g. `Q7K2ZD`), easy to type

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

const ADJECTIVES: [&str; 10] = [
    "swift", "brave", "bright", "calm", "bold", "cool", "fast", "kind", "wise", "strong",
];

const NOUNS: [&str; 10] = [
    "tiger", "eagle", "wolf", "bear", "lion", "fox", "hawk", "deer", "owl", "cat",
];

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a connection code.
pub const CONNECTION_CODE_LEN: usize = 6;

static PEER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+-[a-z]+-\d{3}$").expect("valid peer id regex"));

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{6}$").expect("valid connection code regex"));

/// Generates a memorable `adjective-noun-NNN` peer identifier.
pub fn generate_peer_id() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let number: u16 = rng.random_range(0..1000);
    format!("{adjective}-{noun}-{number:03}")
}

/// Generates an uppercase 6-character alphanumeric connection code.
pub fn generate_connection_code() -> String {
    let mut rng = rand::rng();
    (0..CONNECTION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Returns true if `s` looks like a peer identifier.
pub fn is_peer_id(s: &str) -> bool {
    PEER_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed connection code.
pub fn is_connection_code(s: &str) -> bool {
    CODE_RE.is_match(s)
}

/// Normalizes user input (surrounding whitespace, lowercase) into a
/// connection code, or `None` if it cannot be one.
pub fn normalize_connection_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    is_connection_code(&code).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_have_expected_shape() {
        for _ in 0..50 {
            let id = generate_peer_id();
            assert!(is_peer_id(&id), "bad peer id {id}");
            let parts: Vec<&str> = id.split('-').collect();
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
            assert_eq!(parts[2].len(), 3);
        }
    }

    #[test]
    fn codes_have_expected_shape() {
        for _ in 0..50 {
            let code = generate_connection_code();
            assert!(is_connection_code(&code), "bad code {code}");
        }
    }

    #[test]
    fn recognizes_examples() {
        assert!(is_peer_id("swift-tiger-042"));
        assert!(!is_peer_id("swift-tiger-42"));
        assert!(!is_peer_id("Swift-Tiger-042"));
        assert!(is_connection_code("Q7K2ZD"));
        assert!(!is_connection_code("q7k2zd"));
        assert!(!is_connection_code("Q7K2Z"));
    }

    #[test]
    fn normalize_accepts_sloppy_input() {
        assert_eq!(normalize_connection_code("  q7k2zd \n"), Some("Q7K2ZD".into()));
        assert_eq!(normalize_connection_code("q7-k2zd"), None);
        assert_eq!(normalize_connection_code(""), None);
    }
}
