// ABOUTME: Handle and id generation for containers
// ABOUTME: Fresh handles are random 32-hex strings; ids derive deterministically from handles

use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Prefix for container ids, keeping them valid local account names.
const ID_PREFIX: &str = "c_";

/// Number of leading hash nibbles carried into the id (60 bits).
const ID_HASH_NIBBLES: usize = 15;

/// Produces a fresh random 32-hex-character container handle.
pub fn generate_handle() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Derives the container id for a handle.
///
/// The id is `c_` followed by the first 15 nibbles of the SHA-1 of the
/// handle's UTF-8 bytes, uppercased. The mapping is deterministic and
/// stable across restarts.
pub fn generate_id(handle: &str) -> String {
    let digest = Sha1::digest(handle.as_bytes());
    let hash = hex::encode_upper(digest);
    format!("{}{}", ID_PREFIX, &hash[..ID_HASH_NIBBLES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_handles_are_32_hex_chars() {
        let handle = generate_handle();
        assert_eq!(handle.len(), 32);
        assert!(handle.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_handles_are_unique() {
        assert_ne!(generate_handle(), generate_handle());
    }

    #[test]
    fn id_is_deterministic_with_prefix_and_length() {
        let first = generate_id("handle");
        let second = generate_id("handle");
        assert_eq!(first, second);
        assert!(first.starts_with("c_"));
        assert_eq!(first.len(), 17);
    }

    #[test]
    fn id_matches_sha1_of_handle() {
        // First 15 nibbles of SHA-1("handle"), uppercased.
        assert_eq!(generate_id("handle"), "c_A2DD7EC666AACD5");
    }

    #[test]
    fn distinct_handles_map_to_distinct_ids() {
        assert_ne!(generate_id("first"), generate_id("second"));
    }

    #[test]
    fn id_suffix_is_uppercase_hex() {
        let id = generate_id(&generate_handle());
        assert!(id["c_".len()..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
