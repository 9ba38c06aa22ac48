//! Identifier and digest helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
///
/// Used for execution ids so that executions sort by start time.
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Returns the lowercase hex SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Strips everything but ASCII alphanumerics from `raw`.
///
/// Logical ids in rendered descriptions are alphanumeric only.
#[must_use]
pub fn logical_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_v7_is_time_ordered() {
        let first = generate_uuid_v7();
        let second = generate_uuid_v7();

        assert_eq!(first.get_version_num(), 7);
        assert!(first < second);
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_logical_id_strips_separators() {
        assert_eq!(logical_id("Dev/App-Stack_1"), "DevAppStack1");
        assert_eq!(logical_id("nginx"), "nginx");
    }
}
