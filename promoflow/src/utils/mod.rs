//! Utility functions for identifiers, digests and timestamps.

mod ids;
pub mod timestamps;

pub use ids::{generate_uuid, generate_uuid_v7, logical_id, sha256_hex};
pub use timestamps::{iso_timestamp, now_utc, parse_timestamp, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
