//! Content hashing for memory deduplication.

use sha2::{Digest, Sha256};

/// Hash used to deduplicate memory items.
///
/// Normalization: trim, collapse internal whitespace runs to a single space,
/// lowercase. Two texts differing only in case or whitespace hash the same.
pub fn content_hash(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let normalized = collapsed.to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_identical_input() {
        assert_eq!(content_hash("use postgres"), content_hash("use postgres"));
    }

    #[test]
    fn invariant_under_surrounding_whitespace() {
        assert_eq!(
            content_hash("  Use Postgres for the user service.  "),
            content_hash("Use Postgres for the user service.")
        );
    }

    #[test]
    fn invariant_under_internal_whitespace_runs() {
        assert_eq!(
            content_hash("Use   Postgres\t\tfor the\nuser service."),
            content_hash("Use Postgres for the user service.")
        );
    }

    #[test]
    fn invariant_under_ascii_case() {
        assert_eq!(
            content_hash("USE POSTGRES for the User Service."),
            content_hash("use postgres for the user service.")
        );
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(content_hash("use postgres"), content_hash("use mysql"));
    }

    #[test]
    fn hex_sha256_shape() {
        let h = content_hash("anything");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
