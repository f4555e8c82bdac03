//! Document id generation.

use crate::DocumentId;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a new document id.
///
/// SHA-256 over three random UUIDs and the current millisecond timestamp,
/// rendered as 64 lowercase hex characters.
pub fn generate_id(now_millis: i64) -> DocumentId {
    let seed = format!(
        "{}-{}-{}-{}",
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        now_millis
    );

    format!("{:x}", Sha256::digest(seed.as_bytes()))
}

/// Check that a string has the shape of a generated id.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_hex_sha256() {
        let id = generate_id(1_700_000_000_000);
        assert_eq!(id.len(), 64);
        assert!(is_well_formed(&id));
    }

    #[test]
    fn ids_do_not_repeat() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_id(0)).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn well_formed_rejects_other_shapes() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("doc-1"));
        assert!(!is_well_formed(&"G".repeat(64)));
    }
}
