use sha2::{Digest, Sha256};

/// Hex SHA-256 over length-prefixed parts, so `("ab", "c")` and `("a", "bc")` differ.
///
/// ```
/// use security::content_hash;
///
/// assert_ne!(content_hash(&["ab", "c"]), content_hash(&["a", "bc"]));
/// assert_eq!(content_hash(&["x"]).len(), 64);
/// ```
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(content_hash(&["B1", "P1", "hi"]), content_hash(&["B1", "P1", "hi"]));
        assert_ne!(content_hash(&["B1", "P1", "hi"]), content_hash(&["B1", "P2", "hi"]));
    }
}
