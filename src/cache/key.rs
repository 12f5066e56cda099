//! Content-addressed cache key generation.

use crate::stages::StageKind;
use sha2::{Digest, Sha256};

/// Canonical form of a stage input for keying purposes.
///
/// Matches what the consumers feed the stage operation: surrounding
/// whitespace carries no meaning, so it must not split the key space.
fn canonicalize(input: &str) -> &str {
    input.trim()
}

/// Deterministic cache key for a stage output.
///
/// Pure function of `{stage kind, canonicalized input}`: identical
/// descriptors always yield identical keys, and the SHA-256 digest keeps
/// distinct descriptors practically collision-free. The stage kind is part of
/// the hashed material, so the same text flowing through recognition and
/// translation can never alias.
pub fn stage_cache_key(stage: StageKind, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonicalize(input).as_bytes());
    format!("docflow:{}:{:x}", stage, hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_descriptors_yield_identical_keys() {
        let a = stage_cache_key(StageKind::Translation, "hello world");
        let b = stage_cache_key(StageKind::Translation, "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_is_canonicalized_away() {
        let a = stage_cache_key(StageKind::Translation, "  hello world\n");
        let b = stage_cache_key(StageKind::Translation, "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_and_stages_yield_distinct_keys() {
        let a = stage_cache_key(StageKind::Translation, "hello");
        let b = stage_cache_key(StageKind::Translation, "goodbye");
        let c = stage_cache_key(StageKind::Recognition, "hello");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
