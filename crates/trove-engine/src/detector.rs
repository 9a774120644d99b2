//! Change detection via normalized content hashing.
//!
//! Content is normalized before hashing so that semantically identical text
//! in different byte representations (tabs vs spaces, trailing newlines,
//! CRLF) hashes identically and does not trigger spurious re-embedding.
//! The detector only ever looks at text; vectors are never inspected.

use sha2::{Digest, Sha256};

use trove_core::types::ContentHash;

/// What the upsert pipeline should do with incoming content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// No record exists for the key yet.
    Insert,
    /// A record exists and its content hash differs.
    Update,
    /// A record exists with identical content; do not re-embed, do not
    /// touch the indexes.
    Skip,
}

/// Collapse all Unicode whitespace runs to a single ASCII space and trim.
pub fn normalize_content(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// SHA-256 over the normalized form of `text`.
pub fn content_hash(text: &str) -> ContentHash {
    let normalized = normalize_content(text);
    let digest = Sha256::digest(normalized.as_bytes());
    ContentHash(digest.into())
}

/// Compare the stored hash (if any) against the incoming one.
pub fn decide(existing: Option<&ContentHash>, incoming: &ContentHash) -> ChangeDecision {
    match existing {
        None => ChangeDecision::Insert,
        Some(stored) if stored == incoming => ChangeDecision::Skip,
        Some(_) => ChangeDecision::Update,
    }
}
