//! Core domain types shared across the Trove workspace.
//!
//! The record model is deliberately small: the store owns the canonical
//! [`EmbeddingRecord`], while the vector and lexical indexes only ever hold
//! the record's `id` back-reference, never a copy of content that could
//! drift.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TroveError};

/// Identifies the embedding model that produced a vector.
///
/// Records from different models are logically partitioned and never
/// compared against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelTag(pub String);

impl ModelTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// SHA-256 digest of normalized source content.
///
/// Used for change detection only. Not unique across records: two records
/// with identical content share a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Reconstruct a hash from a stored 32-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            TroveError::Storage(format!(
                "content hash must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Lowercase hex rendering, used in logs.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A single metadata value.
///
/// Metadata is opaque to the core: values pass through storage and query
/// results without interpretation. The tagged-union shape (rather than raw
/// JSON) lets every variant round-trip losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// Opaque metadata mapping attached to a record.
///
/// A `BTreeMap` keeps iteration (and therefore serialization) deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// The canonical stored unit: one per distinct (`id`, `model_tag`) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Stable external identifier, immutable after creation.
    pub id: String,
    /// Which embedding model produced `vector`.
    pub model_tag: ModelTag,
    /// Digest of the normalized source content.
    pub content_hash: ContentHash,
    /// Embedding vector; length must match the partition's dimensionality.
    pub vector: Vec<f32>,
    /// Normalized source text, retained for lexical indexing and snippets.
    pub text: String,
    /// Opaque caller-supplied metadata.
    pub metadata: Metadata,
    /// Monotonically increasing, starts at 1, incremented on every update.
    pub version: i64,
}

/// Distance metric for vector comparison.
///
/// Fixed per index instance; mixing metrics within one index is rejected at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// Weights applied when fusing vector and lexical scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Weight of the (distance-converted) vector similarity component.
    pub vector: f64,
    /// Weight of the normalized lexical relevance component.
    pub lexical: f64,
}

impl FusionWeights {
    pub fn new(vector: f64, lexical: f64) -> Self {
        Self { vector, lexical }
    }

    /// Reject weights that would make fusion meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.vector.is_finite() || !self.lexical.is_finite() {
            return Err(TroveError::validation("fusion weights must be finite"));
        }
        if self.vector < 0.0 || self.lexical < 0.0 {
            return Err(TroveError::validation("fusion weights must be non-negative"));
        }
        if self.vector == 0.0 && self.lexical == 0.0 {
            return Err(TroveError::validation(
                "at least one fusion weight must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            lexical: 0.3,
        }
    }
}

/// Outcome of an upsert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    /// First record for this (`id`, `model_tag`).
    Inserted,
    /// Content changed; record and both indexes were replaced.
    Updated,
    /// Content unchanged; nothing was re-embedded or re-indexed.
    Skipped,
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
}

/// Outcome of a rebuild request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStatus {
    Started,
    AlreadyInProgress,
}

/// One entry of the fused, ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    /// The matching record's external identifier.
    pub id: String,
    /// Weighted fusion of normalized vector similarity and lexical score.
    pub final_score: f64,
    /// Short excerpt of the stored text.
    pub snippet: String,
    /// The record's pass-through metadata.
    pub metadata: Metadata,
}
