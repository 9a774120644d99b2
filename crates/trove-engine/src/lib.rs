//! Trove Engine crate - change detection, hybrid fusion, the upsert
//! pipeline, and the public operation surface.
//!
//! [`TroveEngine`] is the entry point collaborators call: `upsert`,
//! `delete`, `query`, and `rebuild_index`. Embedding generation is never
//! performed here; callers supply vectors, the engine stores and retrieves
//! them.

pub mod detector;
pub mod engine;
pub mod fusion;
pub mod pipeline;

pub use detector::{content_hash, normalize_content, ChangeDecision};
pub use engine::{EngineStats, PartitionStats, QueryRequest, TroveEngine};
pub use fusion::{fuse, FusedHit};
pub use pipeline::{UpsertPipeline, UpsertRequest, UpsertResponse};
