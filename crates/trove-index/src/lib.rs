//! Trove Index crate - approximate nearest-neighbor backends and the
//! swappable index manager.
//!
//! Two interchangeable backends sit behind [`AnnBackend`]: an HNSW
//! proximity graph (higher build cost, better recall) and an IVF coarse
//! quantizer (cheaper builds, recall governed by probe count). The
//! [`VectorIndexManager`] owns the current backend behind an `Arc` snapshot
//! so rebuilds never block in-flight searches.

pub mod backend;
pub mod hnsw;
pub mod ivf;
pub mod manager;
pub mod metric;

pub use backend::{AnnBackend, VectorHit};
pub use hnsw::HnswBackend;
pub use ivf::IvfBackend;
pub use manager::{IndexStats, VectorIndexManager};
