//! The backend enum dispatching between HNSW and IVF.

use trove_core::config::{AnnBackendKind, HnswParams, IvfParams};
use trove_core::types::DistanceMetric;

use crate::hnsw::HnswBackend;
use crate::ivf::IvfBackend;

/// A single vector search result. Distance semantics follow the backend's
/// metric: smaller is closer for both cosine and Euclidean.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
}

/// One of the two interchangeable ANN structures.
#[derive(Debug)]
pub enum AnnBackend {
    Hnsw(HnswBackend),
    Ivf(IvfBackend),
}

impl AnnBackend {
    pub fn new(
        kind: AnnBackendKind,
        dim: usize,
        metric: DistanceMetric,
        hnsw: &HnswParams,
        ivf: &IvfParams,
    ) -> Self {
        match kind {
            AnnBackendKind::Hnsw => AnnBackend::Hnsw(HnswBackend::new(dim, metric, hnsw)),
            AnnBackendKind::Ivf => AnnBackend::Ivf(IvfBackend::new(dim, metric, ivf)),
        }
    }

    pub fn kind(&self) -> AnnBackendKind {
        match self {
            AnnBackend::Hnsw(_) => AnnBackendKind::Hnsw,
            AnnBackend::Ivf(_) => AnnBackendKind::Ivf,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        match self {
            AnnBackend::Hnsw(b) => b.metric(),
            AnnBackend::Ivf(b) => b.metric(),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            AnnBackend::Hnsw(b) => b.dim(),
            AnnBackend::Ivf(b) => b.dim(),
        }
    }

    pub fn insert(&mut self, id: &str, vector: &[f32]) {
        match self {
            AnnBackend::Hnsw(b) => b.insert(id, vector),
            AnnBackend::Ivf(b) => b.insert(id, vector),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self {
            AnnBackend::Hnsw(b) => b.remove(id),
            AnnBackend::Ivf(b) => b.remove(id),
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        match self {
            AnnBackend::Hnsw(b) => b.search(query, k),
            AnnBackend::Ivf(b) => b.search(query, k),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnnBackend::Hnsw(b) => b.len(),
            AnnBackend::Ivf(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_ratio(&self) -> f64 {
        match self {
            AnnBackend::Hnsw(b) => b.tombstone_ratio(),
            AnnBackend::Ivf(b) => b.tombstone_ratio(),
        }
    }
}
