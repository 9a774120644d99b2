//! The vector index manager: one swappable ANN structure per partition.
//!
//! Searches clone an `Arc` snapshot of the current structure and run
//! against it, so a concurrent rebuild-and-swap never invalidates an
//! in-flight search: the old structure stays alive until its last reader
//! drops the `Arc`. Mutations (insert/remove/rebuild) are expected to be
//! serialized per partition by the caller (the upsert pipeline holds a
//! per-partition write lock); searches need no coordination.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use trove_core::config::{AnnBackendKind, HnswParams, IvfParams};
use trove_core::error::{Result, TroveError};
use trove_core::types::DistanceMetric;

use crate::backend::{AnnBackend, VectorHit};

/// Observability snapshot of one managed index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub kind: AnnBackendKind,
    pub len: usize,
    pub tombstone_ratio: f64,
    /// True once the tombstone ratio exceeds the configured threshold.
    pub rebuild_recommended: bool,
}

struct IndexCell {
    backend: RwLock<AnnBackend>,
}

/// Owns the current ANN structure for one (`model_tag`) partition and
/// provides the build-then-swap rebuild.
pub struct VectorIndexManager {
    kind: AnnBackendKind,
    dim: usize,
    metric: DistanceMetric,
    hnsw: HnswParams,
    ivf: IvfParams,
    rebuild_tombstone_ratio: f64,
    current: RwLock<Arc<IndexCell>>,
}

impl VectorIndexManager {
    pub fn new(
        kind: AnnBackendKind,
        dim: usize,
        metric: DistanceMetric,
        hnsw: HnswParams,
        ivf: IvfParams,
        rebuild_tombstone_ratio: f64,
    ) -> Self {
        let backend = AnnBackend::new(kind, dim, metric, &hnsw, &ivf);
        Self {
            kind,
            dim,
            metric,
            hnsw,
            ivf,
            rebuild_tombstone_ratio,
            current: RwLock::new(Arc::new(IndexCell {
                backend: RwLock::new(backend),
            })),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn snapshot(&self) -> Arc<IndexCell> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(TroveError::validation(format!(
                "vector dimensionality {} does not match index dimensionality {}",
                vector.len(),
                self.dim
            )));
        }
        Ok(())
    }

    /// Insert a vector, replacing any previous entry for `id`.
    pub fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dim(vector)?;
        let cell = self.snapshot();
        let mut backend = cell
            .backend
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        backend.insert(id, vector);
        Ok(())
    }

    /// Remove the entry for `id`; absent ids are a no-op.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let cell = self.snapshot();
        let mut backend = cell
            .backend
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(backend.remove(id))
    }

    /// Nearest neighbors, ascending by distance, at most `k` results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.check_dim(query)?;
        let cell = self.snapshot();
        let backend = cell
            .backend
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(backend.search(query, k))
    }

    /// Build a fresh structure from the given live records and atomically
    /// swap it in. Reads against the old structure continue until their
    /// `Arc` snapshots drop.
    pub fn rebuild<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let mut fresh = AnnBackend::new(self.kind, self.dim, self.metric, &self.hnsw, &self.ivf);
        let mut count = 0usize;
        for (id, vector) in records {
            if vector.len() != self.dim {
                return Err(TroveError::validation(format!(
                    "record '{}' has dimensionality {}, index expects {}",
                    id,
                    vector.len(),
                    self.dim
                )));
            }
            fresh.insert(id, vector);
            count += 1;
        }

        // For IVF, force quantizer training during the build even below the
        // incremental threshold so a rebuilt index probes immediately.
        if let AnnBackend::Ivf(ivf) = &mut fresh {
            if !ivf.is_trained() && ivf.len() >= 2 {
                ivf.train();
            }
        }

        let cell = Arc::new(IndexCell {
            backend: RwLock::new(fresh),
        });
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = cell;

        info!(count, kind = ?self.kind, "Vector index rebuilt and swapped");
        Ok(count)
    }

    pub fn stats(&self) -> IndexStats {
        let cell = self.snapshot();
        let backend = cell
            .backend
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ratio = backend.tombstone_ratio();
        let stats = IndexStats {
            kind: backend.kind(),
            len: backend.len(),
            tombstone_ratio: ratio,
            rebuild_recommended: ratio > self.rebuild_tombstone_ratio,
        };
        debug!(?stats, "Index stats");
        stats
    }
}

impl std::fmt::Debug for VectorIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexManager")
            .field("kind", &self.kind)
            .field("dim", &self.dim)
            .field("metric", &self.metric)
            .finish()
    }
}
