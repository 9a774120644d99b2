//! HNSW graph backend, wrapping `hnsw_rs`.
//!
//! The underlying graph does not support physical removal, so removals are
//! tombstones: the slot keeps its place in the graph but is filtered out of
//! every search result. Tombstoned slots are reclaimed when the manager
//! rebuilds the backend from the canonical record set. Updates to an
//! existing id tombstone the old slot and insert a fresh one, so at most
//! one live slot per id is ever reachable.

use std::collections::HashMap;

use hnsw_rs::prelude::*;

use trove_core::config::HnswParams;
use trove_core::types::DistanceMetric;

use crate::backend::VectorHit;

enum Graph {
    Cosine(Hnsw<'static, f32, anndists::dist::distances::DistCosine>),
    Euclidean(Hnsw<'static, f32, anndists::dist::distances::DistL2>),
}

impl Graph {
    fn insert(&mut self, vector: &Vec<f32>, data_id: usize) {
        match self {
            Graph::Cosine(h) => h.insert((vector, data_id)),
            Graph::Euclidean(h) => h.insert((vector, data_id)),
        }
    }

    fn search(&self, query: &[f32], knbn: usize, ef: usize) -> Vec<Neighbour> {
        match self {
            Graph::Cosine(h) => h.search(query, knbn, ef),
            Graph::Euclidean(h) => h.search(query, knbn, ef),
        }
    }
}

/// Graph-based ANN backend with tombstone removal.
pub struct HnswBackend {
    graph: Graph,
    params: HnswParams,
    metric: DistanceMetric,
    dim: usize,
    /// data_id -> external id, append-only.
    slots: Vec<String>,
    /// external id -> live slot.
    slot_of: HashMap<String, usize>,
    deleted: Vec<bool>,
    live: usize,
}

impl HnswBackend {
    pub fn new(dim: usize, metric: DistanceMetric, params: &HnswParams) -> Self {
        let capacity = params.capacity_hint.max(1024);
        let graph = match metric {
            DistanceMetric::Cosine => Graph::Cosine(Hnsw::new(
                params.max_connections,
                capacity,
                params.max_layer,
                params.ef_construction,
                anndists::dist::distances::DistCosine {},
            )),
            DistanceMetric::Euclidean => Graph::Euclidean(Hnsw::new(
                params.max_connections,
                capacity,
                params.max_layer,
                params.ef_construction,
                anndists::dist::distances::DistL2 {},
            )),
        };

        Self {
            graph,
            params: params.clone(),
            metric,
            dim,
            slots: Vec::new(),
            slot_of: HashMap::new(),
            deleted: Vec::new(),
            live: 0,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert a vector for `id`. An existing entry for the same id is
    /// tombstoned first, so the id never resolves to two slots.
    pub fn insert(&mut self, id: &str, vector: &[f32]) {
        self.remove(id);

        let data_id = self.slots.len();
        self.slots.push(id.to_string());
        self.deleted.push(false);
        self.slot_of.insert(id.to_string(), data_id);
        self.graph.insert(&vector.to_vec(), data_id);
        self.live += 1;
    }

    /// Tombstone the entry for `id`. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        if let Some(slot) = self.slot_of.remove(id) {
            if !self.deleted[slot] {
                self.deleted[slot] = true;
                self.live -= 1;
            }
            true
        } else {
            false
        }
    }

    /// Nearest neighbors for `query`, ascending by distance, ties broken by
    /// id ascending, tombstones filtered, length at most `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        if self.live == 0 || k == 0 {
            return Vec::new();
        }

        // Over-request to survive tombstone filtering.
        let tombstones = self.slots.len() - self.live;
        let knbn = (k + tombstones).min(self.slots.len()).max(1);
        let ef = self.params.ef_search.max(knbn * 2);

        let neighbours = self.graph.search(query, knbn, ef);

        let mut hits: Vec<VectorHit> = Vec::with_capacity(k);
        for n in neighbours {
            let data_id = n.d_id;
            if data_id >= self.slots.len() {
                continue;
            }
            if self.deleted[data_id] {
                continue;
            }
            hits.push(VectorHit {
                id: self.slots[data_id].clone(),
                distance: n.distance,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }

    /// Number of live (non-tombstoned) entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Fraction of slots that are tombstones; drives rebuild recommendations.
    pub fn tombstone_ratio(&self) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        (self.slots.len() - self.live) as f64 / self.slots.len() as f64
    }
}

impl std::fmt::Debug for HnswBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswBackend")
            .field("metric", &self.metric)
            .field("dim", &self.dim)
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish()
    }
}
