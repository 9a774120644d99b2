//! IVF (inverted file) backend: a coarse k-means quantizer over live
//! vectors.
//!
//! Vectors are bucketed by their nearest centroid; a query probes the
//! `nprobe` nearest clusters and scans only their members. Until enough
//! vectors exist to train the quantizer the backend scans everything, which
//! is exact (and cheap at that size). Centroid initialization is seeded so
//! training, and therefore rebuild equivalence, is repeatable.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use trove_core::config::IvfParams;
use trove_core::types::DistanceMetric;

use crate::backend::VectorHit;
use crate::metric::distance;

/// Partition-based ANN backend.
pub struct IvfBackend {
    metric: DistanceMetric,
    dim: usize,
    params: IvfParams,
    /// id -> vector, live entries only. BTreeMap keeps scans deterministic.
    entries: BTreeMap<String, Vec<f32>>,
    /// Trained coarse centroids; empty until trained.
    centroids: Vec<Vec<f32>>,
    /// id -> centroid index, only meaningful when trained.
    assignment: HashMap<String, usize>,
    /// centroid index -> member ids.
    members: Vec<Vec<String>>,
}

impl IvfBackend {
    pub fn new(dim: usize, metric: DistanceMetric, params: &IvfParams) -> Self {
        Self {
            metric,
            dim,
            params: params.clone(),
            entries: BTreeMap::new(),
            centroids: Vec::new(),
            assignment: HashMap::new(),
            members: Vec::new(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Insert a vector for `id`, replacing any previous entry.
    ///
    /// Crossing the training threshold triggers quantizer training; after
    /// that, each insert is assigned to its nearest centroid.
    pub fn insert(&mut self, id: &str, vector: &[f32]) {
        self.remove(id);
        self.entries.insert(id.to_string(), vector.to_vec());

        if self.is_trained() {
            let cluster = self.nearest_centroid(vector);
            self.assignment.insert(id.to_string(), cluster);
            self.members[cluster].push(id.to_string());
        } else if self.entries.len() >= self.params.min_train_vectors {
            self.train();
        }
    }

    /// Remove the entry for `id`. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.entries.remove(id).is_none() {
            return false;
        }
        if let Some(cluster) = self.assignment.remove(id) {
            if let Some(members) = self.members.get_mut(cluster) {
                members.retain(|m| m != id);
            }
        }
        true
    }

    /// Nearest neighbors, ascending by distance, ties by id ascending.
    ///
    /// Probes the `nprobe` nearest clusters when trained, otherwise scans
    /// all live entries exactly.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        if self.entries.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<VectorHit> = if self.is_trained() {
            let probed = self.nearest_centroids(query, self.params.nprobe.max(1));
            probed
                .into_iter()
                .flat_map(|cluster| self.members[cluster].iter())
                .filter_map(|id| {
                    self.entries.get(id).map(|v| VectorHit {
                        id: id.clone(),
                        distance: distance(self.metric, query, v),
                    })
                })
                .collect()
        } else {
            self.entries
                .iter()
                .map(|(id, v)| VectorHit {
                    id: id.clone(),
                    distance: distance(self.metric, query, v),
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// IVF holds no tombstones; removals are physical.
    pub fn tombstone_ratio(&self) -> f64 {
        0.0
    }

    /// Train the coarse quantizer over a sample of live vectors and assign
    /// every entry to its nearest centroid.
    pub fn train(&mut self) {
        let n = self.entries.len();
        if n < 2 {
            return;
        }
        let k = self.params.clusters.clamp(2, n);

        // Deterministic sample: seeded shuffle over the id-sorted entries.
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let vectors: Vec<&Vec<f32>> = self.entries.values().collect();
        let sample: Vec<&Vec<f32>> = if vectors.len() > self.params.training_sample {
            let mut shuffled = vectors.clone();
            shuffled.shuffle(&mut rng);
            shuffled.truncate(self.params.training_sample);
            shuffled
        } else {
            vectors
        };

        let mut centroids: Vec<Vec<f32>> = sample
            .choose_multiple(&mut rng, k)
            .map(|v| (*v).clone())
            .collect();

        let mut assignments = vec![0usize; sample.len()];
        for _ in 0..self.params.max_training_iters {
            let mut moved = false;
            for (i, vector) in sample.iter().enumerate() {
                let nearest = nearest_index(self.metric, vector, &centroids);
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    moved = true;
                }
            }

            let mut sums = vec![vec![0.0f64; self.dim]; centroids.len()];
            let mut counts = vec![0usize; centroids.len()];
            for (i, vector) in sample.iter().enumerate() {
                let c = assignments[i];
                counts[c] += 1;
                for (acc, component) in sums[c].iter_mut().zip(vector.iter()) {
                    *acc += *component as f64;
                }
            }
            for (c, centroid) in centroids.iter_mut().enumerate() {
                // An empty cluster keeps its previous centroid.
                if counts[c] > 0 {
                    for (slot, acc) in centroid.iter_mut().zip(sums[c].iter()) {
                        *slot = (*acc / counts[c] as f64) as f32;
                    }
                }
            }

            if !moved {
                break;
            }
        }

        self.centroids = centroids;
        self.members = vec![Vec::new(); self.centroids.len()];
        self.assignment.clear();
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            let cluster = {
                let vector = &self.entries[&id];
                self.nearest_centroid(vector)
            };
            self.assignment.insert(id.clone(), cluster);
            self.members[cluster].push(id);
        }

        debug!(
            clusters = self.centroids.len(),
            entries = self.entries.len(),
            "Trained IVF quantizer"
        );
    }

    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        nearest_index(self.metric, vector, &self.centroids)
    }

    /// Indexes of the `n` nearest centroids, ascending by distance.
    fn nearest_centroids(&self, query: &[f32], n: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, distance(self.metric, query, c)))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(n);
        ranked.into_iter().map(|(i, _)| i).collect()
    }
}

fn nearest_index(metric: DistanceMetric, vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance(metric, vector, centroid);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

impl std::fmt::Debug for IvfBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvfBackend")
            .field("metric", &self.metric)
            .field("dim", &self.dim)
            .field("entries", &self.entries.len())
            .field("trained", &self.is_trained())
            .finish()
    }
}
