use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::DistanceMetric;

/// Top-level configuration for a Trove instance.
///
/// Loaded from a TOML file. Each section corresponds to one subsystem;
/// every field has a default so a partial (or missing) file still yields a
/// working configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TroveConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl TroveConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TroveConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the SQLite database file.
    pub data_dir: String,
    /// Database file name within `data_dir`.
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.trove/data".to_string(),
            db_file: "trove.db".to_string(),
        }
    }
}

/// Which ANN backend a partition uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnBackendKind {
    /// Layered proximity graph; higher build cost, better recall.
    Hnsw,
    /// Coarse-quantized inverted file; cheaper builds, recall depends on
    /// probe count.
    Ivf,
}

impl Default for AnnBackendKind {
    fn default() -> Self {
        AnnBackendKind::Hnsw
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// ANN backend used for new partitions.
    pub backend: AnnBackendKind,
    /// Distance metric, fixed per partition.
    pub metric: DistanceMetric,
    /// Pinned dimensionality per model tag. Tags not listed here adopt the
    /// dimensionality of the first vector upserted for them.
    pub dimensions: BTreeMap<String, usize>,
    /// Tombstone-to-live ratio past which a rebuild is recommended.
    pub rebuild_tombstone_ratio: f64,
    pub hnsw: HnswParams,
    pub ivf: IvfParams,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: AnnBackendKind::default(),
            metric: DistanceMetric::default(),
            dimensions: BTreeMap::new(),
            rebuild_tombstone_ratio: 0.3,
            hnsw: HnswParams::default(),
            ivf: IvfParams::default(),
        }
    }
}

/// HNSW graph construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    /// Maximum neighbors kept per node per layer.
    pub max_connections: usize,
    /// Candidate list width during construction.
    pub ef_construction: usize,
    /// Minimum candidate list width during search.
    pub ef_search: usize,
    /// Maximum number of graph layers.
    pub max_layer: usize,
    /// Expected element count, used to size the graph up front.
    pub capacity_hint: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layer: 16,
            capacity_hint: 16_384,
        }
    }
}

/// IVF quantizer and probe parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfParams {
    /// Number of coarse clusters.
    pub clusters: usize,
    /// Clusters probed per query.
    pub nprobe: usize,
    /// Below this many live vectors the index scans instead of probing.
    pub min_train_vectors: usize,
    /// Cap on vectors sampled for k-means training.
    pub training_sample: usize,
    /// k-means iteration cap.
    pub max_training_iters: usize,
    /// Seed for centroid initialization; fixed so rebuilds are repeatable.
    pub seed: u64,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            clusters: 64,
            nprobe: 8,
            min_train_vectors: 256,
            training_sample: 50_000,
            max_training_iters: 15,
            seed: 0x5eed,
        }
    }
}

/// Query-time settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Candidates requested from each sub-index before fusion, as a floor:
    /// the effective fetch count is `max(k, overfetch)`.
    pub overfetch: usize,
    /// Default weight of the vector similarity component.
    pub vector_weight: f64,
    /// Default weight of the lexical relevance component.
    pub lexical_weight: f64,
    /// Maximum snippet length in characters.
    pub snippet_len: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch: 50,
            vector_weight: 0.7,
            lexical_weight: 0.3,
            snippet_len: 240,
        }
    }
}
