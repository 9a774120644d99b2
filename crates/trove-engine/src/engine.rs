//! The public operation surface: upsert, delete, query, rebuild.
//!
//! One [`TroveEngine`] owns the record store, the lexical index, and one
//! vector index manager per model tag. Partitions are created lazily on
//! first upsert and restored from the canonical record set on startup; a
//! partition serves no queries until its vector index has been built
//! (`IndexUnavailable` instead of a raw-store scan).
//!
//! Mutations for one partition serialize through an async mutex; searches
//! take no partition lock at all, they run against `Arc` snapshots of the
//! index structure and MVCC reads of the WAL-mode store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use trove_core::config::TroveConfig;
use trove_core::error::{Result, TroveError};
use trove_core::types::{
    DeleteStatus, EmbeddingRecord, FusionWeights, ModelTag, QueryHit, RebuildStatus,
};
use trove_index::{IndexStats, VectorIndexManager};
use trove_store::{Database, LexicalIndex, RecordStore};

use crate::fusion;
use crate::pipeline::{UpsertPipeline, UpsertRequest, UpsertResponse};

/// A read request against one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub model_tag: ModelTag,
    /// Lexical query text; omit for vector-only queries.
    pub text: Option<String>,
    /// Query vector; omit for text-only queries.
    pub vector: Option<Vec<f32>>,
    pub k: usize,
    /// Fusion weights; defaults come from the engine config.
    pub weights: Option<FusionWeights>,
    /// Deadline for the whole query. Exceeding it surfaces `Timeout`
    /// rather than a partial ranked list.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl QueryRequest {
    pub fn new(model_tag: impl Into<ModelTag>) -> Self {
        Self {
            model_tag: model_tag.into(),
            text: None,
            vector: None,
            k: 10,
            weights: None,
            deadline: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Observability counts for one partition.
#[derive(Debug, Clone)]
pub struct PartitionStats {
    pub model_tag: ModelTag,
    pub record_count: u64,
    pub lexical_count: u64,
    pub index: IndexStats,
    pub ready: bool,
}

/// Engine-wide observability snapshot.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub partitions: Vec<PartitionStats>,
}

struct Partition {
    model_tag: ModelTag,
    index: VectorIndexManager,
    /// Serializes upserts, deletes, and rebuild swaps for this partition.
    write_lock: tokio::sync::Mutex<()>,
    /// False until the vector index has been built from the record set.
    ready: AtomicBool,
    rebuilding: AtomicBool,
}

/// The embedding storage and hybrid retrieval engine.
pub struct TroveEngine {
    records: RecordStore,
    lexical: LexicalIndex,
    pipeline: UpsertPipeline,
    config: TroveConfig,
    partitions: RwLock<HashMap<ModelTag, Arc<Partition>>>,
}

impl TroveEngine {
    /// Open an engine over the configured on-disk database, rebuilding
    /// every partition's vector index from the canonical record set before
    /// returning.
    pub fn open(config: TroveConfig) -> Result<Self> {
        let path = std::path::Path::new(&config.storage.data_dir).join(&config.storage.db_file);
        let db = Arc::new(Database::open(&path)?);
        Self::with_database(db, config)
    }

    /// Open an engine over an in-memory database (for testing).
    pub fn in_memory(config: TroveConfig) -> Result<Self> {
        let db = Arc::new(Database::in_memory()?);
        Self::with_database(db, config)
    }

    fn with_database(db: Arc<Database>, config: TroveConfig) -> Result<Self> {
        let records = RecordStore::new(Arc::clone(&db));
        let lexical = LexicalIndex::new(Arc::clone(&db));
        let pipeline = UpsertPipeline::new(records.clone(), lexical.clone());

        let engine = Self {
            records,
            lexical,
            pipeline,
            config,
            partitions: RwLock::new(HashMap::new()),
        };
        engine.bootstrap()?;
        Ok(engine)
    }

    /// Restore partitions from the store: derived index artifacts are
    /// rebuilt from the canonical record set so the engine never serves a
    /// partition whose indexes could be stale.
    fn bootstrap(&self) -> Result<()> {
        for model_tag in self.records.model_tags()? {
            let snapshot = self.records.list(&model_tag)?;
            let dim = match self.partition_dim(&model_tag, &snapshot) {
                Some(dim) => dim,
                None => continue,
            };

            let partition = self.make_partition(model_tag.clone(), dim);
            partition.index.rebuild(
                snapshot
                    .iter()
                    .map(|r| (r.id.as_str(), r.vector.as_slice())),
            )?;

            self.repair_lexical(&model_tag, &snapshot)?;

            partition.ready.store(true, Ordering::SeqCst);
            info!(
                model_tag = %model_tag,
                records = snapshot.len(),
                "Partition restored"
            );
            self.partitions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(model_tag, partition);
        }
        Ok(())
    }

    /// Re-derive lexical entries from the store when the two disagree.
    /// Divergence here means a previous process died between store write
    /// and index update; it is repaired, logged, and not treated as fatal.
    fn repair_lexical(&self, model_tag: &ModelTag, snapshot: &[EmbeddingRecord]) -> Result<()> {
        let lexical_count = self.lexical.len(model_tag)?;
        if lexical_count as usize == snapshot.len() {
            return Ok(());
        }

        warn!(
            model_tag = %model_tag,
            lexical = lexical_count,
            records = snapshot.len(),
            "Lexical index diverged from store, re-deriving"
        );
        for record in snapshot {
            self.lexical.insert(model_tag, &record.id, &record.text)?;
        }
        Ok(())
    }

    fn partition_dim(&self, model_tag: &ModelTag, snapshot: &[EmbeddingRecord]) -> Option<usize> {
        self.config
            .index
            .dimensions
            .get(model_tag.as_str())
            .copied()
            .or_else(|| snapshot.first().map(|r| r.vector.len()))
    }

    fn make_partition(&self, model_tag: ModelTag, dim: usize) -> Arc<Partition> {
        Arc::new(Partition {
            model_tag,
            index: VectorIndexManager::new(
                self.config.index.backend,
                dim,
                self.config.index.metric,
                self.config.index.hnsw.clone(),
                self.config.index.ivf.clone(),
                self.config.index.rebuild_tombstone_ratio,
            ),
            write_lock: tokio::sync::Mutex::new(()),
            ready: AtomicBool::new(false),
            rebuilding: AtomicBool::new(false),
        })
    }

    fn partition(&self, model_tag: &ModelTag) -> Option<Arc<Partition>> {
        self.partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(model_tag)
            .cloned()
    }

    /// Get or create the partition for an upsert carrying `vector`.
    fn partition_for_upsert(
        &self,
        model_tag: &ModelTag,
        vector: Option<&[f32]>,
    ) -> Result<Arc<Partition>> {
        if let Some(partition) = self.partition(model_tag) {
            return Ok(partition);
        }

        // First write for this model tag: the partition's dimensionality
        // comes from config when pinned, otherwise from the vector itself.
        let vector = vector.ok_or(TroveError::MissingVector)?;
        let dim = match self.config.index.dimensions.get(model_tag.as_str()) {
            Some(&pinned) => {
                if vector.len() != pinned {
                    return Err(TroveError::validation(format!(
                        "vector dimensionality {} does not match configured dimensionality {} for model tag '{}'",
                        vector.len(),
                        pinned,
                        model_tag
                    )));
                }
                pinned
            }
            None => vector.len(),
        };

        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A concurrent upsert may have won the race; use its partition.
        let partition = partitions
            .entry(model_tag.clone())
            .or_insert_with(|| {
                let p = self.make_partition(model_tag.clone(), dim);
                // A brand-new partition has nothing to rebuild.
                p.ready.store(true, Ordering::SeqCst);
                info!(model_tag = %model_tag, dim, "Partition created");
                p
            })
            .clone();
        Ok(partition)
    }

    /// Store (or refresh) a record and synchronize both indexes.
    pub async fn upsert(&self, request: UpsertRequest) -> Result<UpsertResponse> {
        let partition =
            self.partition_for_upsert(&request.model_tag, request.vector.as_deref())?;
        let _guard = partition.write_lock.lock().await;
        self.pipeline.upsert(&partition.index, request)
    }

    /// Delete a record from the store and both indexes.
    pub async fn delete(&self, id: &str, model_tag: &ModelTag) -> Result<DeleteStatus> {
        let Some(partition) = self.partition(model_tag) else {
            return Ok(DeleteStatus::NotFound);
        };
        let _guard = partition.write_lock.lock().await;
        self.pipeline.delete(&partition.index, id, model_tag)
    }

    /// Fetch the live record for (`id`, `model_tag`).
    pub fn get(&self, id: &str, model_tag: &ModelTag) -> Result<EmbeddingRecord> {
        self.records.get(id, model_tag)?.ok_or(TroveError::NotFound)
    }

    /// Answer a hybrid query: independent sub-index lookups, min-max
    /// normalization, weighted fusion, then hydration from the store.
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<QueryHit>> {
        let started = Instant::now();

        if request.k == 0 {
            return Err(TroveError::validation("k must be positive"));
        }
        if request.text.is_none() && request.vector.is_none() {
            return Err(TroveError::validation(
                "query needs text, a vector, or both",
            ));
        }
        let weights = request.weights.unwrap_or(FusionWeights {
            vector: self.config.query.vector_weight,
            lexical: self.config.query.lexical_weight,
        });
        weights.validate()?;

        let Some(partition) = self.partition(&request.model_tag) else {
            // No partition means no records were ever written for the tag:
            // an empty result, clearly distinguishable from a failure.
            return Ok(Vec::new());
        };
        if !partition.ready.load(Ordering::SeqCst) {
            return Err(TroveError::IndexUnavailable {
                model_tag: request.model_tag.to_string(),
            });
        }

        let fetch = request.k.max(self.config.query.overfetch);

        let vector_hits = match &request.vector {
            Some(query_vector) => partition.index.search(query_vector, fetch)?,
            None => Vec::new(),
        };
        check_deadline(started, request.deadline)?;

        let lexical_hits = match &request.text {
            Some(query_text) => self.lexical.search(&request.model_tag, query_text, fetch)?,
            None => Vec::new(),
        };
        check_deadline(started, request.deadline)?;

        let fused = fusion::fuse(&vector_hits, &lexical_hits, weights, request.k);

        let mut hits = Vec::with_capacity(fused.len());
        for candidate in fused {
            // A record deleted between fusion and hydration simply drops
            // out; the indexes and store converge at the next write.
            if let Some(record) = self.records.get(&candidate.id, &request.model_tag)? {
                hits.push(QueryHit {
                    id: candidate.id,
                    final_score: candidate.final_score,
                    snippet: snippet_of(&record.text, self.config.query.snippet_len),
                    metadata: record.metadata,
                });
            }
        }
        check_deadline(started, request.deadline)?;

        Ok(hits)
    }

    /// Kick off a background rebuild of the partition's vector index.
    ///
    /// The new structure is built from a snapshot of the record set while
    /// the old one keeps serving searches; the swap is atomic. A rebuild
    /// already in flight reports `AlreadyInProgress`.
    pub async fn rebuild_index(&self, model_tag: &ModelTag) -> Result<RebuildStatus> {
        let partition = self.partition(model_tag).ok_or(TroveError::NotFound)?;

        if partition.rebuilding.swap(true, Ordering::SeqCst) {
            return Ok(RebuildStatus::AlreadyInProgress);
        }

        let records = self.records.clone();
        let task_partition = Arc::clone(&partition);
        tokio::spawn(async move {
            let _guard = task_partition.write_lock.lock().await;
            let result = records
                .list(&task_partition.model_tag)
                .and_then(|snapshot| {
                    task_partition.index.rebuild(
                        snapshot
                            .iter()
                            .map(|r| (r.id.as_str(), r.vector.as_slice())),
                    )
                });
            match result {
                Ok(count) => {
                    task_partition.ready.store(true, Ordering::SeqCst);
                    info!(model_tag = %task_partition.model_tag, count, "Rebuild complete");
                }
                Err(e) => {
                    // Fail safe: a partition whose rebuild failed stops
                    // serving queries instead of answering from a
                    // structure of unknown staleness.
                    task_partition.ready.store(false, Ordering::SeqCst);
                    warn!(model_tag = %task_partition.model_tag, error = %e, "Rebuild failed");
                }
            }
            task_partition.rebuilding.store(false, Ordering::SeqCst);
        });

        Ok(RebuildStatus::Started)
    }

    /// Wait until no rebuild is running for the partition. Useful for
    /// tests and for callers that need rebuild-then-query semantics.
    pub async fn wait_for_rebuild(&self, model_tag: &ModelTag) {
        let Some(partition) = self.partition(model_tag) else {
            return;
        };
        while partition.rebuilding.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Per-partition counts for observability.
    pub fn stats(&self) -> Result<EngineStats> {
        let partitions: Vec<Arc<Partition>> = self
            .partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(partitions.len());
        for partition in partitions {
            out.push(PartitionStats {
                model_tag: partition.model_tag.clone(),
                record_count: self.records.count(&partition.model_tag)?,
                lexical_count: self.lexical.len(&partition.model_tag)?,
                index: partition.index.stats(),
                ready: partition.ready.load(Ordering::SeqCst),
            });
        }
        out.sort_by(|a, b| a.model_tag.cmp(&b.model_tag));
        Ok(EngineStats { partitions: out })
    }
}

impl std::fmt::Debug for TroveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TroveEngine").finish()
    }
}

fn check_deadline(started: Instant, deadline: Option<Duration>) -> Result<()> {
    if let Some(deadline) = deadline {
        if started.elapsed() >= deadline {
            return Err(TroveError::Timeout);
        }
    }
    Ok(())
}

fn snippet_of(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
