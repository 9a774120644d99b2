//! The upsert pipeline: coordinates change detection, the record store,
//! and both indexes on every write.
//!
//! A call moves through: received -> hash checked -> (skipped | stored ->
//! indexes updated) -> acknowledged. All validation happens before the
//! first mutation. On an update, the old vector and text are removed from
//! both indexes before the new ones are inserted, so two entries for one id
//! are never concurrently reachable. If an index update fails after the
//! record was stored, it is retried once (insert and remove are both
//! idempotent) before the failure surfaces as an inconsistency, because a
//! stored record that is unreachable from an index is a correctness
//! violation rather than a transient nuisance.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use trove_core::error::{Result, TroveError};
use trove_core::types::{
    DeleteStatus, EmbeddingRecord, Metadata, ModelTag, UpsertStatus,
};
use trove_index::VectorIndexManager;
use trove_store::{LexicalIndex, RecordStore};

use crate::detector::{self, ChangeDecision};

/// A single write request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub id: String,
    pub model_tag: ModelTag,
    /// Raw source content; normalized before hashing and indexing.
    pub content: String,
    /// Precomputed embedding. The pipeline never invokes an embedding
    /// model itself, so a missing vector fails the call.
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Acknowledgement of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResponse {
    pub status: UpsertStatus,
    pub version: i64,
}

/// Write-side coordinator over the record store and both indexes.
#[derive(Debug, Clone)]
pub struct UpsertPipeline {
    records: RecordStore,
    lexical: LexicalIndex,
}

impl UpsertPipeline {
    pub fn new(records: RecordStore, lexical: LexicalIndex) -> Self {
        Self { records, lexical }
    }

    /// Run one upsert against the given partition's vector index.
    ///
    /// The caller serializes mutations per partition; this method assumes
    /// it is the only writer for (`id`, `model_tag`) while it runs.
    pub fn upsert(
        &self,
        index: &VectorIndexManager,
        request: UpsertRequest,
    ) -> Result<UpsertResponse> {
        if request.id.is_empty() {
            return Err(TroveError::validation("id must not be empty"));
        }

        let normalized = detector::normalize_content(&request.content);
        let incoming_hash = detector::content_hash(&request.content);

        let existing = self.records.get(&request.id, &request.model_tag)?;
        let decision = detector::decide(existing.as_ref().map(|r| &r.content_hash), &incoming_hash);

        if decision == ChangeDecision::Skip {
            // Unchanged content: no re-embedding, no index churn, version
            // stays put.
            let version = existing.map(|r| r.version).unwrap_or(1);
            debug!(id = %request.id, model_tag = %request.model_tag, "Upsert skipped, content unchanged");
            return Ok(UpsertResponse {
                status: UpsertStatus::Skipped,
                version,
            });
        }

        // Everything that can be rejected is rejected before the store is
        // touched.
        let vector = request.vector.ok_or(TroveError::MissingVector)?;
        if vector.len() != index.dim() {
            return Err(TroveError::validation(format!(
                "vector dimensionality {} does not match index dimensionality {}",
                vector.len(),
                index.dim()
            )));
        }

        let record = EmbeddingRecord {
            id: request.id.clone(),
            model_tag: request.model_tag.clone(),
            content_hash: incoming_hash,
            vector: vector.clone(),
            text: normalized.clone(),
            metadata: request.metadata,
            version: 0, // assigned by the store
        };

        let previous_version = self.records.put(&record)?;

        let is_update = decision == ChangeDecision::Update;
        self.sync_indexes(index, &request.id, &request.model_tag, is_update, &vector, &normalized)?;

        let (status, version) = match previous_version {
            None => (UpsertStatus::Inserted, 1),
            Some(v) => (UpsertStatus::Updated, v + 1),
        };
        info!(
            id = %request.id,
            model_tag = %request.model_tag,
            ?status,
            version,
            "Upsert acknowledged"
        );
        Ok(UpsertResponse { status, version })
    }

    /// Delete a record and its index entries. Absent keys report
    /// `NotFound` as a status, not an error, so idempotent callers can
    /// retry freely.
    pub fn delete(
        &self,
        index: &VectorIndexManager,
        id: &str,
        model_tag: &ModelTag,
    ) -> Result<DeleteStatus> {
        if !self.records.delete(id, model_tag)? {
            return Ok(DeleteStatus::NotFound);
        }

        // Index removal is idempotent on both sides; retry once before
        // declaring the store and indexes divergent.
        let remove = || -> Result<()> {
            index.remove(id)?;
            self.lexical.remove(model_tag, id)?;
            Ok(())
        };
        if let Err(first) = remove() {
            warn!(id, %model_tag, error = %first, "Index removal failed, retrying");
            remove().map_err(|second| TroveError::IndexInconsistency {
                detail: format!(
                    "record '{}' deleted from store but index removal failed twice: {}",
                    id, second
                ),
            })?;
        }

        info!(id, %model_tag, "Record deleted");
        Ok(DeleteStatus::Deleted)
    }

    /// Apply index updates for a stored record, retrying once on failure.
    fn sync_indexes(
        &self,
        index: &VectorIndexManager,
        id: &str,
        model_tag: &ModelTag,
        is_update: bool,
        vector: &[f32],
        text: &str,
    ) -> Result<()> {
        let apply = || -> Result<()> {
            if is_update {
                // Remove-before-insert: the id must never resolve to two
                // entries, even transiently within this call.
                index.remove(id)?;
                self.lexical.remove(model_tag, id)?;
            }
            index.insert(id, vector)?;
            self.lexical.insert(model_tag, id, text)?;
            Ok(())
        };

        if let Err(first) = apply() {
            warn!(id, %model_tag, error = %first, "Index update failed, retrying");
            apply().map_err(|second| TroveError::IndexInconsistency {
                detail: format!(
                    "record '{}' stored but index update failed twice: {}",
                    id, second
                ),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use trove_core::config::{AnnBackendKind, HnswParams, IvfParams};
    use trove_core::types::{DistanceMetric, MetadataValue};
    use trove_store::Database;

    fn make_parts() -> (UpsertPipeline, VectorIndexManager, RecordStore, LexicalIndex) {
        let db = Arc::new(Database::in_memory().unwrap());
        let records = RecordStore::new(Arc::clone(&db));
        let lexical = LexicalIndex::new(Arc::clone(&db));
        let pipeline = UpsertPipeline::new(records.clone(), lexical.clone());
        let index = VectorIndexManager::new(
            AnnBackendKind::Hnsw,
            3,
            DistanceMetric::Cosine,
            HnswParams::default(),
            IvfParams::default(),
            0.3,
        );
        (pipeline, index, records, lexical)
    }

    fn request(id: &str, content: &str, vector: Option<Vec<f32>>) -> UpsertRequest {
        UpsertRequest {
            id: id.to_string(),
            model_tag: ModelTag::new("minilm-l6"),
            content: content.to_string(),
            vector,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_insert_reaches_store_and_both_indexes() {
        let (pipeline, index, records, lexical) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        let response = pipeline
            .upsert(&index, request("doc-1", "the quick brown fox", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        assert_eq!(response.status, UpsertStatus::Inserted);
        assert_eq!(response.version, 1);

        assert!(records.get("doc-1", &tag).unwrap().is_some());
        assert!(lexical.contains(&tag, "doc-1").unwrap());
        let hits = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].id, "doc-1");
    }

    #[test]
    fn test_identical_content_skips() {
        let (pipeline, index, records, _) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        pipeline
            .upsert(&index, request("doc-1", "same text", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        let second = pipeline
            .upsert(&index, request("doc-1", "same text", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();

        assert_eq!(second.status, UpsertStatus::Skipped);
        assert_eq!(second.version, 1);
        assert_eq!(records.get("doc-1", &tag).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_skip_ignores_missing_vector() {
        let (pipeline, index, _, _) = make_parts();

        pipeline
            .upsert(&index, request("doc-1", "some text", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        // Re-sending identical content without a vector is fine: the hash
        // check resolves to Skip before the vector is needed.
        let response = pipeline
            .upsert(&index, request("doc-1", "some   text", None))
            .unwrap();
        assert_eq!(response.status, UpsertStatus::Skipped);
    }

    #[test]
    fn test_whitespace_variant_skips() {
        let (pipeline, index, _, _) = make_parts();

        pipeline
            .upsert(&index, request("doc-1", "hello world", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        let second = pipeline
            .upsert(&index, request("doc-1", "  hello\t\tworld \n", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        assert_eq!(second.status, UpsertStatus::Skipped);
    }

    #[test]
    fn test_update_bumps_version_and_replaces_index_entries() {
        let (pipeline, index, records, lexical) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        pipeline
            .upsert(&index, request("doc-1", "original content", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        let response = pipeline
            .upsert(&index, request("doc-1", "replacement content", Some(vec![0.0, 1.0, 0.0])))
            .unwrap();

        assert_eq!(response.status, UpsertStatus::Updated);
        assert_eq!(response.version, 2);

        let record = records.get("doc-1", &tag).unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.text, "replacement content");

        // Exactly one live entry in each index.
        let hits = index.search(&[0.0, 1.0, 0.0], 10).unwrap();
        assert_eq!(hits.iter().filter(|h| h.id == "doc-1").count(), 1);
        assert!(hits[0].distance < 1e-5);
        assert!(lexical.search(&tag, "original", 10).unwrap().is_empty());
        assert_eq!(lexical.search(&tag, "replacement", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_vector_rejected_without_mutation() {
        let (pipeline, index, records, lexical) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        let err = pipeline
            .upsert(&index, request("doc-1", "new content", None))
            .unwrap_err();
        assert!(matches!(err, TroveError::MissingVector));

        assert!(records.get("doc-1", &tag).unwrap().is_none());
        assert!(!lexical.contains(&tag, "doc-1").unwrap());
    }

    #[test]
    fn test_dimension_mismatch_rejected_without_mutation() {
        let (pipeline, index, records, _) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        let err = pipeline
            .upsert(&index, request("doc-1", "content", Some(vec![1.0, 0.0])))
            .unwrap_err();
        assert!(matches!(err, TroveError::Validation { .. }));
        assert!(records.get("doc-1", &tag).unwrap().is_none());
    }

    #[test]
    fn test_empty_id_rejected() {
        let (pipeline, index, _, _) = make_parts();
        let err = pipeline
            .upsert(&index, request("", "content", Some(vec![1.0, 0.0, 0.0])))
            .unwrap_err();
        assert!(matches!(err, TroveError::Validation { .. }));
    }

    #[test]
    fn test_delete_removes_everywhere() {
        let (pipeline, index, records, lexical) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        pipeline
            .upsert(&index, request("doc-1", "content here", Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        let status = pipeline.delete(&index, "doc-1", &tag).unwrap();
        assert_eq!(status, DeleteStatus::Deleted);

        assert!(records.get("doc-1", &tag).unwrap().is_none());
        assert!(!lexical.contains(&tag, "doc-1").unwrap());
        assert!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_absent_reports_not_found() {
        let (pipeline, index, _, _) = make_parts();
        let status = pipeline
            .delete(&index, "ghost", &ModelTag::new("minilm-l6"))
            .unwrap();
        assert_eq!(status, DeleteStatus::NotFound);
    }

    #[test]
    fn test_metadata_round_trips() {
        let (pipeline, index, records, _) = make_parts();
        let tag = ModelTag::new("minilm-l6");

        let mut req = request("doc-1", "content", Some(vec![1.0, 0.0, 0.0]));
        req.metadata
            .insert("author".into(), MetadataValue::Text("grace".into()));
        req.metadata.insert("stars".into(), MetadataValue::Integer(5));
        pipeline.upsert(&index, req.clone()).unwrap();

        let record = records.get("doc-1", &tag).unwrap().unwrap();
        assert_eq!(record.metadata, req.metadata);
    }
}
