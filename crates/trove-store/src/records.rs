//! The canonical embedding record store.
//!
//! Exactly one live row exists per (`id`, `model_tag`). `put` assigns the
//! record's version itself (1 on insert, previous + 1 on update) inside a
//! single connection lock acquisition, so concurrent upserts of the same key
//! serialize and last-writer-wins by submission order. Index synchronization
//! is deliberately not performed here; that is the upsert pipeline's job.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use tracing::debug;

use trove_core::error::TroveError;
use trove_core::types::{ContentHash, EmbeddingRecord, Metadata, ModelTag};

use crate::db::Database;

/// Durable store for [`EmbeddingRecord`]s, backed by the `records` table.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Arc<Database>,
}

impl RecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch the live record for (`id`, `model_tag`), if any.
    pub fn get(&self, id: &str, model_tag: &ModelTag) -> Result<Option<EmbeddingRecord>, TroveError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, model_tag, content_hash, vector, text, metadata, version
                 FROM records WHERE id = ?1 AND model_tag = ?2",
                rusqlite::params![id, model_tag.as_str()],
                row_to_record,
            )
            .optional()
            .map_err(|e| TroveError::Storage(format!("Record lookup failed: {}", e)))
        })
    }

    /// Insert or update the record, returning the previous version (None on
    /// first insert).
    ///
    /// The `version` field of the argument is ignored; the store assigns
    /// versions so that they stay monotone even when two upserts race.
    pub fn put(&self, record: &EmbeddingRecord) -> Result<Option<i64>, TroveError> {
        let vector_blob = vector_to_blob(&record.vector);
        let metadata_json = serde_json::to_string(&record.metadata)?;

        self.db.with_conn(|conn| {
            let prev: Option<i64> = conn
                .query_row(
                    "SELECT version FROM records WHERE id = ?1 AND model_tag = ?2",
                    rusqlite::params![record.id, record.model_tag.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| TroveError::Storage(format!("Version lookup failed: {}", e)))?;

            match prev {
                None => {
                    conn.execute(
                        "INSERT INTO records
                            (id, model_tag, content_hash, vector, text, metadata, version)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                        rusqlite::params![
                            record.id,
                            record.model_tag.as_str(),
                            record.content_hash.as_bytes(),
                            vector_blob,
                            record.text,
                            metadata_json,
                        ],
                    )
                    .map_err(|e| TroveError::Storage(format!("Record insert failed: {}", e)))?;
                    debug!(id = %record.id, model_tag = %record.model_tag, "Record inserted");
                }
                Some(v) => {
                    conn.execute(
                        "UPDATE records
                         SET content_hash = ?3, vector = ?4, text = ?5, metadata = ?6,
                             version = ?7, updated_at = strftime('%s', 'now')
                         WHERE id = ?1 AND model_tag = ?2",
                        rusqlite::params![
                            record.id,
                            record.model_tag.as_str(),
                            record.content_hash.as_bytes(),
                            vector_blob,
                            record.text,
                            metadata_json,
                            v + 1,
                        ],
                    )
                    .map_err(|e| TroveError::Storage(format!("Record update failed: {}", e)))?;
                    debug!(
                        id = %record.id,
                        model_tag = %record.model_tag,
                        version = v + 1,
                        "Record updated"
                    );
                }
            }

            Ok(prev)
        })
    }

    /// Hard-delete the record. Returns false when no row existed.
    pub fn delete(&self, id: &str, model_tag: &ModelTag) -> Result<bool, TroveError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM records WHERE id = ?1 AND model_tag = ?2",
                    rusqlite::params![id, model_tag.as_str()],
                )
                .map_err(|e| TroveError::Storage(format!("Record delete failed: {}", e)))?;
            Ok(affected > 0)
        })
    }

    /// Snapshot all live records for one partition, ordered by id.
    ///
    /// Used by index rebuilds; the snapshot is taken under the connection
    /// lock so it is internally consistent.
    pub fn list(&self, model_tag: &ModelTag) -> Result<Vec<EmbeddingRecord>, TroveError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, model_tag, content_hash, vector, text, metadata, version
                     FROM records WHERE model_tag = ?1 ORDER BY id",
                )
                .map_err(|e| TroveError::Storage(format!("Record scan prepare failed: {}", e)))?;

            let rows = stmt
                .query_map(rusqlite::params![model_tag.as_str()], row_to_record)
                .map_err(|e| TroveError::Storage(format!("Record scan failed: {}", e)))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(|e| TroveError::Storage(e.to_string()))?);
            }
            Ok(records)
        })
    }

    /// All model tags with at least one live record.
    pub fn model_tags(&self) -> Result<Vec<ModelTag>, TroveError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT model_tag FROM records ORDER BY model_tag")
                .map_err(|e| TroveError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| TroveError::Storage(e.to_string()))?;

            let mut tags = Vec::new();
            for row in rows {
                tags.push(ModelTag(row.map_err(|e| TroveError::Storage(e.to_string()))?));
            }
            Ok(tags)
        })
    }

    /// Number of live records in one partition.
    pub fn count(&self, model_tag: &ModelTag) -> Result<u64, TroveError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM records WHERE model_tag = ?1",
                    rusqlite::params![model_tag.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| TroveError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
    let id: String = row.get(0)?;
    let model_tag: String = row.get(1)?;
    let hash_bytes: Vec<u8> = row.get(2)?;
    let vector_blob: Vec<u8> = row.get(3)?;
    let text: String = row.get(4)?;
    let metadata_json: String = row.get(5)?;
    let version: i64 = row.get(6)?;

    let content_hash = ContentHash::from_slice(&hash_bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(std::io::Error::other(e.to_string()))))?;
    let vector = blob_to_vector(&vector_blob).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::other(e.to_string())),
        )
    })?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;

    Ok(EmbeddingRecord {
        id,
        model_tag: ModelTag(model_tag),
        content_hash,
        vector,
        text,
        metadata,
        version,
    })
}

/// Encode a vector as a little-endian f32 BLOB.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        blob.extend_from_slice(&component.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 BLOB back into a vector.
///
/// A byte length that is not a multiple of 4 is corruption, never silently
/// truncated.
pub fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>, TroveError> {
    if blob.len() % 4 != 0 {
        return Err(TroveError::Storage(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_core::types::MetadataValue;

    fn make_store() -> RecordStore {
        RecordStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn make_record(id: &str, text: &str) -> EmbeddingRecord {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), MetadataValue::Text("unit-test".into()));
        EmbeddingRecord {
            id: id.to_string(),
            model_tag: ModelTag::new("minilm-l6"),
            content_hash: ContentHash([1u8; 32]),
            vector: vec![0.1, 0.2, 0.3],
            text: text.to_string(),
            metadata,
            version: 1,
        }
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let store = make_store();
        let record = make_record("doc-1", "the quick brown fox");

        let prev = store.put(&record).unwrap();
        assert_eq!(prev, None);

        let fetched = store.get("doc-1", &record.model_tag).unwrap().unwrap();
        assert_eq!(fetched.id, "doc-1");
        assert_eq!(fetched.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(fetched.text, "the quick brown fox");
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.metadata, record.metadata);
    }

    #[test]
    fn test_put_increments_version() {
        let store = make_store();
        let mut record = make_record("doc-1", "v1 text");

        assert_eq!(store.put(&record).unwrap(), None);

        record.text = "v2 text".to_string();
        record.content_hash = ContentHash([2u8; 32]);
        let prev = store.put(&record).unwrap();
        assert_eq!(prev, Some(1));

        let fetched = store.get("doc-1", &record.model_tag).unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.text, "v2 text");
    }

    #[test]
    fn test_put_ignores_caller_version() {
        let store = make_store();
        let mut record = make_record("doc-1", "text");
        record.version = 99;

        store.put(&record).unwrap();
        let fetched = store.get("doc-1", &record.model_tag).unwrap().unwrap();
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = make_store();
        let result = store.get("ghost", &ModelTag::new("minilm-l6")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete() {
        let store = make_store();
        let record = make_record("doc-1", "text");
        store.put(&record).unwrap();

        assert!(store.delete("doc-1", &record.model_tag).unwrap());
        assert!(store.get("doc-1", &record.model_tag).unwrap().is_none());
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let store = make_store();
        assert!(!store.delete("ghost", &ModelTag::new("minilm-l6")).unwrap());
    }

    #[test]
    fn test_same_id_different_model_tags() {
        let store = make_store();
        let record_a = make_record("doc-1", "text a");
        let mut record_b = make_record("doc-1", "text b");
        record_b.model_tag = ModelTag::new("mpnet-base");

        store.put(&record_a).unwrap();
        store.put(&record_b).unwrap();

        assert_eq!(
            store.get("doc-1", &record_a.model_tag).unwrap().unwrap().text,
            "text a"
        );
        assert_eq!(
            store.get("doc-1", &record_b.model_tag).unwrap().unwrap().text,
            "text b"
        );

        let tags = store.model_tags().unwrap();
        assert_eq!(
            tags,
            vec![ModelTag::new("minilm-l6"), ModelTag::new("mpnet-base")]
        );
    }

    #[test]
    fn test_list_orders_by_id() {
        let store = make_store();
        for id in ["doc-c", "doc-a", "doc-b"] {
            store.put(&make_record(id, "text")).unwrap();
        }

        let records = store.list(&ModelTag::new("minilm-l6")).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c"]);
        assert_eq!(store.count(&ModelTag::new("minilm-l6")).unwrap(), 3);
    }

    #[test]
    fn test_vector_blob_roundtrip() {
        let vector = vec![1.0f32, -2.5, 0.0, f32::MIN_POSITIVE];
        let blob = vector_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vector(&blob).unwrap(), vector);
    }

    #[test]
    fn test_blob_rejects_truncated_bytes() {
        assert!(blob_to_vector(&[0u8; 7]).is_err());
    }
}
