//! Lexical (full-text) index using SQLite FTS5.
//!
//! Wraps the `lexical_docs` table and its FTS5 shadow. Ranking uses BM25
//! (FTS5's rank is negated so higher = more relevant). Because both index
//! and query text pass through the same `unicode61` tokenizer, matching is
//! symmetric by construction.

use std::sync::Arc;

use tracing::debug;

use trove_core::error::TroveError;
use trove_core::types::ModelTag;

use crate::db::Database;

/// A single lexical search result.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    /// The matching record's external identifier.
    pub id: String,
    /// BM25 relevance (higher = more relevant).
    pub score: f64,
}

/// Full-text index over stored record text, partitioned by model tag.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    db: Arc<Database>,
}

impl LexicalIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the indexed text for (`id`, `model_tag`).
    ///
    /// Idempotent: re-inserting the same id replaces the previous text, so
    /// at most one entry per id is ever reachable.
    pub fn insert(&self, model_tag: &ModelTag, id: &str, text: &str) -> Result<(), TroveError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO lexical_docs (doc_id, model_tag, text)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (doc_id, model_tag) DO UPDATE SET text = excluded.text",
                rusqlite::params![id, model_tag.as_str(), text],
            )
            .map_err(|e| TroveError::Storage(format!("Lexical insert failed: {}", e)))?;
            Ok(())
        })
    }

    /// Remove the entry for (`id`, `model_tag`). Removing an absent id is a
    /// no-op, supporting idempotent deletes from the pipeline.
    pub fn remove(&self, model_tag: &ModelTag, id: &str) -> Result<(), TroveError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM lexical_docs WHERE doc_id = ?1 AND model_tag = ?2",
                rusqlite::params![id, model_tag.as_str()],
            )
            .map_err(|e| TroveError::Storage(format!("Lexical remove failed: {}", e)))?;
            Ok(())
        })
    }

    /// Whether the given id is reachable from this index.
    pub fn contains(&self, model_tag: &ModelTag, id: &str) -> Result<bool, TroveError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM lexical_docs WHERE doc_id = ?1 AND model_tag = ?2",
                    rusqlite::params![id, model_tag.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| TroveError::Storage(e.to_string()))?;
            Ok(count > 0)
        })
    }

    /// Number of indexed entries in one partition.
    pub fn len(&self, model_tag: &ModelTag) -> Result<u64, TroveError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM lexical_docs WHERE model_tag = ?1",
                    rusqlite::params![model_tag.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| TroveError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Search the partition, returning up to `k` hits ordered by BM25 score
    /// descending, ties broken by id ascending.
    ///
    /// The raw query is sanitized into quoted terms first so FTS5 operator
    /// syntax in user input cannot break the statement.
    pub fn search(
        &self,
        model_tag: &ModelTag,
        query: &str,
        k: usize,
    ) -> Result<Vec<LexicalHit>, TroveError> {
        let fts_query = sanitize_fts5_query(query);
        if fts_query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT d.doc_id, bm25(lexical_fts) AS rank
                     FROM lexical_fts
                     JOIN lexical_docs d ON d.rowid = lexical_fts.rowid
                     WHERE lexical_fts MATCH ?1 AND d.model_tag = ?2
                     ORDER BY rank, d.doc_id ASC
                     LIMIT ?3",
                )
                .map_err(|e| TroveError::Storage(format!("FTS5 query prepare failed: {}", e)))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![fts_query, model_tag.as_str(), k as i64],
                    |row| {
                        let id: String = row.get(0)?;
                        let rank: f64 = row.get(1)?;
                        Ok((id, rank))
                    },
                )
                .map_err(|e| TroveError::Storage(format!("FTS5 query failed: {}", e)))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, rank) = row.map_err(|e| TroveError::Storage(e.to_string()))?;
                // FTS5 bm25() is negative (lower = better); negate so
                // higher = more relevant.
                hits.push(LexicalHit { id, score: -rank });
            }

            debug!(
                model_tag = %model_tag,
                query = %fts_query,
                hits = hits.len(),
                "Lexical search"
            );
            Ok(hits)
        })
    }
}

/// Reduce arbitrary user text to a safe FTS5 query.
///
/// Splits on anything that is not alphanumeric, wraps each term in double
/// quotes, and joins with OR. OR semantics keep partial matches rankable;
/// the fusion stage decides how much they matter.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index() -> LexicalIndex {
        LexicalIndex::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn tag() -> ModelTag {
        ModelTag::new("minilm-l6")
    }

    #[test]
    fn test_insert_and_search() {
        let index = make_index();
        index
            .insert(&tag(), "doc-1", "the quick brown fox jumps")
            .unwrap();
        index.insert(&tag(), "doc-2", "lazy dog sleeps all day").unwrap();

        let hits = index.search(&tag(), "quick fox", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc-1");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_search_empty_query() {
        let index = make_index();
        index.insert(&tag(), "doc-1", "hello world").unwrap();
        assert!(index.search(&tag(), "", 10).unwrap().is_empty());
        assert!(index.search(&tag(), "   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_no_matches() {
        let index = make_index();
        index.insert(&tag(), "doc-1", "hello world").unwrap();
        assert!(index.search(&tag(), "nonexistent", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_respects_k() {
        let index = make_index();
        for i in 0..10 {
            index
                .insert(&tag(), &format!("doc-{}", i), "rust document")
                .unwrap();
        }
        let hits = index.search(&tag(), "rust", 3).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_equal_scores_tie_break_by_id() {
        let index = make_index();
        // Identical text yields identical BM25 scores.
        index.insert(&tag(), "doc-b", "alpha beta gamma").unwrap();
        index.insert(&tag(), "doc-a", "alpha beta gamma").unwrap();
        index.insert(&tag(), "doc-c", "alpha beta gamma").unwrap();

        let hits = index.search(&tag(), "alpha", 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c"]);
    }

    #[test]
    fn test_insert_replaces_previous_text() {
        let index = make_index();
        index.insert(&tag(), "doc-1", "original topic").unwrap();
        index.insert(&tag(), "doc-1", "replacement subject").unwrap();

        assert!(index.search(&tag(), "original", 10).unwrap().is_empty());
        let hits = index.search(&tag(), "replacement", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.len(&tag()).unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let index = make_index();
        index.insert(&tag(), "doc-1", "hello world").unwrap();
        index.remove(&tag(), "doc-1").unwrap();
        assert!(index.search(&tag(), "hello", 10).unwrap().is_empty());
        assert!(!index.contains(&tag(), "doc-1").unwrap());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let index = make_index();
        index.remove(&tag(), "ghost").unwrap();
    }

    #[test]
    fn test_partitions_are_isolated() {
        let index = make_index();
        let other = ModelTag::new("mpnet-base");
        index.insert(&tag(), "doc-1", "shared term").unwrap();
        index.insert(&other, "doc-2", "shared term").unwrap();

        let hits = index.search(&tag(), "shared", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc-1");
    }

    #[test]
    fn test_more_occurrences_rank_higher() {
        let index = make_index();
        index.insert(&tag(), "doc-sparse", "rust mentioned once here").unwrap();
        index
            .insert(&tag(), "doc-dense", "rust rust rust guide to rust")
            .unwrap();

        let hits = index.search(&tag(), "rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "doc-dense");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_sanitize_strips_fts_operators() {
        assert_eq!(
            sanitize_fts5_query("quick AND fox"),
            "\"quick\" OR \"AND\" OR \"fox\""
        );
        assert_eq!(sanitize_fts5_query("a-b c*"), "\"a\" OR \"b\" OR \"c\"");
        assert_eq!(sanitize_fts5_query("\"phrase\""), "\"phrase\"");
        assert_eq!(sanitize_fts5_query("!!!"), "");
    }

    #[test]
    fn test_operator_syntax_does_not_error() {
        let index = make_index();
        index.insert(&tag(), "doc-1", "hello world").unwrap();
        // Raw FTS5 syntax would normally be a parse error.
        let hits = index.search(&tag(), "hello NEAR( world", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
