//! Hybrid fusion: one ranked list from vector and lexical candidates.
//!
//! Each sub-index's scores are min-max normalized over its returned
//! candidate set (not a global constant) so distances and BM25 scores
//! become comparable; vector distances convert to similarity as
//! `1 - normalized_distance`. An id present in only one sub-result
//! contributes 0 for the missing component rather than being excluded, so
//! strong single-signal matches are not penalized to extinction. The whole
//! computation is pure: given fixed sub-results and weights the output
//! ordering is fully deterministic, ties broken by id ascending.

use std::collections::BTreeMap;

use trove_core::types::FusionWeights;
use trove_index::VectorHit;
use trove_store::LexicalHit;

/// One fused result, before hydration with metadata and snippets.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub final_score: f64,
}

/// Fuse the two candidate sets into at most `k` ranked hits.
///
/// Both sets empty yields an empty list, not an error.
pub fn fuse(
    vector_hits: &[VectorHit],
    lexical_hits: &[LexicalHit],
    weights: FusionWeights,
    k: usize,
) -> Vec<FusedHit> {
    if k == 0 || (vector_hits.is_empty() && lexical_hits.is_empty()) {
        return Vec::new();
    }

    // id -> (vector similarity, lexical score), each already in [0,1].
    let mut components: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for (id, similarity) in normalize_vector(vector_hits) {
        components.entry(id).or_insert((0.0, 0.0)).0 = similarity;
    }
    for (id, score) in normalize_lexical(lexical_hits) {
        components.entry(id).or_insert((0.0, 0.0)).1 = score;
    }

    let mut fused: Vec<FusedHit> = components
        .into_iter()
        .map(|(id, (vector_sim, lexical_score))| FusedHit {
            id: id.to_string(),
            final_score: weights.vector * vector_sim + weights.lexical * lexical_score,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(k);
    fused
}

/// Min-max normalize distances over the candidate set and convert to
/// similarity. A degenerate set (one candidate, or all distances equal)
/// normalizes to similarity 1.0: every candidate is equally "best" within
/// its own set.
fn normalize_vector(hits: &[VectorHit]) -> Vec<(&str, f64)> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits
        .iter()
        .map(|h| h.distance as f64)
        .fold(f64::INFINITY, f64::min);
    let max = hits
        .iter()
        .map(|h| h.distance as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    hits.iter()
        .map(|h| {
            let similarity = if range > 0.0 {
                1.0 - (h.distance as f64 - min) / range
            } else {
                1.0
            };
            (h.id.as_str(), similarity)
        })
        .collect()
}

/// Min-max normalize lexical scores over the candidate set. Degenerate
/// sets normalize to 1.0, mirroring the vector side.
fn normalize_lexical(hits: &[LexicalHit]) -> Vec<(&str, f64)> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    hits.iter()
        .map(|h| {
            let score = if range > 0.0 {
                (h.score - min) / range
            } else {
                1.0
            };
            (h.id.as_str(), score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vhit(id: &str, distance: f32) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            distance,
        }
    }

    fn lhit(id: &str, score: f64) -> LexicalHit {
        LexicalHit {
            id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_both_empty_yields_empty() {
        assert!(fuse(&[], &[], FusionWeights::default(), 10).is_empty());
    }

    #[test]
    fn test_vector_only() {
        let hits = fuse(
            &[vhit("a", 0.0), vhit("b", 1.0)],
            &[],
            FusionWeights::default(),
            10,
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        // Closest candidate gets the full vector weight.
        assert!((hits[0].final_score - 0.7).abs() < 1e-9);
        assert!((hits[1].final_score - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_lexical_only() {
        let hits = fuse(
            &[],
            &[lhit("a", 5.0), lhit("b", 1.0)],
            FusionWeights::default(),
            10,
        );
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].final_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_agreement_wins() {
        // "both" is top in both sets; "v-only" and "l-only" are strong in
        // exactly one.
        let hits = fuse(
            &[vhit("both", 0.0), vhit("v-only", 0.1), vhit("mid", 0.5)],
            &[lhit("both", 10.0), lhit("l-only", 9.0), lhit("mid", 2.0)],
            FusionWeights::default(),
            10,
        );
        assert_eq!(hits[0].id, "both");
        assert!((hits[0].final_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_component_contributes_zero() {
        let hits = fuse(
            &[vhit("a", 0.0), vhit("b", 2.0)],
            &[lhit("c", 4.0), lhit("d", 1.0)],
            FusionWeights::default(),
            10,
        );
        let a = hits.iter().find(|h| h.id == "a").unwrap();
        let c = hits.iter().find(|h| h.id == "c").unwrap();
        assert!((a.final_score - 0.7).abs() < 1e-9);
        assert!((c.final_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_ties_break_by_id_ascending() {
        // Two ids with identical degenerate scores.
        let hits = fuse(
            &[vhit("zeta", 0.3), vhit("alpha", 0.3)],
            &[],
            FusionWeights::default(),
            10,
        );
        assert_eq!(hits[0].id, "alpha");
        assert_eq!(hits[1].id, "zeta");
        assert!((hits[0].final_score - hits[1].final_score).abs() < 1e-12);
    }

    #[test]
    fn test_truncates_to_k() {
        let vector: Vec<VectorHit> = (0..10).map(|i| vhit(&format!("v{}", i), i as f32)).collect();
        let hits = fuse(&vector, &[], FusionWeights::default(), 3);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_determinism() {
        let vector = vec![vhit("a", 0.1), vhit("b", 0.4), vhit("c", 0.2)];
        let lexical = vec![lhit("b", 3.0), lhit("d", 2.0)];
        let first = fuse(&vector, &lexical, FusionWeights::default(), 10);
        let second = fuse(&vector, &lexical, FusionWeights::default(), 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_weights() {
        // With all weight on lexical, the lexical winner leads even though
        // another id dominates the vector side.
        let hits = fuse(
            &[vhit("v", 0.0), vhit("l", 1.0)],
            &[lhit("l", 9.0), lhit("v", 1.0)],
            FusionWeights::new(0.0, 1.0),
            10,
        );
        assert_eq!(hits[0].id, "l");
    }

    #[test]
    fn test_single_candidate_each_side() {
        let hits = fuse(
            &[vhit("a", 0.42)],
            &[lhit("b", 7.0)],
            FusionWeights::default(),
            10,
        );
        // Degenerate sets normalize to 1.0 on their own side.
        let a = hits.iter().find(|h| h.id == "a").unwrap();
        let b = hits.iter().find(|h| h.id == "b").unwrap();
        assert!((a.final_score - 0.7).abs() < 1e-9);
        assert!((b.final_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_exact_vector_match_with_lexical_support_ranks_first() {
        // doc1 matches the query vector exactly and carries the lexical
        // match; doc2 is orthogonal.
        let vector = vec![vhit("doc1", 0.0), vhit("doc2", 1.0)];
        let lexical = vec![lhit("doc1", 2.5)];
        let hits = fuse(&vector, &lexical, FusionWeights::new(0.7, 0.3), 2);
        assert_eq!(hits[0].id, "doc1");
        assert!((hits[0].final_score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].id, "doc2");
    }
}
