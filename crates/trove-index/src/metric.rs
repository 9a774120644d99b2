//! Distance computations shared by the IVF backend and result ordering.

use trove_core::types::DistanceMetric;

/// Distance between two equal-length vectors under the given metric.
///
/// Cosine distance is `1 - cosine_similarity`, so both metrics order
/// ascending (smaller = closer). A zero-magnitude vector has cosine
/// distance 1 to everything.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        mag_a += (*x as f64) * (*x as f64);
        mag_b += (*y as f64) * (*y as f64);
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (mag_a.sqrt() * mag_b.sqrt())) as f32
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum();
    sum.sqrt() as f32
}
