//! Vector similarity metrics and the ensemble combiner.
//!
//! Three independent signals (cosine, Euclidean, Pearson), each normalized to
//! [0, 1], are blended with fixed weights. Disagreement between the signals
//! is treated as evidence against the match: an inconsistent ensemble is
//! rejected outright instead of averaged away.

use crate::embedding::is_informative_vector;
use crate::policy::MatchPolicy;

const WEIGHT_COSINE: f32 = 0.6;
const WEIGHT_EUCLIDEAN: f32 = 0.25;
const WEIGHT_PEARSON: f32 = 0.15;

/// Result of one ensemble comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleScore {
    pub similarity: f32,
    pub confidence: f32,
    pub distance: f32,
}

impl EnsembleScore {
    /// The conservative verdict: no similarity, no confidence.
    pub fn rejected() -> Self {
        Self {
            similarity: 0.0,
            confidence: 0.0,
            distance: 1.0,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.similarity == 0.0 && self.confidence == 0.0
    }
}

/// Cosine similarity mapped to [0, 1]. Returns 0 on length mismatch or when
/// either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b)).clamp(-1.0, 1.0) + 1.0) / 2.0
}

/// Euclidean similarity: `1 - distance / max_distance` with
/// `max_distance = sqrt(4 * len)`, which assumes components in [-1, 1].
/// Clamped to [0, 1]; returns 0 on length mismatch.
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dist = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    let max_dist = (a.len() as f32 * 4.0).sqrt();
    (1.0 - dist / max_dist).clamp(0.0, 1.0)
}

/// Pearson correlation mapped from [-1, 1] to [0, 1]. Returns 0 for fewer
/// than two dimensions or zero variance in either vector.
pub fn pearson_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    let r = (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0);
    (r + 1.0) / 2.0
}

/// Ensemble comparison of two embedding vectors.
///
/// Before any metric runs, two guards apply: non-informative vectors never
/// participate, and vectors whose mean absolute difference falls under
/// `policy.near_identical_diff` are treated as the same placeholder vector.
/// The second guard deliberately zeroes genuine byte-identical duplicates;
/// see `MatchPolicy::near_identical_diff`.
pub fn ensemble_similarity(a: &[f32], b: &[f32], policy: &MatchPolicy) -> EnsembleScore {
    if a.len() != b.len() || a.is_empty() {
        return EnsembleScore::rejected();
    }
    if !is_informative_vector(a, policy.informative_variance)
        || !is_informative_vector(b, policy.informative_variance)
    {
        return EnsembleScore::rejected();
    }
    let mean_abs_diff = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>() / a.len() as f32;
    if mean_abs_diff < policy.near_identical_diff {
        return EnsembleScore::rejected();
    }

    let cos = cosine_similarity(a, b);
    let euc = euclidean_similarity(a, b);
    let pear = pearson_similarity(a, b);

    let combined = WEIGHT_COSINE * cos + WEIGHT_EUCLIDEAN * euc + WEIGHT_PEARSON * pear;
    let mean = (cos + euc + pear) / 3.0;
    let stddev = (((cos - mean) * (cos - mean)
        + (euc - mean) * (euc - mean)
        + (pear - mean) * (pear - mean))
        / 3.0)
        .sqrt();

    // Inconsistent signals: the metrics disagree too much to trust any blend.
    if stddev > policy.max_metric_stddev {
        return EnsembleScore::rejected();
    }

    let mut confidence = (1.0 - 2.0 * stddev).clamp(0.1, 1.0);
    let above_065 = [cos, euc, pear].iter().filter(|m| **m > 0.65).count();
    let above_060 = [cos, euc, pear].iter().filter(|m| **m > 0.6).count();
    if above_065 == 3 && combined > 0.7 {
        confidence = (confidence + 0.15).min(1.0);
    } else if above_060 >= 2 && combined > 0.65 {
        confidence = (confidence + 0.1).min(1.0);
    }

    let mut similarity = combined;
    if confidence < 0.4 {
        similarity *= confidence;
    } else if confidence < 0.6 {
        similarity *= confidence + 0.2;
    }

    // Hard floor: no partial credit for weak ensemble matches.
    if similarity < policy.similarity_floor {
        return EnsembleScore::rejected();
    }

    let similarity = similarity.min(1.0);
    EnsembleScore {
        similarity,
        confidence,
        distance: 1.0 - similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 / len as f32) - 0.5).collect()
    }

    #[test]
    fn cosine_rejects_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_rejects_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = ramp(32);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_opposite_vectors_is_zero() {
        let v = ramp(32);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!(cosine_similarity(&v, &neg).abs() < 1e-6);
    }

    #[test]
    fn euclidean_of_identical_vectors_is_one() {
        let v = ramp(32);
        assert!((euclidean_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pearson_needs_two_dimensions_and_variance() {
        assert_eq!(pearson_similarity(&[1.0], &[1.0]), 0.0);
        assert_eq!(pearson_similarity(&[0.5, 0.5, 0.5], &[0.1, 0.9, 0.3]), 0.0);
    }

    #[test]
    fn pearson_of_linear_relation_is_one() {
        let a = ramp(32);
        let b: Vec<f32> = a.iter().map(|x| 2.0 * x + 0.1).collect();
        assert!((pearson_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ensemble_zeroes_near_identical_vectors() {
        let a = ramp(64);
        let b: Vec<f32> = a.iter().map(|x| x + 1e-5).collect();
        let policy = MatchPolicy::default();
        assert_eq!(ensemble_similarity(&a, &b, &policy), EnsembleScore::rejected());
        // Literal self-comparison falls under the same guard.
        assert_eq!(ensemble_similarity(&a, &a, &policy), EnsembleScore::rejected());
    }

    #[test]
    fn ensemble_rejects_non_informative_input() {
        let policy = MatchPolicy::default();
        let flat = vec![0.2f32; 64];
        let v = ramp(64);
        assert_eq!(ensemble_similarity(&flat, &v, &policy), EnsembleScore::rejected());
        assert_eq!(ensemble_similarity(&v, &flat, &policy), EnsembleScore::rejected());
    }

    #[test]
    fn ensemble_accepts_close_vectors_with_high_confidence() {
        let a = ramp(128);
        // Perturbation large enough to clear the near-identical guard but
        // small enough that all three metrics stay consistent and high.
        let b: Vec<f32> = a
            .iter()
            .enumerate()
            .map(|(i, x)| x + if i % 2 == 0 { 0.02 } else { -0.02 })
            .collect();
        let policy = MatchPolicy::default();
        let score = ensemble_similarity(&a, &b, &policy);
        assert!(score.similarity > 0.9, "similarity = {}", score.similarity);
        assert!(score.confidence > 0.9, "confidence = {}", score.confidence);
        assert!((score.distance - (1.0 - score.similarity)).abs() < 1e-6);
    }

    #[test]
    fn ensemble_floors_weak_matches_to_zero() {
        // Orthogonal square waves: cosine and Pearson land at 0.5, Euclidean
        // around 0.29. The spread stays under the consistency bound but the
        // blend sits below the 0.5 floor, so the pair must score exactly 0.
        let a: Vec<f32> = (0..64).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let b: Vec<f32> = (0..64)
            .map(|i| if (i / 2) % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let policy = MatchPolicy::default();
        let score = ensemble_similarity(&a, &b, &policy);
        assert_eq!(score, EnsembleScore::rejected());
    }

    #[test]
    fn ensemble_rejects_inconsistent_metrics() {
        // Exactly opposite full-range vectors: cosine and Pearson collapse to
        // 0 while Euclidean stays around 0.42, spreading past the bound.
        let a: Vec<f32> = ramp(64).iter().map(|x| x * 2.0).collect();
        let b: Vec<f32> = a.iter().map(|x| -x).collect();
        let policy = MatchPolicy::default();
        assert_eq!(ensemble_similarity(&a, &b, &policy), EnsembleScore::rejected());
    }

    #[test]
    fn ensemble_rejects_length_mismatch() {
        let policy = MatchPolicy::default();
        assert_eq!(
            ensemble_similarity(&ramp(32), &ramp(33), &policy),
            EnsembleScore::rejected()
        );
    }
}
