//! Final photo selection: best-N over matched candidates, plus the
//! best-of-a-set ranking used when there is no single reference to match
//! against.

use std::cmp::Ordering;

use crate::matcher::MatchDecision;

/// One archive image paired with its accepted match scores. Never mutated
/// after scoring; only sorted and sliced.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub image_id: String,
    pub similarity: f32,
    pub confidence: f32,
    pub quality: f32,
    pub combined_score: f32,
    pub matching_faces: usize,
}

impl MatchCandidate {
    pub fn from_decision(image_id: impl Into<String>, decision: &MatchDecision) -> Self {
        Self {
            image_id: image_id.into(),
            similarity: decision.best_similarity,
            confidence: decision.confidence,
            quality: decision.quality_score,
            combined_score: decision.combined_score,
            matching_faces: decision.matching_face_count,
        }
    }
}

/// Best-N by combined score, descending. The sort is stable, so candidates
/// with equal scores keep their discovery order.
pub fn select_best(candidates: &[MatchCandidate], limit: usize) -> Vec<MatchCandidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

/// Input to the best-of-a-set ranking. Without a reference person to match,
/// self-similarity within the pool stands in: near-duplicates cost
/// uniqueness, detected faces and image quality earn bonuses.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub image_id: String,
    /// Whole-image quality, 0-100.
    pub quality_score: f32,
    /// Best similarity·confidence against the rest of the pool, 0-1.
    pub similarity_confidence: f32,
    /// Near-duplicates of this image found in the pool.
    pub duplicate_count: usize,
    pub face_detected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPhoto {
    pub image_id: String,
    pub score: f32,
}

/// Rank a fixed pool of images and keep the best `limit`.
pub fn rank_pool(entries: &[PoolEntry], limit: usize) -> Vec<RankedPhoto> {
    let mut ranked: Vec<RankedPhoto> = entries
        .iter()
        .map(|e| {
            let uniqueness = (1.0 - 0.1 * e.duplicate_count as f32).max(0.1);
            let quality_bonus = if e.quality_score > 80.0 {
                0.2
            } else if e.quality_score > 60.0 {
                0.1
            } else {
                0.0
            };
            let face_bonus = if e.face_detected { 0.1 } else { 0.0 };
            let score = (e.quality_score / 100.0) * 0.4
                + e.similarity_confidence * 0.3
                + uniqueness * 0.2
                + quality_bonus
                + face_bonus;
            RankedPhoto {
                image_id: e.image_id.clone(),
                score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked.truncate(limit);
    ranked
}
