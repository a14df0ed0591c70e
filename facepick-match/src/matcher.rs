//! Match decision between a reference embedding set and one candidate image.
//!
//! Only two acceptance tiers exist, strong and good. There is deliberately no
//! weak tier: a borderline face in a delivery folder costs far more trust
//! than a missed photo.

use crate::embedding::FaceEmbedding;
use crate::policy::{DecisionTier, MatchPolicy};
use crate::similarity::ensemble_similarity;

/// Why a candidate was rejected. Carried for observability; rejection itself
/// is just `is_match == false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    LowImageQuality { quality: f32 },
    NoComparableFaces,
    InconsistentEvidence { stddev: f32 },
    LowSimilarity,
    LowConfidence,
    InsufficientMatchingFaces,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowImageQuality { quality } => {
                write!(f, "image quality too low ({quality:.0}/100)")
            }
            Self::NoComparableFaces => write!(f, "no comparable faces"),
            Self::InconsistentEvidence { stddev } => {
                write!(f, "inconsistent evidence across faces (stddev {stddev:.3})")
            }
            Self::LowSimilarity => write!(f, "similarity below threshold"),
            Self::LowConfidence => write!(f, "confidence below threshold"),
            Self::InsufficientMatchingFaces => write!(f, "not enough confidently matching faces"),
        }
    }
}

/// Verdict for one candidate image. A pure function of the two embedding
/// sets and the candidate's image quality; rejected decisions carry zero in
/// every score field.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub is_match: bool,
    pub best_similarity: f32,
    pub confidence: f32,
    pub quality_score: f32,
    pub combined_score: f32,
    pub matching_face_count: usize,
    pub reject_reason: Option<RejectReason>,
}

impl MatchDecision {
    fn rejected(reason: RejectReason) -> Self {
        Self {
            is_match: false,
            best_similarity: 0.0,
            confidence: 0.0,
            quality_score: 0.0,
            combined_score: 0.0,
            matching_face_count: 0,
            reject_reason: Some(reason),
        }
    }
}

fn tier_accepts(
    tier: &DecisionTier,
    best_similarity: f32,
    avg_confidence: f32,
    matching_faces: usize,
    quality: f32,
) -> bool {
    best_similarity > tier.min_similarity
        && avg_confidence > tier.min_confidence
        && matching_faces >= tier.min_matching_faces
        && quality > tier.min_quality
}

/// Compare every (reference, candidate) embedding pair and decide whether the
/// candidate image shows the reference person.
pub fn match_candidate(
    reference: &[FaceEmbedding],
    candidate: &[FaceEmbedding],
    candidate_quality: f32,
    policy: &MatchPolicy,
) -> MatchDecision {
    // Hard quality gate, independent of any face evidence.
    if candidate_quality < policy.candidate_quality_min {
        return MatchDecision::rejected(RejectReason::LowImageQuality {
            quality: candidate_quality,
        });
    }

    let mut similarities = Vec::with_capacity(reference.len() * candidate.len());
    let mut best_similarity = 0.0f32;
    let mut best_confidence = 0.0f32;
    let mut sum_similarity = 0.0f32;
    let mut sum_confidence = 0.0f32;
    let mut matching_faces = 0usize;

    for r in reference {
        for c in candidate {
            let score = ensemble_similarity(&r.vector, &c.vector, policy);
            similarities.push(score.similarity);
            sum_similarity += score.similarity;
            sum_confidence += score.confidence;
            if score.similarity > best_similarity {
                best_similarity = score.similarity;
                best_confidence = score.confidence;
            }
            if score.similarity > policy.pair_similarity_min
                && score.confidence > policy.pair_confidence_min
            {
                matching_faces += 1;
            }
        }
    }

    if similarities.is_empty() {
        return MatchDecision::rejected(RejectReason::NoComparableFaces);
    }

    // Cross-validation: with several faces on both sides, the pairwise
    // similarities should agree with each other. A wide spread means the
    // evidence contradicts itself.
    if reference.len() > 1 && candidate.len() > 1 {
        let n = similarities.len() as f32;
        let mean = sum_similarity / n;
        let stddev = (similarities
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f32>()
            / n)
            .sqrt();
        if stddev > policy.cross_validation_stddev {
            log::debug!(
                "cross-validation rejected candidate: similarity stddev {:.3} over {} pairs",
                stddev,
                similarities.len()
            );
            return MatchDecision::rejected(RejectReason::InconsistentEvidence { stddev });
        }
    }

    let n = similarities.len() as f32;
    let avg_similarity = sum_similarity / n;
    let avg_confidence = sum_confidence / n;

    let accepted = tier_accepts(
        &policy.strong,
        best_similarity,
        avg_confidence,
        matching_faces,
        candidate_quality,
    ) || tier_accepts(
        &policy.good,
        best_similarity,
        avg_confidence,
        matching_faces,
        candidate_quality,
    );

    if !accepted {
        let reason = if best_similarity <= policy.good.min_similarity {
            RejectReason::LowSimilarity
        } else if avg_confidence <= policy.good.min_confidence {
            RejectReason::LowConfidence
        } else if matching_faces < policy.good.min_matching_faces {
            RejectReason::InsufficientMatchingFaces
        } else {
            RejectReason::LowImageQuality {
                quality: candidate_quality,
            }
        };
        return MatchDecision::rejected(reason);
    }

    let combined_score = (0.4 * best_similarity
        + 0.2 * avg_similarity
        + 0.15 * avg_confidence
        + 0.15 * (candidate_quality / 100.0)
        + (0.05 * matching_faces as f32).min(0.1))
    .min(1.0);

    MatchDecision {
        is_match: true,
        best_similarity,
        confidence: best_confidence,
        quality_score: candidate_quality,
        combined_score,
        matching_face_count: matching_faces,
        reject_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{FaceEmbedding, FaceRegion};

    fn face(vector: Vec<f32>) -> FaceEmbedding {
        FaceEmbedding::new(vector, FaceRegion::new(0.0, 0.0, 100.0, 100.0))
    }

    fn base(seed: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i as f32 * 0.37 + seed) * 7.3).sin())
            .collect()
    }

    fn perturbed(v: &[f32], amp: f32, phase: usize) -> Vec<f32> {
        v.iter()
            .enumerate()
            .map(|(i, x)| x + if (i + phase) % 2 == 0 { amp } else { -amp })
            .collect()
    }

    #[test]
    fn quality_below_sixty_rejects_regardless_of_similarity() {
        let policy = MatchPolicy::default();
        let b = base(1.0, 128);
        let reference = vec![face(perturbed(&b, 0.02, 0))];
        let candidate = vec![face(perturbed(&b, 0.02, 1))];
        let decision = match_candidate(&reference, &candidate, 55.0, &policy);
        assert!(!decision.is_match);
        assert_eq!(decision.combined_score, 0.0);
        assert!(matches!(
            decision.reject_reason,
            Some(RejectReason::LowImageQuality { .. })
        ));
    }

    #[test]
    fn empty_sets_reject_with_no_comparable_faces() {
        let policy = MatchPolicy::default();
        let decision = match_candidate(&[], &[face(base(1.0, 64))], 90.0, &policy);
        assert!(!decision.is_match);
        assert_eq!(decision.reject_reason, Some(RejectReason::NoComparableFaces));
    }

    #[test]
    fn same_person_good_quality_matches() {
        let policy = MatchPolicy::default();
        let b = base(1.0, 128);
        let reference = vec![face(perturbed(&b, 0.02, 0))];
        let candidate = vec![face(perturbed(&b, 0.02, 1))];
        let decision = match_candidate(&reference, &candidate, 90.0, &policy);
        assert!(decision.is_match, "reason: {:?}", decision.reject_reason);
        assert!(decision.combined_score > 0.0 && decision.combined_score <= 1.0);
        assert_eq!(decision.quality_score, 90.0);
    }

    #[test]
    fn different_person_rejects_on_similarity() {
        let policy = MatchPolicy::default();
        let reference = vec![face(base(1.0, 128))];
        let candidate = vec![face(base(40.0, 128))];
        let decision = match_candidate(&reference, &candidate, 90.0, &policy);
        assert!(!decision.is_match);
        assert_eq!(decision.combined_score, 0.0);
    }

    #[test]
    fn acceptance_is_monotone_in_quality() {
        let policy = MatchPolicy::default();
        let b = base(1.0, 128);
        let reference = vec![face(perturbed(&b, 0.02, 0))];
        let candidate = vec![face(perturbed(&b, 0.02, 1))];
        let mut accepted_below = false;
        for quality in [55.0, 61.0, 66.0, 71.0, 90.0] {
            let decision = match_candidate(&reference, &candidate, quality, &policy);
            // Once a quality level accepts, every higher level must accept.
            assert!(
                !accepted_below || decision.is_match,
                "acceptance regressed at quality {quality}"
            );
            accepted_below = decision.is_match;
        }
        assert!(accepted_below);
    }

    #[test]
    fn cross_validation_rejects_contradictory_pairs() {
        let policy = MatchPolicy::default();
        let b = base(1.0, 128);
        // Reference has two genuinely different faces; candidate has two near
        // copies of one of them. Half the pairs score high, half zero, so the
        // spread blows past the cross-validation bound.
        let reference = vec![face(perturbed(&b, 0.02, 0)), face(base(40.0, 128))];
        let candidate = vec![face(perturbed(&b, 0.02, 1)), face(perturbed(&b, 0.03, 0))];
        let decision = match_candidate(&reference, &candidate, 90.0, &policy);
        assert!(!decision.is_match);
        assert!(matches!(
            decision.reject_reason,
            Some(RejectReason::InconsistentEvidence { .. })
        ));
    }
}
