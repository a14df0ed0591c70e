use serde::{Deserialize, Serialize};

/// One acceptance tier for the match decision. Every bound must hold for the
/// tier to accept a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionTier {
    pub min_similarity: f32,
    pub min_confidence: f32,
    pub min_matching_faces: usize,
    pub min_quality: f32,
}

/// Every numeric threshold of the pipeline, centralized so the stages cannot
/// drift apart. The defaults reproduce the reference behavior; `strict()` and
/// `lenient()` are presets for operators who want fewer or more matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Mean absolute per-dimension difference under which two vectors are
    /// treated as the same placeholder/default vector and forced to
    /// similarity 0. This also zeroes out byte-identical duplicate photos;
    /// raise it only if the engine is known never to emit default vectors.
    pub near_identical_diff: f32,
    /// Minimum component variance for a vector to count as informative.
    pub informative_variance: f32,
    /// Maximum standard deviation across the three ensemble metrics before
    /// the pair is rejected as inconsistent.
    pub max_metric_stddev: f32,
    /// Ensemble similarities below this are forced to exactly 0.
    pub similarity_floor: f32,
    /// Per-face detection quality gate.
    pub face_quality_min: f32,
    /// Per-face embedding quality gate.
    pub embedding_quality_min: f32,
    /// Pairwise cosine similarity above which two faces from the same image
    /// join one cluster.
    pub cluster_similarity: f32,
    /// Within the dominant cluster, members below this fraction of the
    /// largest bounding-box area are dropped as spurious detections.
    pub cluster_area_ratio: f32,
    /// Candidate images below this quality never match, whatever the faces say.
    pub candidate_quality_min: f32,
    /// A (reference, candidate) pair counts as a matching face above these.
    pub pair_similarity_min: f32,
    pub pair_confidence_min: f32,
    /// With multiple faces on both sides, pairwise similarities spreading
    /// wider than this reject the candidate outright.
    pub cross_validation_stddev: f32,
    pub strong: DecisionTier,
    pub good: DecisionTier,
    /// Reference (customer) images below this quality are bounced back to the
    /// user instead of silently skipped.
    pub reference_quality_min: f32,
    /// Reference images with more faces than this are bounced back too.
    pub reference_max_faces: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            near_identical_diff: 1e-3,
            informative_variance: 1e-3,
            max_metric_stddev: 0.15,
            similarity_floor: 0.5,
            face_quality_min: 0.15,
            embedding_quality_min: 0.5,
            cluster_similarity: 0.8,
            cluster_area_ratio: 0.4,
            candidate_quality_min: 60.0,
            pair_similarity_min: 0.8,
            pair_confidence_min: 0.75,
            cross_validation_stddev: 0.15,
            strong: DecisionTier {
                min_similarity: 0.85,
                min_confidence: 0.80,
                min_matching_faces: 2,
                min_quality: 70.0,
            },
            good: DecisionTier {
                min_similarity: 0.80,
                min_confidence: 0.75,
                min_matching_faces: 1,
                min_quality: 65.0,
            },
            reference_quality_min: 60.0,
            reference_max_faces: 3,
        }
    }
}

impl MatchPolicy {
    /// Fewer false positives: higher similarity and quality bars everywhere.
    pub fn strict() -> Self {
        Self {
            candidate_quality_min: 70.0,
            strong: DecisionTier {
                min_similarity: 0.88,
                min_confidence: 0.85,
                min_matching_faces: 2,
                min_quality: 75.0,
            },
            good: DecisionTier {
                min_similarity: 0.84,
                min_confidence: 0.80,
                min_matching_faces: 1,
                min_quality: 70.0,
            },
            ..Self::default()
        }
    }

    /// More recall for low-quality archives. The hard floors of the ensemble
    /// itself are unchanged; only the decision tiers relax.
    pub fn lenient() -> Self {
        Self {
            candidate_quality_min: 55.0,
            strong: DecisionTier {
                min_similarity: 0.83,
                min_confidence: 0.78,
                min_matching_faces: 2,
                min_quality: 65.0,
            },
            good: DecisionTier {
                min_similarity: 0.78,
                min_confidence: 0.72,
                min_matching_faces: 1,
                min_quality: 60.0,
            },
            ..Self::default()
        }
    }
}
