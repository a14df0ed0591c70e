//! Pure face-matching core: similarity metrics, per-image embedding hygiene,
//! match decisions and final photo selection. No I/O and no async; the
//! orchestrating crate feeds it embeddings from whatever engine it talks to.

pub mod cluster;
pub mod embedding;
pub mod matcher;
pub mod policy;
pub mod select;
pub mod similarity;

// Re-export commonly used types
pub use embedding::{FaceEmbedding, FaceRegion, ImageEmbeddingSet};
pub use matcher::{match_candidate, MatchDecision, RejectReason};
pub use policy::{DecisionTier, MatchPolicy};
pub use select::{rank_pool, select_best, MatchCandidate, PoolEntry, RankedPhoto};
pub use similarity::{ensemble_similarity, EnsembleScore};
