//! Per-image embedding hygiene: quality filtering and dominant-cluster
//! reduction.
//!
//! One photo contributes at most one canonical face embedding to matching.
//! Spurious secondary detections (reflections, posters, background faces)
//! tend to form small clusters or small bounding boxes; both get dropped
//! before the matcher ever sees them.

use crate::embedding::FaceEmbedding;
use crate::policy::MatchPolicy;
use crate::similarity::cosine_similarity;

/// Drop non-informative and low-quality embeddings. An empty result means
/// "no usable face", which callers treat as a skip, not an error.
pub fn quality_filter(embeddings: Vec<FaceEmbedding>, policy: &MatchPolicy) -> Vec<FaceEmbedding> {
    embeddings
        .into_iter()
        .filter(|e| {
            e.is_informative(policy.informative_variance)
                && e.quality >= policy.face_quality_min
                && e.embedding_quality >= policy.embedding_quality_min
        })
        .collect()
}

/// First-fit clustering by pairwise cosine similarity: an embedding joins the
/// first cluster containing any member above the threshold, otherwise it
/// starts a new one.
pub fn cluster_embeddings(
    embeddings: Vec<FaceEmbedding>,
    policy: &MatchPolicy,
) -> Vec<Vec<FaceEmbedding>> {
    let mut clusters: Vec<Vec<FaceEmbedding>> = Vec::new();
    'next: for emb in embeddings {
        for cluster in clusters.iter_mut() {
            if cluster
                .iter()
                .any(|m| cosine_similarity(&m.vector, &emb.vector) > policy.cluster_similarity)
            {
                cluster.push(emb);
                continue 'next;
            }
        }
        clusters.push(vec![emb]);
    }
    clusters
}

/// Reduce one image's raw embeddings to its single canonical face.
///
/// Filter by quality, cluster the survivors, keep the dominant (largest)
/// cluster, drop members whose bounding box is under `cluster_area_ratio` of
/// the cluster's largest, and return the largest-area survivor. `None` means
/// the image has no usable face.
pub fn canonical_embedding(
    embeddings: Vec<FaceEmbedding>,
    policy: &MatchPolicy,
) -> Option<FaceEmbedding> {
    let usable = quality_filter(embeddings, policy);
    if usable.is_empty() {
        return None;
    }
    if usable.len() == 1 {
        return usable.into_iter().next();
    }

    let mut clusters = cluster_embeddings(usable, policy);
    // Stable sort: earlier clusters win ties, matching discovery order.
    clusters.sort_by(|a, b| b.len().cmp(&a.len()));
    let dominant = clusters.into_iter().next()?;

    if dominant.len() == 1 {
        return dominant.into_iter().next();
    }

    let max_area = dominant
        .iter()
        .map(|e| e.region.area())
        .fold(0.0f32, f32::max);
    dominant
        .into_iter()
        .filter(|e| e.region.area() >= policy.cluster_area_ratio * max_area)
        .max_by(|a, b| {
            a.region
                .area()
                .partial_cmp(&b.region.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FaceRegion;

    fn emb(vector: Vec<f32>, area_side: f32) -> FaceEmbedding {
        FaceEmbedding::new(vector, FaceRegion::new(0.0, 0.0, area_side, area_side))
    }

    fn base(seed: f32, len: usize) -> Vec<f32> {
        // Deterministic pseudo-random-ish vector with real variance.
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
    fn quality_filter_drops_low_scores() {
        let policy = MatchPolicy::default();
        let mut bad_quality = emb(base(1.0, 64), 50.0);
        bad_quality.quality = 0.1;
        let mut bad_embedding = emb(base(2.0, 64), 50.0);
        bad_embedding.embedding_quality = 0.3;
        let good = emb(base(3.0, 64), 50.0);
        let kept = quality_filter(vec![bad_quality, bad_embedding, good.clone()], &policy);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].vector, good.vector);
    }

    #[test]
    fn quality_filter_drops_non_informative() {
        let policy = MatchPolicy::default();
        let kept = quality_filter(vec![emb(vec![0.5; 64], 50.0)], &policy);
        assert!(kept.is_empty());
    }

    #[test]
    fn single_survivor_is_canonical() {
        let policy = MatchPolicy::default();
        let face = emb(base(1.0, 64), 40.0);
        let canonical = canonical_embedding(vec![face.clone()], &policy).unwrap();
        assert_eq!(canonical.vector, face.vector);
    }

    #[test]
    fn clustering_sizes_are_order_independent() {
        let policy = MatchPolicy::default();
        let a = base(1.0, 64);
        let b = base(40.0, 64);
        // Two well-separated families: three near copies of `a`, two of `b`.
        let faces = vec![
            emb(perturbed(&a, 0.02, 0), 50.0),
            emb(perturbed(&a, 0.03, 1), 48.0),
            emb(perturbed(&a, 0.025, 0), 52.0),
            emb(perturbed(&b, 0.02, 0), 30.0),
            emb(perturbed(&b, 0.03, 1), 32.0),
        ];

        let orders: [[usize; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [3, 0, 4, 1, 2],
            [2, 4, 0, 3, 1],
        ];
        for order in orders {
            let shuffled: Vec<FaceEmbedding> =
                order.iter().map(|&i| faces[i].clone()).collect();
            let mut sizes: Vec<usize> = cluster_embeddings(shuffled, &policy)
                .iter()
                .map(|c| c.len())
                .collect();
            sizes.sort_unstable();
            assert_eq!(sizes, vec![2, 3]);
        }
    }

    #[test]
    fn dominant_cluster_wins_and_small_boxes_drop() {
        let policy = MatchPolicy::default();
        let a = base(1.0, 64);
        let b = base(40.0, 64);
        let faces = vec![
            emb(perturbed(&a, 0.02, 0), 100.0),
            // Tiny box in the dominant cluster: under 40% of the max area.
            emb(perturbed(&a, 0.03, 1), 20.0),
            emb(perturbed(&a, 0.025, 0), 80.0),
            emb(perturbed(&b, 0.02, 0), 200.0),
        ];
        let canonical = canonical_embedding(faces.clone(), &policy).unwrap();
        // Largest-area survivor of the dominant (3-member) cluster.
        assert_eq!(canonical.region.area(), 100.0 * 100.0);
    }

    #[test]
    fn all_filtered_means_no_face() {
        let policy = MatchPolicy::default();
        let mut low = emb(base(1.0, 64), 50.0);
        low.quality = 0.05;
        assert!(canonical_embedding(vec![low], &policy).is_none());
    }
}
