use serde::{Deserialize, Serialize};

/// Bounding region of a detected face, in image pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One detected face: the embedding vector plus the per-face scores the
/// engine reports alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
    pub region: FaceRegion,
    /// Detection quality in [0, 1].
    pub quality: f32,
    /// Quality of the embedding itself in [0, 1].
    pub embedding_quality: f32,
    /// Engine's overall per-face score in [0, 1].
    pub overall: f32,
}

impl FaceEmbedding {
    /// Embedding with neutral quality scores, for engines that do not score
    /// individual faces.
    pub fn new(vector: Vec<f32>, region: FaceRegion) -> Self {
        Self {
            vector,
            region,
            quality: 1.0,
            embedding_quality: 1.0,
            overall: 1.0,
        }
    }

    /// False for empty, constant, near-constant and non-finite vectors.
    /// Non-informative embeddings must never reach a similarity computation.
    pub fn is_informative(&self, variance_min: f32) -> bool {
        is_informative_vector(&self.vector, variance_min)
    }
}

pub fn is_informative_vector(vector: &[f32], variance_min: f32) -> bool {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let n = vector.len() as f32;
    let mean = vector.iter().sum::<f32>() / n;
    let variance = vector.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    variance >= variance_min
}

/// Everything extracted from a single image. Immutable after creation and
/// scoped to one pipeline run; persistence is the caller's business.
#[derive(Debug, Clone)]
pub struct ImageEmbeddingSet {
    pub image_id: String,
    /// Whole-image quality score, 0-100.
    pub quality_score: f32,
    /// Faces the engine detected, before any filtering.
    pub face_count: usize,
    pub embeddings: Vec<FaceEmbedding>,
}

impl ImageEmbeddingSet {
    pub fn new(image_id: impl Into<String>, quality_score: f32, embeddings: Vec<FaceEmbedding>) -> Self {
        Self {
            image_id: image_id.into(),
            quality_score,
            face_count: embeddings.len(),
            embeddings,
        }
    }
}
