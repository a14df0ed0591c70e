//! Capability seams to the external collaborators: the embedding engine, the
//! archive image source and the delivery sink. The matching core depends
//! only on these traits; production wires in the subprocess engine and a
//! Drive-like sink, tests wire in whatever they need.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use facepick_match::{FaceEmbedding, FaceRegion, ImageEmbeddingSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("embedding engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding engine failed: {0}")]
    Engine(String),
    #[error("malformed engine output: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where an archive image lives. The pipeline never loads pixels itself;
/// locations are handed to the embedding engine as-is.
#[derive(Debug, Clone)]
pub enum ImageLocation {
    Path(PathBuf),
    Url(String),
}

impl ImageLocation {
    pub fn as_engine_arg(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Url(u) => u.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveImage {
    pub id: String,
    pub name: String,
    pub location: ImageLocation,
}

/// The face-embedding engine. Zero embeddings is success, not failure: the
/// image simply has no detectable face.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn extract(&self, image: &ArchiveImage) -> Result<ImageEmbeddingSet, ProviderError>;
}

/// Streamed archive listing. Large archives (~1000 images) are pulled one at
/// a time rather than materialized.
#[async_trait]
pub trait ImageSource: Send {
    async fn next_image(&mut self) -> Result<Option<ArchiveImage>, ProviderError>;
}

/// Delivery target: folder creation, copies, public link. The pipeline only
/// decides which ids to pass.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, ProviderError>;
    async fn copy(&self, image_id: &str, folder_id: &str) -> Result<(), ProviderError>;
    async fn set_public_permission(&self, folder_id: &str) -> Result<String, ProviderError>;
}

// --- Subprocess engine ------------------------------------------------------

/// Engine wire format: one JSON object on stdout per call.
#[derive(Debug, Deserialize)]
struct WireExtraction {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    embeddings: Vec<WireFace>,
}

#[derive(Debug, Deserialize)]
struct WireFace {
    embedding: Vec<f32>,
    #[serde(default)]
    region: WireRegion,
    #[serde(default = "neutral_score")]
    quality: f32,
    #[serde(default = "neutral_score")]
    embedding_quality: f32,
    #[serde(default = "neutral_score")]
    overall: f32,
}

#[derive(Debug, Default, Deserialize)]
struct WireRegion {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

#[derive(Debug, Deserialize)]
struct WireQuality {
    success: bool,
    #[serde(default)]
    quality_score: f32,
}

// Engines that do not score individual faces must not have every photo
// rejected by the per-face quality gate.
fn neutral_score() -> f32 {
    1.0
}

/// Provider backed by an external process speaking JSON on stdout, the shape
/// the original Python face processor uses. Two calls per image: embedding
/// extraction and whole-image quality.
pub struct SubprocessProvider {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl SubprocessProvider {
    /// `command` is the full invocation, program first.
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, base_args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
            timeout,
        })
    }

    async fn invoke(&self, action: &str, image_arg: &str) -> Result<Vec<u8>, ProviderError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg(action)
            .arg("--img1")
            .arg(image_arg)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Engine(format!(
                "{action} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl EmbeddingProvider for SubprocessProvider {
    async fn extract(&self, image: &ArchiveImage) -> Result<ImageEmbeddingSet, ProviderError> {
        let arg = image.location.as_engine_arg();

        let raw = self.invoke("extract_embeddings", &arg).await?;
        let wire: WireExtraction = serde_json::from_slice(&raw)?;
        if !wire.success {
            return Err(ProviderError::Engine(
                wire.error.unwrap_or_else(|| "extraction failed".into()),
            ));
        }

        let raw = self.invoke("quality", &arg).await?;
        let quality: WireQuality = serde_json::from_slice(&raw)?;
        let quality_score = if quality.success {
            quality.quality_score
        } else {
            0.0
        };

        let embeddings = wire
            .embeddings
            .into_iter()
            .map(|f| FaceEmbedding {
                vector: f.embedding,
                region: FaceRegion::new(f.region.x, f.region.y, f.region.w, f.region.h),
                quality: f.quality,
                embedding_quality: f.embedding_quality,
                overall: f.overall,
            })
            .collect();

        Ok(ImageEmbeddingSet::new(
            image.id.clone(),
            quality_score,
            embeddings,
        ))
    }
}

// --- Degraded fallback ------------------------------------------------------

/// Placeholder extraction used once the engine is considered down. The image
/// quality sits below the hard candidate gate, so degraded output can reduce
/// matches but never inflate them.
pub fn fallback_extraction(image_id: &str, dimensions: usize) -> ImageEmbeddingSet {
    let mut rng = StdRng::seed_from_u64(id_seed(image_id));
    let vector: Vec<f32> = (0..dimensions).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let embedding = FaceEmbedding {
        vector,
        region: FaceRegion::new(0.0, 0.0, 64.0, 64.0),
        quality: 0.2,
        embedding_quality: 0.5,
        overall: 0.2,
    };
    ImageEmbeddingSet::new(image_id, 40.0, vec![embedding])
}

// --- In-process mock --------------------------------------------------------

/// Deterministic in-process provider for development runs and tests: the
/// embedding is derived from the image id, so repeated runs agree without an
/// external engine.
pub struct MockProvider {
    pub dimensions: usize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

fn id_seed(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn extract(&self, image: &ArchiveImage) -> Result<ImageEmbeddingSet, ProviderError> {
        let mut rng = StdRng::seed_from_u64(id_seed(&image.id));
        let vector: Vec<f32> = (0..self.dimensions)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        let quality = rng.gen_range(55.0..95.0);
        let embedding = FaceEmbedding::new(vector, FaceRegion::new(8.0, 8.0, 96.0, 96.0));
        Ok(ImageEmbeddingSet::new(image.id.clone(), quality, vec![embedding]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_extraction_parses_engine_output() {
        let raw = r#"{
            "success": true,
            "face_count": 1,
            "embeddings": [
                {"face_id": 0, "embedding": [0.1, -0.2, 0.3],
                 "region": {"x": 4.0, "y": 5.0, "w": 40.0, "h": 44.0}}
            ]
        }"#;
        let wire: WireExtraction = serde_json::from_str(raw).unwrap();
        assert!(wire.success);
        assert_eq!(wire.embeddings.len(), 1);
        assert_eq!(wire.embeddings[0].embedding, vec![0.1, -0.2, 0.3]);
        // Missing per-face scores default to neutral.
        assert_eq!(wire.embeddings[0].quality, 1.0);
        assert_eq!(wire.embeddings[0].region.w, 40.0);
    }

    #[test]
    fn wire_extraction_carries_error() {
        let raw = r#"{"success": false, "error": "NumPy not installed"}"#;
        let wire: WireExtraction = serde_json::from_str(raw).unwrap();
        assert!(!wire.success);
        assert_eq!(wire.error.as_deref(), Some("NumPy not installed"));
    }

    #[test]
    fn fallback_extraction_sits_below_quality_gate() {
        let set = fallback_extraction("img-1", 128);
        assert!(set.quality_score < facepick_match::MatchPolicy::default().candidate_quality_min);
        assert_eq!(set.embeddings.len(), 1);
        // Deterministic per image id.
        assert_eq!(
            set.embeddings[0].vector,
            fallback_extraction("img-1", 128).embeddings[0].vector
        );
    }
}
