//! Pipeline orchestration: reference-set building and validation, the
//! concurrent archive scan, delivery through the output sink, and the direct
//! pool-ranking flow.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use facepick_match::{
    cluster, match_candidate, rank_pool, select_best, FaceEmbedding, ImageEmbeddingSet,
    MatchCandidate, MatchPolicy, PoolEntry, RankedPhoto,
};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::health::EngineHealth;
use crate::provider::{fallback_extraction, ArchiveImage, EmbeddingProvider, ImageSource, OutputSink};

/// Why a customer-submitted reference image was refused. These are the only
/// inputs the customer can fix, so every variant carries an actionable
/// message (English plus Vietnamese, matching the product's audience).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReferenceRejection {
    #[error("{image}: no face detected (không tìm thấy khuôn mặt trong ảnh)")]
    NoFaceDetected { image: String },
    #[error("{image}: image quality too low, {quality:.0}/100 (chất lượng ảnh quá thấp)")]
    QualityTooLow { image: String, quality: f32 },
    #[error("{image}: {count} faces found, use a single-person photo (quá nhiều khuôn mặt, hãy dùng ảnh một người)")]
    TooManyFaces { image: String, count: usize },
}

/// Knobs for one run. Built from `Config`; owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub customer: String,
    pub best_limit: usize,
    pub pool_limit: usize,
    pub workers: usize,
    pub attempts: u32,
    pub fallback_after: u32,
    pub policy: MatchPolicy,
}

impl RunOptions {
    pub fn from_config(customer: impl Into<String>, cfg: &crate::config::Config) -> Self {
        Self {
            customer: customer.into(),
            best_limit: cfg.best_limit,
            pool_limit: cfg.pool_limit,
            workers: cfg.workers.max(1),
            attempts: cfg.attempts.max(1),
            fallback_after: 3,
            policy: cfg.policy.clone(),
        }
    }
}

/// Batch-level summary reported to the caller and logged at completion.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub scanned: usize,
    pub matched: usize,
    pub selected: usize,
    pub extraction_failures: usize,
    pub copy_failures: usize,
    pub folder_url: Option<String>,
}

/// One accepted reference face, still tied to the photo it came from so
/// enrollment can name its source.
#[derive(Debug, Clone)]
pub struct ReferenceFace {
    pub image_name: String,
    pub embedding: FaceEmbedding,
}

/// Extract, validate and reduce the customer's reference images.
///
/// Rejections are collected, not fatal: one good reference photo among bad
/// ones still yields a usable set. The caller decides whether an empty set
/// ends the run.
pub async fn build_reference_set(
    provider: &dyn EmbeddingProvider,
    images: &[ArchiveImage],
    policy: &MatchPolicy,
) -> Result<(Vec<ReferenceFace>, Vec<ReferenceRejection>)> {
    let mut reference = Vec::new();
    let mut rejections = Vec::new();

    for image in images {
        let set = provider
            .extract(image)
            .await
            .with_context(|| format!("extracting reference image {}", image.name))?;

        if set.quality_score < policy.reference_quality_min {
            rejections.push(ReferenceRejection::QualityTooLow {
                image: image.name.clone(),
                quality: set.quality_score,
            });
            continue;
        }
        if set.face_count > policy.reference_max_faces {
            rejections.push(ReferenceRejection::TooManyFaces {
                image: image.name.clone(),
                count: set.face_count,
            });
            continue;
        }
        match cluster::canonical_embedding(set.embeddings, policy) {
            Some(embedding) => reference.push(ReferenceFace {
                image_name: image.name.clone(),
                embedding,
            }),
            // Covers both zero detections and "everything filtered out".
            None => rejections.push(ReferenceRejection::NoFaceDetected {
                image: image.name.clone(),
            }),
        }
    }

    for rejection in &rejections {
        info!("reference rejected: {rejection}");
    }
    Ok((reference, rejections))
}

enum TaskOutcome {
    Matched(MatchCandidate),
    NoMatch,
    Failed,
    Cancelled,
}

/// Result of scanning the archive, before selection and delivery.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<MatchCandidate>,
    pub scanned: usize,
    pub extraction_failures: usize,
}

// A poisoned lock only means a worker panicked mid-update; the counters are
// still usable.
fn lock_health(health: &Mutex<EngineHealth>) -> std::sync::MutexGuard<'_, EngineHealth> {
    health.lock().unwrap_or_else(|e| e.into_inner())
}

async fn extract_with_retry(
    provider: &dyn EmbeddingProvider,
    image: &ArchiveImage,
    attempts: u32,
    health: &Mutex<EngineHealth>,
) -> Option<ImageEmbeddingSet> {
    for attempt in 1..=attempts {
        if lock_health(health).degraded() {
            warn!(
                "engine degraded; using conservative placeholder extraction for {}",
                image.name
            );
            return Some(fallback_extraction(&image.id, 128));
        }
        match provider.extract(image).await {
            Ok(set) => {
                lock_health(health).record_success();
                return Some(set);
            }
            Err(e) => {
                lock_health(health).record_failure();
                warn!(
                    "extracting {} (attempt {attempt}/{attempts}): {e}",
                    image.name
                );
            }
        }
    }
    // Three strikes: the image is permanently skipped for this run.
    None
}

async fn process_image(
    provider: Arc<dyn EmbeddingProvider>,
    image: ArchiveImage,
    reference: Arc<Vec<FaceEmbedding>>,
    policy: MatchPolicy,
    attempts: u32,
    health: Arc<Mutex<EngineHealth>>,
) -> TaskOutcome {
    let Some(set) = extract_with_retry(provider.as_ref(), &image, attempts, &health).await else {
        return TaskOutcome::Failed;
    };
    let quality = set.quality_score;
    let Some(face) = cluster::canonical_embedding(set.embeddings, &policy) else {
        // No usable face is a skip, not an error.
        debug!("no usable face in {}", image.name);
        return TaskOutcome::NoMatch;
    };
    let decision = match_candidate(&reference, std::slice::from_ref(&face), quality, &policy);
    if decision.is_match {
        debug!(
            "{} matched: combined {:.3}, similarity {:.3}",
            image.name, decision.combined_score, decision.best_similarity
        );
        TaskOutcome::Matched(MatchCandidate::from_decision(image.id, &decision))
    } else {
        if let Some(reason) = &decision.reject_reason {
            debug!("{} rejected: {reason}", image.name);
        }
        TaskOutcome::NoMatch
    }
}

/// Scan the archive against the reference set with a bounded worker pool.
///
/// Images are independent units of work; results accumulate by post-join
/// merge, and final ordering comes from the selection sort, so worker
/// completion order never matters. Cancelling the token aborts in-flight
/// work promptly.
pub async fn scan_archive(
    provider: Arc<dyn EmbeddingProvider>,
    source: &mut dyn ImageSource,
    reference: Arc<Vec<FaceEmbedding>>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let health = Arc::new(Mutex::new(EngineHealth::new(options.fallback_after)));
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
    let mut drained = false;

    loop {
        if cancel.is_cancelled() {
            tasks.abort_all();
            break;
        }

        while !drained && tasks.len() < options.workers {
            match source.next_image().await? {
                Some(image) => {
                    outcome.scanned += 1;
                    let provider = provider.clone();
                    let reference = reference.clone();
                    let policy = options.policy.clone();
                    let health = health.clone();
                    let attempts = options.attempts;
                    let cancel = cancel.clone();
                    tasks.spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => TaskOutcome::Cancelled,
                            out = process_image(provider, image, reference, policy, attempts, health) => out,
                        }
                    });
                }
                None => {
                    drained = true;
                    break;
                }
            }
        }

        match tasks.join_next().await {
            Some(Ok(TaskOutcome::Matched(candidate))) => outcome.candidates.push(candidate),
            Some(Ok(TaskOutcome::NoMatch)) => {}
            Some(Ok(TaskOutcome::Failed)) => outcome.extraction_failures += 1,
            Some(Ok(TaskOutcome::Cancelled)) => {}
            Some(Err(e)) if e.is_cancelled() => {}
            Some(Err(e)) => return Err(e).context("archive worker panicked"),
            None => break, // drained and no tasks left
        }
    }

    Ok(outcome)
}

/// Copy the matched and best candidates into a fresh delivery folder tree
/// and take a shareable link on the parent. Sink failures never abort the
/// run: a failed folder creation counts every copy it would have held as
/// failed, a failed copy skips that file, and the report carries the totals.
pub async fn deliver(
    sink: &dyn OutputSink,
    customer: &str,
    all_matches: &[MatchCandidate],
    best: &[MatchCandidate],
) -> (Option<String>, usize) {
    let run_id = uuid::Uuid::new_v4().to_string();
    let parent = match sink
        .create_folder(&format!("{customer} {}", &run_id[..8]), None)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!("creating delivery folder failed: {e}");
            return (None, all_matches.len() + best.len());
        }
    };

    let mut copy_failures = 0usize;
    for (candidates, name) in [(all_matches, "all-matches"), (best, "best")] {
        let folder = match sink.create_folder(name, Some(&parent)).await {
            Ok(id) => id,
            Err(e) => {
                warn!("creating {name} folder failed: {e}");
                copy_failures += candidates.len();
                continue;
            }
        };
        for candidate in candidates {
            if let Err(e) = sink.copy(&candidate.image_id, &folder).await {
                warn!("copying {} failed: {e}", candidate.image_id);
                copy_failures += 1;
            }
        }
    }

    let url = match sink.set_public_permission(&parent).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("sharing delivery folder failed: {e}");
            None
        }
    };
    (url, copy_failures)
}

/// The full archive flow: scan, select the best subset, deliver both lists.
pub async fn run_archive(
    provider: Arc<dyn EmbeddingProvider>,
    source: &mut dyn ImageSource,
    sink: &dyn OutputSink,
    reference: Vec<FaceEmbedding>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    anyhow::ensure!(
        !reference.is_empty(),
        "no usable reference faces; enroll at least one good photo"
    );

    let reference = Arc::new(reference);
    let scan = scan_archive(provider, source, reference, options, cancel).await?;
    let best = select_best(&scan.candidates, options.best_limit);

    let (folder_url, copy_failures) = if scan.candidates.is_empty() {
        (None, 0)
    } else {
        deliver(sink, &options.customer, &scan.candidates, &best).await
    };

    let report = RunReport {
        scanned: scan.scanned,
        matched: scan.candidates.len(),
        selected: best.len(),
        extraction_failures: scan.extraction_failures,
        copy_failures,
        folder_url,
    };
    info!(
        "run complete: {} scanned, {} matched, {} selected, {} extraction failures, {} copy failures",
        report.scanned, report.matched, report.selected, report.extraction_failures,
        report.copy_failures
    );
    Ok(report)
}

/// Rank a fixed pool of images with no single reference: pairwise ensemble
/// similarity supplies the duplicate and similarity-confidence signals.
pub async fn rank_pool_images(
    provider: Arc<dyn EmbeddingProvider>,
    images: &[ArchiveImage],
    options: &RunOptions,
) -> Result<Vec<RankedPhoto>> {
    let health = Mutex::new(EngineHealth::new(options.fallback_after));
    let policy = &options.policy;

    struct PoolImage {
        id: String,
        quality: f32,
        face: Option<FaceEmbedding>,
    }

    let mut pool = Vec::with_capacity(images.len());
    for image in images {
        let Some(set) =
            extract_with_retry(provider.as_ref(), image, options.attempts, &health).await
        else {
            warn!("skipping {} after repeated engine failures", image.name);
            continue;
        };
        let quality = set.quality_score;
        let face = cluster::canonical_embedding(set.embeddings, policy);
        pool.push(PoolImage {
            id: image.id.clone(),
            quality,
            face,
        });
    }

    let entries: Vec<PoolEntry> = pool
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let mut best_sim_conf = 0.0f32;
            let mut duplicates = 0usize;
            if let Some(face) = &img.face {
                for (j, other) in pool.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let Some(other_face) = &other.face else { continue };
                    let score = facepick_match::ensemble_similarity(
                        &face.vector,
                        &other_face.vector,
                        policy,
                    );
                    best_sim_conf = best_sim_conf.max(score.similarity * score.confidence);
                    if score.similarity > policy.pair_similarity_min
                        && score.confidence > policy.pair_confidence_min
                    {
                        duplicates += 1;
                    }
                }
            }
            PoolEntry {
                image_id: img.id.clone(),
                quality_score: img.quality,
                similarity_confidence: best_sim_conf,
                duplicate_count: duplicates,
                face_detected: img.face.is_some(),
            }
        })
        .collect();

    Ok(rank_pool(&entries, options.pool_limit))
}
