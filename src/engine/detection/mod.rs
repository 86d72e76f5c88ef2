use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

mod confidence;
mod dedup;
mod profiles;
mod regions;

pub use confidence::aggregate_confidence;
pub use dedup::WatermarkDeduplicator;
pub use profiles::{WatermarkTypeProfile, WatermarkTypeProfiles};
pub use regions::{
    candidate_regions, CandidateRegion, FrameInspector, ImageInspector, NoPixelAccess, PixelSource,
    RegionHeuristicDetector, RegionKind, RegionScore,
};
pub(crate) use regions::round2;

use crate::engine::config::DetectionConfig;
use crate::engine::error::EngineError;
use crate::engine::video::{FrameSampler, SampledFrame, Transcoder, VideoMetadata};
use crate::types::{
    DetectionOptions, DetectionResult, DetectionSource, DetectionStatus, FrameAnalysisSummary,
    WatermarkCandidate,
};

/// What the fallback pipeline produced for one video.
enum Analysis {
    Frames {
        per_frame: Vec<Vec<WatermarkCandidate>>,
        analyzed: u32,
    },
    Fallback {
        source: DetectionSource,
        candidate: WatermarkCandidate,
        reason: String,
    },
}

/// Runs sampling, per-frame scoring, deduplication and aggregation.
///
/// Fallback order: frame analysis, then the fixed default region when
/// frames cannot be extracted, then the static candidate when pixels
/// cannot be inspected. Only setup problems (bad input, no scratch space)
/// produce a failed result.
pub struct DetectionEngine {
    config: DetectionConfig,
    sampler: FrameSampler,
    detector: Arc<RegionHeuristicDetector>,
    inspector: Arc<dyn FrameInspector>,
    deduplicator: WatermarkDeduplicator,
}

impl DetectionEngine {
    pub fn new(
        config: &DetectionConfig,
        transcoder: Arc<dyn Transcoder>,
        inspector: Arc<dyn FrameInspector>,
        profiles: Arc<WatermarkTypeProfiles>,
    ) -> Self {
        Self {
            config: config.clone(),
            sampler: FrameSampler::new(transcoder, config),
            detector: Arc::new(RegionHeuristicDetector::new(config, profiles)),
            inspector,
            deduplicator: WatermarkDeduplicator::new(config.merge_overlap_threshold),
        }
    }

    #[instrument(skip(self, options), fields(sample_count = ?options.sample_count))]
    pub async fn detect(&self, video_ref: &str, options: &DetectionOptions) -> DetectionResult {
        let started = Instant::now();
        let detection_id = Uuid::new_v4().to_string();

        if video_ref.trim().is_empty() {
            warn!("rejecting detection for empty video reference");
            return DetectionResult::failed(detection_id, video_ref, "video reference is empty");
        }

        let metadata = self.sampler.probe(video_ref).await;
        let plan = self.sampler.plan(&metadata, options.sample_count);

        let scratch = match self.scratch_dir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(video_ref, error = %e, "cannot create scratch directory");
                return DetectionResult::failed(detection_id, video_ref, e.to_string());
            }
        };

        let mut summary = FrameAnalysisSummary {
            frames_requested: plan.sample_count,
            total_frames: plan.total_frames,
            duration_seconds: metadata.duration_seconds,
            width: metadata.width,
            height: metadata.height,
            metadata_estimated: metadata.estimated,
            ..FrameAnalysisSummary::default()
        };

        let analysis = match self.sampler.extract(video_ref, &plan, scratch.path()).await {
            Ok(frames) => {
                summary.frames_sampled = frames.len() as u32;
                match self.analyze_frames(frames, &metadata).await {
                    Ok(analysis) => analysis,
                    Err(e) => {
                        warn!(video_ref, error = %e, "frame analysis aborted");
                        return DetectionResult::failed(detection_id, video_ref, e.to_string());
                    }
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(video_ref, step = "extract", error = %e, "falling back to default region");
                self.default_region(&metadata, e)
            }
            Err(e) => {
                warn!(video_ref, step = "extract", error = %e, "frame extraction aborted");
                return DetectionResult::failed(detection_id, video_ref, e.to_string());
            }
        };

        let candidates = match analysis {
            Analysis::Frames { per_frame, analyzed } => {
                summary.frames_analyzed = analyzed;
                summary.raw_candidates = per_frame.iter().map(|f| f.len() as u32).sum();
                summary.source = Some(DetectionSource::FrameAnalysis);
                self.deduplicator.deduplicate(per_frame)
            }
            Analysis::Fallback { source, candidate, reason } => {
                summary.raw_candidates = 1;
                summary.source = Some(source);
                summary.fallback_reason = Some(reason);
                vec![candidate]
            }
        };

        let aggregate = aggregate_confidence(&candidates);
        info!(
            video_ref,
            candidates = candidates.len(),
            aggregate_confidence = aggregate,
            source = ?summary.source,
            "detection finished"
        );

        DetectionResult {
            detection_id,
            video_ref: video_ref.to_string(),
            status: DetectionStatus::Completed,
            candidates,
            aggregate_confidence: aggregate,
            frame_analysis: summary,
            error: None,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("watermark-frames-");
        let dir = match &self.config.scratch_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn default_region(&self, metadata: &VideoMetadata, cause: EngineError) -> Analysis {
        Analysis::Fallback {
            source: DetectionSource::DefaultRegion,
            candidate: self.detector.default_region(metadata.width, metadata.height),
            reason: cause.to_string(),
        }
    }

    /// Scores every frame on the blocking pool, frames in parallel. When no
    /// extracted still can be decoded the extraction counts as failed.
    async fn analyze_frames(
        &self,
        frames: Vec<SampledFrame>,
        metadata: &VideoMetadata,
    ) -> Result<Analysis, EngineError> {
        let detector = Arc::clone(&self.detector);
        let inspector = Arc::clone(&self.inspector);

        let outcomes = tokio::task::spawn_blocking(move || {
            frames
                .par_iter()
                .map(|frame| -> Result<Vec<WatermarkCandidate>, EngineError> {
                    let pixels = inspector.open(&frame.path)?;
                    Ok(detector.detect_frame(pixels.as_ref(), frame.index))
                })
                .collect::<Vec<Result<Vec<WatermarkCandidate>, EngineError>>>()
        })
        .await
        .map_err(|e| EngineError::Io(format!("frame analysis task failed: {}", e)))?;

        if let Some(reason) = outcomes.iter().find_map(|o| match o {
            Err(EngineError::MissingCapability(reason)) => Some(reason.clone()),
            _ => None,
        }) {
            warn!(reason = %reason, "pixel inspection unavailable, using static candidate");
            return Ok(Analysis::Fallback {
                source: DetectionSource::StaticFallback,
                candidate: self.detector.static_fallback(),
                reason,
            });
        }

        let sampled = outcomes.len();
        let mut per_frame = Vec::with_capacity(sampled);
        let mut last_error = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(candidates) => {
                    debug!(frame = index, candidates = candidates.len(), "frame scored");
                    per_frame.push(candidates);
                }
                Err(e) => {
                    warn!(frame = index, error = %e, "skipping unreadable frame");
                    last_error = Some(e);
                }
            }
        }

        if per_frame.is_empty() && sampled > 0 {
            let cause = EngineError::extraction(format!(
                "none of {} extracted frames could be decoded: {}",
                sampled,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ));
            warn!(error = %cause, "falling back to default region");
            return Ok(self.default_region(metadata, cause));
        }

        let analyzed = per_frame.len() as u32;
        Ok(Analysis::Frames { per_frame, analyzed })
    }
}
