use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::{FrameSelection, SampledFrame, Transcoder, VideoMetadata, FALLBACK_DIMENSIONS};
use crate::engine::config::DetectionConfig;
use crate::engine::error::EngineError;

/// Duration assumed when neither the probe nor the file size tells us anything.
const UNKNOWN_DURATION_SECS: f64 = 30.0;

/// How many stills to pull and how far apart they are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub total_frames: u64,
    pub sample_count: u32,
    pub interval_frames: u64,
    pub fps: f64,
}

impl FramePlan {
    pub fn selection(&self) -> FrameSelection {
        FrameSelection {
            interval_frames: self.interval_frames,
            count: self.sample_count,
        }
    }

    pub fn timestamp_of(&self, index: u32) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        (u64::from(index) * self.interval_frames) as f64 / self.fps
    }
}

/// Rough average bitrate (bits/s) per container, used to turn a file size into a duration.
fn container_bitrate(video_ref: &str) -> f64 {
    let ext = Path::new(video_ref)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("webm") => 2_500_000.0,
        Some("mov") => 10_000_000.0,
        Some("mkv") | Some("avi") => 8_000_000.0,
        Some("ts") | Some("m2ts") => 12_000_000.0,
        _ => 5_000_000.0,
    }
}

/// Metadata guess from the file size and container type.
pub(crate) fn estimate_metadata(video_ref: &str, assumed_fps: f64) -> VideoMetadata {
    let duration_seconds = match std::fs::metadata(video_ref) {
        Ok(meta) if meta.len() > 0 => {
            (meta.len() as f64 * 8.0 / container_bitrate(video_ref)).max(1.0)
        }
        _ => UNKNOWN_DURATION_SECS,
    };
    let (width, height) = FALLBACK_DIMENSIONS;
    VideoMetadata {
        width,
        height,
        duration_seconds,
        fps: assumed_fps,
        frame_count: (duration_seconds * assumed_fps).round() as u64,
        has_audio: true,
        estimated: true,
    }
}

pub struct FrameSampler {
    transcoder: Arc<dyn Transcoder>,
    config: DetectionConfig,
}

impl FrameSampler {
    pub fn new(transcoder: Arc<dyn Transcoder>, config: &DetectionConfig) -> Self {
        Self {
            transcoder,
            config: config.clone(),
        }
    }

    /// Probes the stream, estimating from file size when the probe fails.
    #[instrument(skip(self))]
    pub async fn probe(&self, video_ref: &str) -> VideoMetadata {
        match self.transcoder.probe(video_ref).await {
            Ok(mut meta) => {
                if meta.frame_count == 0 {
                    let fps = if meta.fps > 0.0 { meta.fps } else { self.config.assumed_fps };
                    meta.frame_count = (meta.duration_seconds * fps).round() as u64;
                }
                meta
            }
            Err(e) => {
                warn!(video_ref, error = %e, "probe failed, estimating metadata");
                estimate_metadata(video_ref, self.config.assumed_fps)
            }
        }
    }

    pub fn plan(&self, metadata: &VideoMetadata, requested: Option<u32>) -> FramePlan {
        let min = self.config.min_samples;
        let max = self.config.max_samples.max(min);
        let wanted = requested.unwrap_or_else(|| {
            (metadata.duration_seconds / self.config.seconds_per_sample).ceil() as u32
        });
        let sample_count = wanted.clamp(min, max);

        let fps = if metadata.fps > 0.0 { metadata.fps } else { self.config.assumed_fps };
        let total_frames = if metadata.frame_count > 0 {
            metadata.frame_count
        } else {
            (metadata.duration_seconds * fps).round() as u64
        };
        let interval_frames = (total_frames / u64::from(sample_count)).max(1);

        FramePlan {
            total_frames,
            sample_count,
            interval_frames,
            fps,
        }
    }

    /// Extracts the planned stills into `scratch_dir`. Any tool failure or
    /// timeout comes back as [`EngineError::Extraction`].
    #[instrument(skip(self, plan, scratch_dir))]
    pub async fn extract(
        &self,
        video_ref: &str,
        plan: &FramePlan,
        scratch_dir: &Path,
    ) -> Result<Vec<SampledFrame>, EngineError> {
        let selection = plan.selection();
        let extraction = self.transcoder.extract_frames(video_ref, &selection, scratch_dir);
        let paths = match tokio::time::timeout(self.config.extraction_timeout(), extraction).await {
            Ok(result) => result.map_err(|e| match e {
                EngineError::Extraction(_) => e,
                other => EngineError::extraction(other),
            })?,
            Err(_) => {
                return Err(EngineError::extraction(format!(
                    "frame extraction timed out after {}s",
                    self.config.extraction_timeout_secs
                )))
            }
        };

        debug!(count = paths.len(), "frames extracted");
        Ok(paths
            .into_iter()
            .take(plan.sample_count as usize)
            .enumerate()
            .map(|(i, path)| SampledFrame {
                index: i as u32,
                timestamp_seconds: plan.timestamp_of(i as u32),
                path,
            })
            .collect())
    }
}
