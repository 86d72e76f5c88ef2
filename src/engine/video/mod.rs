use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

mod ffmpeg;
mod sampler;

pub use ffmpeg::FfmpegTranscoder;
pub use sampler::{FramePlan, FrameSampler};
pub(crate) use sampler::estimate_metadata;

/// Dimensions assumed when the container cannot be probed.
pub const FALLBACK_DIMENSIONS: (u32, u32) = (1920, 1080);

/// Stream properties reported by the probe tool, or estimated when probing fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub fps: f64,
    pub frame_count: u64,
    pub has_audio: bool,
    /// Set when the values come from heuristics rather than the probe tool.
    pub estimated: bool,
}

/// Evenly spaced still selection handed to the transcode tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSelection {
    pub interval_frames: u64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampledFrame {
    pub index: u32,
    pub timestamp_seconds: f64,
    pub path: PathBuf,
}

/// Subprocess boundary for probing, frame extraction and filtered re-encoding.
#[automock]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, video_ref: &str) -> Result<VideoMetadata, EngineError>;

    /// Writes `selection.count` stills into `output_dir` and returns their
    /// paths in presentation order.
    async fn extract_frames(
        &self,
        video_ref: &str,
        selection: &FrameSelection,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, EngineError>;

    /// Re-encodes the video through `filter_graph`, copying audio unchanged.
    async fn reencode(
        &self,
        video_ref: &str,
        filter_graph: &str,
        output_ref: &str,
        crf: u8,
    ) -> Result<(), EngineError>;
}
