//! Frame-sampled watermark detection and asynchronous watermark removal
//! for video files, driven through ffmpeg.

pub mod engine;
pub mod types;

pub use engine::config::{ConfigManager, EngineConfig};
pub use engine::error::EngineError;
pub use engine::WatermarkEngine;
pub use types::{
    BoundingBox, DetectionOptions, DetectionResult, DetectionStatus, ProcessingTimeClass,
    QualityAssessment, RemovalJob, RemovalMethod, RemovalOptions, RemovalStatus, ResourceEstimate,
    WatermarkCandidate, WatermarkType,
};
