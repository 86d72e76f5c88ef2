use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkType {
    Logo,
    Text,
    Brand,
    Channel,
}

impl fmt::Display for WatermarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkType::Logo => write!(f, "logo"),
            WatermarkType::Text => write!(f, "text"),
            WatermarkType::Brand => write!(f, "brand"),
            WatermarkType::Channel => write!(f, "channel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalDifficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for RemovalDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalDifficulty::Easy => write!(f, "easy"),
            RemovalDifficulty::Medium => write!(f, "medium"),
            RemovalDifficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Axis-aligned box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> u64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0;
        }

        u64::from(x2 - x1) * u64::from(y2 - y1)
    }

    /// Intersection divided by the smaller of the two areas.
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f64 {
        let min_area = self.area().min(other.area());
        if min_area == 0 {
            return 0.0;
        }
        self.intersection_area(other) as f64 / min_area as f64
    }

    /// Shrinks the box so it lies inside a `frame_width` x `frame_height` frame.
    /// Degenerate results keep at least one pixel in each dimension.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let max_x = frame_width.saturating_sub(1);
        let max_y = frame_height.saturating_sub(1);
        let x = self.x.min(max_x);
        let y = self.y.min(max_y);
        let width = self.width.min(frame_width.saturating_sub(x)).max(1);
        let height = self.height.min(frame_height.saturating_sub(y)).max(1);
        BoundingBox { x, y, width, height }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkCandidate {
    pub id: String,
    #[serde(rename = "type")]
    pub watermark_type: WatermarkType,
    pub confidence: f64,
    pub location: BoundingBox,
    pub temporal_consistency: f64,
    pub removal_difficulty: RemovalDifficulty,
    pub frames_detected: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Completed,
    Failed,
}

/// Stage of the detection fallback pipeline that produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    FrameAnalysis,
    DefaultRegion,
    StaticFallback,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAnalysisSummary {
    pub frames_requested: u32,
    pub frames_sampled: u32,
    pub frames_analyzed: u32,
    pub raw_candidates: u32,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub metadata_estimated: bool,
    pub source: Option<DetectionSource>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub detection_id: String,
    pub video_ref: String,
    pub status: DetectionStatus,
    pub candidates: Vec<WatermarkCandidate>,
    pub aggregate_confidence: f64,
    pub frame_analysis: FrameAnalysisSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

impl DetectionResult {
    pub fn failed(detection_id: String, video_ref: &str, error: impl Into<String>) -> Self {
        Self {
            detection_id,
            video_ref: video_ref.to_string(),
            status: DetectionStatus::Failed,
            candidates: Vec::new(),
            aggregate_confidence: 0.0,
            frame_analysis: FrameAnalysisSummary::default(),
            error: Some(error.into()),
            processing_time_ms: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DetectionStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMethod {
    Inpainting,
    TemporalCoherence,
    ContentAware,
    FrequencyDomain,
}

impl RemovalMethod {
    pub const ALL: [RemovalMethod; 4] = [
        RemovalMethod::Inpainting,
        RemovalMethod::TemporalCoherence,
        RemovalMethod::ContentAware,
        RemovalMethod::FrequencyDomain,
    ];
}

impl fmt::Display for RemovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalMethod::Inpainting => write!(f, "inpainting"),
            RemovalMethod::TemporalCoherence => write!(f, "temporal_coherence"),
            RemovalMethod::ContentAware => write!(f, "content_aware"),
            RemovalMethod::FrequencyDomain => write!(f, "frequency_domain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStatus {
    Initialization,
    Preprocessing,
    Processing,
    Completed,
    Failed,
}

impl RemovalStatus {
    /// Progress percentage pinned to each step boundary. A failed job keeps
    /// whatever percentage it had reached.
    pub fn percentage(&self) -> u8 {
        match self {
            RemovalStatus::Initialization | RemovalStatus::Failed => 0,
            RemovalStatus::Preprocessing => 20,
            RemovalStatus::Processing => 60,
            RemovalStatus::Completed => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemovalStatus::Completed | RemovalStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            RemovalStatus::Initialization => 0,
            RemovalStatus::Preprocessing => 1,
            RemovalStatus::Processing => 2,
            RemovalStatus::Completed | RemovalStatus::Failed => 3,
        }
    }

    pub fn can_transition_to(&self, next: RemovalStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RemovalStatus::Failed => true,
            RemovalStatus::Completed => *self == RemovalStatus::Processing,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for RemovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalStatus::Initialization => write!(f, "initialization"),
            RemovalStatus::Preprocessing => write!(f, "preprocessing"),
            RemovalStatus::Processing => write!(f, "processing"),
            RemovalStatus::Completed => write!(f, "completed"),
            RemovalStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalProgress {
    pub current_step: String,
    pub percentage: u8,
    pub frames_processed: u64,
    pub total_frames: u64,
    pub estimated_time_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingTimeClass {
    Fast,
    Moderate,
    Slow,
    VerySlow,
}

impl fmt::Display for ProcessingTimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingTimeClass::Fast => write!(f, "fast"),
            ProcessingTimeClass::Moderate => write!(f, "moderate"),
            ProcessingTimeClass::Slow => write!(f, "slow"),
            ProcessingTimeClass::VerySlow => write!(f, "very_slow"),
        }
    }
}

/// Advisory numbers attached to a finished job. Nothing enforces them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEstimate {
    pub estimated_seconds: u64,
    pub recommended_batch_size: u32,
    pub recommended_workers: u32,
    pub estimated_memory_mb: u64,
    /// Declared accuracy of the selected method, when it has a profile.
    pub expected_accuracy_percent: Option<f64>,
    pub time_class: Option<ProcessingTimeClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalResults {
    pub output_ref: String,
    pub processing_time_seconds: f64,
    pub watermarks_removed: usize,
    pub filter_graph: String,
    pub resource_estimate: ResourceEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub artifact_score: f64,
    pub consistency_score: f64,
    pub notes: Vec<String>,
}

impl QualityAssessment {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            overall_score: 0.0,
            artifact_score: 0.0,
            consistency_score: 0.0,
            notes: vec![format!("quality assessment unavailable: {}", reason.into())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalJob {
    pub removal_id: String,
    pub video_ref: String,
    pub status: RemovalStatus,
    pub selected_method: RemovalMethod,
    pub watermarks: Vec<WatermarkCandidate>,
    pub progress: RemovalProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<RemovalResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_assessment: Option<QualityAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemovalJob {
    pub fn new(
        removal_id: String,
        video_ref: &str,
        selected_method: RemovalMethod,
        watermarks: Vec<WatermarkCandidate>,
    ) -> Self {
        let now = Utc::now();
        Self {
            removal_id,
            video_ref: video_ref.to_string(),
            status: RemovalStatus::Initialization,
            selected_method,
            watermarks,
            progress: RemovalProgress {
                current_step: "Queued for processing".to_string(),
                percentage: RemovalStatus::Initialization.percentage(),
                frames_processed: 0,
                total_frames: 0,
                estimated_time_seconds: 0,
            },
            results: None,
            quality_assessment: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the job to a non-terminal step. Percentage never goes backwards.
    pub fn advance(
        &mut self,
        next: RemovalStatus,
        step: impl Into<String>,
    ) -> Result<(), EngineError> {
        if next.is_terminal() {
            return Err(EngineError::invalid_transition(self.status, next));
        }
        self.transition(next)?;
        self.progress.current_step = step.into();
        Ok(())
    }

    pub fn complete(
        &mut self,
        results: RemovalResults,
        quality: QualityAssessment,
    ) -> Result<(), EngineError> {
        self.transition(RemovalStatus::Completed)?;
        self.progress.current_step = "Completed".to_string();
        self.progress.frames_processed = self.progress.total_frames;
        self.progress.estimated_time_seconds = 0;
        self.results = Some(results);
        self.quality_assessment = Some(quality);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
        self.transition(RemovalStatus::Failed)?;
        self.progress.current_step = "Failed".to_string();
        self.error = Some(message.into());
        Ok(())
    }

    fn transition(&mut self, next: RemovalStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::invalid_transition(self.status, next));
        }
        self.status = next;
        self.progress.percentage = self.progress.percentage.max(next.percentage());
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Knobs for a single `detect` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionOptions {
    pub sample_count: Option<u32>,
}

/// Knobs for a single `remove` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalOptions {
    /// Overrides the confidence-based method selection.
    pub method: Option<RemovalMethod>,
    pub output_ref: Option<String>,
    pub crf: Option<u8>,
}
