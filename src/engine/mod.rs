//! Watermark detection and removal engine.
//!
//! [`WatermarkEngine`] is the entry point: `detect` samples frames and scores
//! candidate regions, `remove` schedules a filtered re-encode and returns
//! immediately, `get_progress` reads the job record back.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub mod config;
pub mod detection;
pub mod error;
pub mod jobs;
pub mod reconstruction;
pub mod video;

use config::EngineConfig;
use detection::{DetectionEngine, FrameInspector, ImageInspector, WatermarkTypeProfiles};
use error::EngineError;
use jobs::{
    get_json, put_json, JobRunner, MemoryProgressStore, ProgressStore, ProgressTracker,
    RemovalRequest,
};
use reconstruction::{
    FrameComparisonAssessor, MethodProfiles, MethodSelector, QualityAssessor, ResourceEstimator,
};
use video::{FfmpegTranscoder, Transcoder};

use crate::types::{
    DetectionOptions, DetectionResult, RemovalJob, RemovalOptions, WatermarkCandidate,
};

pub const DETECTION_KEY_PREFIX: &str = "watermark_detection_";

/// Cache key for a detection request: the video ref and its options hashed together.
pub fn detection_cache_key(video_ref: &str, options: &DetectionOptions) -> String {
    let options_json = serde_json::to_string(options).unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(video_ref.as_bytes());
    hasher.update(&[0]);
    hasher.update(options_json.as_bytes());
    format!("{}{}", DETECTION_KEY_PREFIX, hasher.finalize().to_hex())
}

/// Main engine structure that coordinates detection and removal jobs
pub struct WatermarkEngine {
    config: EngineConfig,
    detection: Arc<DetectionEngine>,
    selector: MethodSelector,
    runner: JobRunner,
    tracker: ProgressTracker,
    store: Arc<dyn ProgressStore>,
}

impl WatermarkEngine {
    /// Engine backed by the ffmpeg tools and an in-process store.
    pub fn new(config: EngineConfig) -> Self {
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::new(&config.tools, &config.detection, &config.removal));
        let assessor: Arc<dyn QualityAssessor> = Arc::new(FrameComparisonAssessor::new(
            Arc::clone(&transcoder),
            &config.removal,
            config.detection.scratch_dir.clone(),
        ));
        Self::with_components(
            config,
            transcoder,
            Arc::new(ImageInspector),
            Arc::new(MemoryProgressStore::new()),
            assessor,
        )
    }

    /// Loads `.env` and `WATERMARK_*` variables, then builds the default engine.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn with_components(
        config: EngineConfig,
        transcoder: Arc<dyn Transcoder>,
        inspector: Arc<dyn FrameInspector>,
        store: Arc<dyn ProgressStore>,
        assessor: Arc<dyn QualityAssessor>,
    ) -> Self {
        let method_profiles = Arc::new(MethodProfiles::default());
        let detection = Arc::new(DetectionEngine::new(
            &config.detection,
            Arc::clone(&transcoder),
            inspector,
            Arc::new(WatermarkTypeProfiles::default()),
        ));
        let tracker = ProgressTracker::new(Arc::clone(&store), config.store.progress_ttl());
        let runner = JobRunner::new(
            &config,
            transcoder,
            tracker.clone(),
            Arc::new(ResourceEstimator::new(Arc::clone(&method_profiles))),
            assessor,
        );

        Self {
            config,
            detection,
            selector: MethodSelector::new(method_profiles),
            runner,
            tracker,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn method_selector(&self) -> &MethodSelector {
        &self.selector
    }

    /// Runs the detection pipeline, serving repeated requests from the cache.
    /// Failures come back as a result with `status = failed`.
    #[instrument(skip(self, options))]
    pub async fn detect(&self, video_ref: &str, options: &DetectionOptions) -> DetectionResult {
        let key = detection_cache_key(video_ref, options);

        match get_json::<DetectionResult>(self.store.as_ref(), &key).await {
            Ok(Some(cached)) => {
                debug!(
                    video_ref,
                    detection_id = %cached.detection_id,
                    "detection served from cache"
                );
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!(video_ref, error = %e, "detection cache read failed"),
        }

        let result = self.detection.detect(video_ref, options).await;

        if result.is_completed() {
            let ttl = self.config.store.detection_cache_ttl();
            if let Err(e) = put_json(self.store.as_ref(), &key, &result, ttl).await {
                warn!(video_ref, error = %e, "detection cache write failed");
            }
        }

        result
    }

    /// Starts a removal job and returns it in its initial state. The method
    /// comes from `options.method` or, when unset, the mean confidence.
    #[instrument(skip(self, watermarks, options), fields(watermarks = watermarks.len()))]
    pub async fn remove(
        &self,
        video_ref: &str,
        watermarks: Vec<WatermarkCandidate>,
        options: &RemovalOptions,
    ) -> RemovalJob {
        let method = options
            .method
            .unwrap_or_else(|| self.selector.select_for(&watermarks));
        let profile = self.selector.profile(method);
        info!(
            video_ref,
            method = %method,
            expected_accuracy = ?profile.map(|p| p.accuracy_percent),
            time_class = ?profile.map(|p| p.time_class),
            "starting removal"
        );

        self.runner
            .submit(RemovalRequest {
                video_ref: video_ref.to_string(),
                watermarks,
                method,
                output_ref: options.output_ref.clone(),
                crf: options.crf,
            })
            .await
    }

    pub async fn get_progress(&self, removal_id: &str) -> Result<RemovalJob, EngineError> {
        self.tracker
            .load(removal_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(removal_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_ref_and_options() {
        let defaults = DetectionOptions::default();
        let five = DetectionOptions { sample_count: Some(5) };

        let a = detection_cache_key("a.mp4", &defaults);
        assert!(a.starts_with(DETECTION_KEY_PREFIX));
        assert_eq!(a, detection_cache_key("a.mp4", &defaults));
        assert_ne!(a, detection_cache_key("b.mp4", &defaults));
        assert_ne!(a, detection_cache_key("a.mp4", &five));
    }

    #[tokio::test]
    async fn test_unknown_removal_id_is_not_found() {
        let engine = WatermarkEngine::new(EngineConfig::default());
        let err = engine.get_progress("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(id) if id == "missing"));
    }
}
