use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::progress::ProgressTracker;
use crate::engine::config::{EngineConfig, RemovalConfig};
use crate::engine::error::EngineError;
use crate::engine::reconstruction::{QualityAssessor, RemovalFilterBuilder, ResourceEstimator};
use crate::engine::video::{estimate_metadata, Transcoder, VideoMetadata};
use crate::types::{
    QualityAssessment, RemovalJob, RemovalMethod, RemovalResults, RemovalStatus, WatermarkCandidate,
};

/// Everything a removal job needs once the method has been chosen.
#[derive(Debug, Clone)]
pub struct RemovalRequest {
    pub video_ref: String,
    pub watermarks: Vec<WatermarkCandidate>,
    pub method: RemovalMethod,
    pub output_ref: Option<String>,
    pub crf: Option<u8>,
}

/// `<dir>/<stem><suffix>.<ext>` next to the input; `.mp4` when the input has
/// no extension.
pub fn default_output_ref(video_ref: &str, suffix: &str) -> String {
    let path = Path::new(video_ref);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    let file_name = format!("{}{}.{}", stem, suffix, ext);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(file_name).to_string_lossy().into_owned()
        }
        _ => file_name,
    }
}

/// Creates removal jobs and drives each one on its own tokio task.
///
/// The spawned task is the only writer for its job id. It overwrites the
/// full record at every state boundary.
#[derive(Clone)]
pub struct JobRunner {
    transcoder: Arc<dyn Transcoder>,
    tracker: ProgressTracker,
    filters: Arc<RemovalFilterBuilder>,
    estimator: Arc<ResourceEstimator>,
    assessor: Arc<dyn QualityAssessor>,
    config: Arc<RemovalConfig>,
    assumed_fps: f64,
}

impl JobRunner {
    pub fn new(
        config: &EngineConfig,
        transcoder: Arc<dyn Transcoder>,
        tracker: ProgressTracker,
        estimator: Arc<ResourceEstimator>,
        assessor: Arc<dyn QualityAssessor>,
    ) -> Self {
        Self {
            transcoder,
            tracker,
            filters: Arc::new(RemovalFilterBuilder::new(&config.removal)),
            estimator,
            assessor,
            config: Arc::new(config.removal.clone()),
            assumed_fps: config.detection.assumed_fps,
        }
    }

    /// Persists a fresh job and schedules its work. Returns the job as it was
    /// at creation, or already failed when it could not be persisted or the
    /// request is unusable. Nothing is scheduled in the failed cases.
    #[instrument(
        skip(self, request),
        fields(video_ref = %request.video_ref, method = %request.method)
    )]
    pub async fn submit(&self, request: RemovalRequest) -> RemovalJob {
        let RemovalRequest {
            video_ref,
            watermarks,
            method,
            output_ref,
            crf,
        } = request;

        let mut job = RemovalJob::new(Uuid::new_v4().to_string(), &video_ref, method, watermarks);

        if video_ref.trim().is_empty() {
            warn!("rejecting removal for empty video reference");
            let reason = EngineError::invalid_input("video reference is empty").to_string();
            if job.fail(reason).is_ok() {
                if let Err(e) = self.tracker.record(&job).await {
                    warn!(
                        removal_id = %job.removal_id,
                        error = %e,
                        "could not record rejected job"
                    );
                }
            }
            return job;
        }

        if let Err(e) = self.tracker.record(&job).await {
            error!(removal_id = %job.removal_id, error = %e, "could not persist new removal job");
            if let Err(fail_err) = job.fail(format!("could not persist removal job: {}", e)) {
                warn!(removal_id = %job.removal_id, error = %fail_err, "could not mark job failed");
            }
            return job;
        }

        let output_ref = output_ref
            .unwrap_or_else(|| default_output_ref(&video_ref, &self.config.output_suffix));
        let crf = crf.unwrap_or(self.config.default_crf);

        info!(removal_id = %job.removal_id, output_ref = %output_ref, "removal job queued");
        let runner = self.clone();
        let snapshot = job.clone();
        tokio::spawn(async move {
            runner.run(snapshot, output_ref, crf).await;
        });

        job
    }

    async fn run(&self, mut job: RemovalJob, output_ref: String, crf: u8) {
        let started = Instant::now();
        let removal_id = job.removal_id.clone();

        match self.execute(&mut job, &output_ref, crf, started).await {
            Ok(()) => info!(
                removal_id = %removal_id,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "removal job completed"
            ),
            Err(e) => {
                error!(
                    removal_id = %removal_id,
                    video_ref = %job.video_ref,
                    method = %job.selected_method,
                    step = %job.status,
                    error = %e,
                    "removal job failed"
                );
                if job.fail(e.to_string()).is_ok() {
                    if let Err(store_err) = self.tracker.record(&job).await {
                        error!(
                            removal_id = %removal_id,
                            error = %store_err,
                            "could not record failed job"
                        );
                    }
                }
            }
        }
    }

    async fn execute(
        &self,
        job: &mut RemovalJob,
        output_ref: &str,
        crf: u8,
        started: Instant,
    ) -> Result<(), EngineError> {
        job.advance(RemovalStatus::Preprocessing, "Analyzing video")?;
        self.tracker.record(job).await?;

        let metadata = self.probe(&job.video_ref).await;
        let directives = self.filters.build(job.selected_method, &job.watermarks);
        let filter_graph = self.filters.render(&directives, metadata.width, metadata.height);
        let estimate = self.estimator.estimate(&metadata, job.selected_method);

        job.progress.total_frames = metadata.frame_count;
        job.progress.estimated_time_seconds = estimate.estimated_seconds;
        job.advance(
            RemovalStatus::Processing,
            format!(
                "Removing {} watermark(s) with {}",
                job.watermarks.len(),
                job.selected_method
            ),
        )?;
        self.tracker.record(job).await?;

        let limit = self.config.reencode_timeout();
        let reencode = self.transcoder.reencode(&job.video_ref, &filter_graph, output_ref, crf);
        match tokio::time::timeout(limit, reencode).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::transcode(format!(
                    "re-encode exceeded {}s",
                    limit.as_secs()
                )))
            }
        }

        let quality = match self.assessor.assess(&job.video_ref, output_ref).await {
            Ok(quality) => quality,
            Err(e) => {
                warn!(removal_id = %job.removal_id, error = %e, "quality assessment unavailable");
                QualityAssessment::unavailable(e.to_string())
            }
        };

        let results = RemovalResults {
            output_ref: output_ref.to_string(),
            processing_time_seconds: started.elapsed().as_secs_f64(),
            watermarks_removed: job.watermarks.len(),
            filter_graph,
            resource_estimate: estimate,
        };
        job.complete(results, quality)?;
        self.tracker.record(job).await
    }

    async fn probe(&self, video_ref: &str) -> VideoMetadata {
        match self.transcoder.probe(video_ref).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    video_ref,
                    step = "probe",
                    error = %e,
                    "using estimated metadata for removal"
                );
                estimate_metadata(video_ref, self.assumed_fps)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::engine::jobs::store::{MemoryProgressStore, MockProgressStore};
    use crate::engine::reconstruction::{MethodProfiles, MockQualityAssessor};
    use crate::engine::video::{FrameSelection, MockTranscoder};

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            width: 1280,
            height: 720,
            duration_seconds: 10.0,
            fps: 25.0,
            frame_count: 250,
            has_audio: true,
            estimated: false,
        }
    }

    fn request(video_ref: &str) -> RemovalRequest {
        RemovalRequest {
            video_ref: video_ref.to_string(),
            watermarks: vec![],
            method: RemovalMethod::FrequencyDomain,
            output_ref: Some("/tmp/out.mp4".to_string()),
            crf: None,
        }
    }

    fn runner(
        transcoder: Arc<dyn Transcoder>,
        tracker: ProgressTracker,
        assessor: MockQualityAssessor,
    ) -> JobRunner {
        let estimator = ResourceEstimator::with_workers(Arc::new(MethodProfiles::default()), 4);
        JobRunner::new(
            &EngineConfig::default(),
            transcoder,
            tracker,
            Arc::new(estimator),
            Arc::new(assessor),
        )
    }

    fn tracker(ttl_secs: u64) -> ProgressTracker {
        ProgressTracker::new(Arc::new(MemoryProgressStore::new()), Duration::from_secs(ttl_secs))
    }

    async fn wait_for_terminal(tracker: &ProgressTracker, removal_id: &str) -> RemovalJob {
        for _ in 0..500 {
            if let Some(job) = tracker.load(removal_id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", removal_id);
    }

    /// Re-encode that never finishes on its own.
    struct StalledTranscoder;

    #[async_trait]
    impl Transcoder for StalledTranscoder {
        async fn probe(&self, _video_ref: &str) -> Result<VideoMetadata, EngineError> {
            Ok(metadata())
        }

        async fn extract_frames(
            &self,
            _video_ref: &str,
            _selection: &FrameSelection,
            _output_dir: &std::path::Path,
        ) -> Result<Vec<PathBuf>, EngineError> {
            Ok(vec![])
        }

        async fn reencode(
            &self,
            _video_ref: &str,
            _graph: &str,
            _output_ref: &str,
            _crf: u8,
        ) -> Result<(), EngineError> {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_completed_job_uses_smoothing_for_empty_list() {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_probe().returning(|_| Ok(metadata()));
        transcoder
            .expect_reencode()
            .withf(|video, graph, output, crf| {
                video == "in.mp4"
                    && graph == "[0:v]hqdn3d=4:3:6:4.5[vout]"
                    && output == "/tmp/out.mp4"
                    && *crf == 18
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let mut assessor = MockQualityAssessor::new();
        assessor.expect_assess().returning(|_, _| {
            Ok(QualityAssessment {
                overall_score: 91.0,
                artifact_score: 97.5,
                consistency_score: 99.0,
                notes: vec![],
            })
        });

        let tracker = tracker(3600);
        let runner = runner(Arc::new(transcoder), tracker.clone(), assessor);

        let job = runner.submit(request("in.mp4")).await;
        assert_eq!(job.status, RemovalStatus::Initialization);
        assert_eq!(job.progress.percentage, 0);

        let done = wait_for_terminal(&tracker, &job.removal_id).await;
        assert_eq!(done.status, RemovalStatus::Completed);
        assert_eq!(done.progress.percentage, 100);
        assert_eq!(done.progress.total_frames, 250);
        let results = done.results.unwrap();
        assert_eq!(results.watermarks_removed, 0);
        assert_eq!(results.output_ref, "/tmp/out.mp4");
        assert_eq!(done.quality_assessment.unwrap().overall_score, 91.0);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_assessment_failure_does_not_fail_job() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_probe()
            .returning(|_| Err(EngineError::probe("ffprobe missing")));
        transcoder.expect_reencode().returning(|_, _, _, _| Ok(()));
        let mut assessor = MockQualityAssessor::new();
        assessor
            .expect_assess()
            .returning(|_, _| Err(EngineError::extraction("no frames")));

        let tracker = tracker(3600);
        let runner = runner(Arc::new(transcoder), tracker.clone(), assessor);

        let job = runner.submit(request("in.mp4")).await;
        let done = wait_for_terminal(&tracker, &job.removal_id).await;

        assert_eq!(done.status, RemovalStatus::Completed);
        let quality = done.quality_assessment.unwrap();
        assert_eq!(quality.overall_score, 0.0);
        assert!(quality.notes[0].contains("no frames"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reencode_timeout_fails_job() {
        let tracker = tracker(3 * 3600);
        let assessor = MockQualityAssessor::new();
        let runner = runner(Arc::new(StalledTranscoder), tracker.clone(), assessor);

        let job = runner.submit(request("in.mp4")).await;
        let mut done = None;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1800)).await;
            let current = tracker.load(&job.removal_id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                done = Some(current);
                break;
            }
        }

        let done = done.expect("job should time out");
        assert_eq!(done.status, RemovalStatus::Failed);
        assert_eq!(done.progress.percentage, 60);
        assert_eq!(done.error.as_deref(), Some("Transcode failed: re-encode exceeded 3600s"));
    }

    #[tokio::test]
    async fn test_persist_failure_returns_failed_job() {
        let mut store = MockProgressStore::new();
        store
            .expect_put()
            .returning(|_, _, _| Err(EngineError::store("connection refused")));
        let tracker = ProgressTracker::new(Arc::new(store), Duration::from_secs(60));
        // no expectations: any transcoder call would panic
        let runner = runner(Arc::new(MockTranscoder::new()), tracker, MockQualityAssessor::new());

        let job = runner.submit(request("in.mp4")).await;
        assert_eq!(job.status, RemovalStatus::Failed);
        assert_eq!(job.progress.percentage, 0);
        let error = job.error.unwrap();
        assert!(error.starts_with("could not persist removal job"));
        assert!(error.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_empty_video_ref_rejected() {
        let tracker = tracker(60);
        let assessor = MockQualityAssessor::new();
        let runner = runner(Arc::new(MockTranscoder::new()), tracker.clone(), assessor);

        let job = runner.submit(request("  ")).await;
        assert_eq!(job.status, RemovalStatus::Failed);
        let stored = tracker.load(&job.removal_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RemovalStatus::Failed);
    }

    #[test]
    fn test_default_output_ref() {
        assert_eq!(
            default_output_ref("/videos/clip.mp4", "_clean"),
            "/videos/clip_clean.mp4"
        );
        assert_eq!(default_output_ref("clip.mov", "_clean"), "clip_clean.mov");
        assert_eq!(
            default_output_ref("/videos/raw", "_clean"),
            "/videos/raw_clean.mp4"
        );
    }
}
