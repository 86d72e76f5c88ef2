use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use imageproc::stats::{peak_signal_to_noise_ratio, root_mean_squared_error};
use mockall::automock;
use tracing::{debug, instrument};

use crate::engine::config::RemovalConfig;
use crate::engine::detection::round2;
use crate::engine::error::EngineError;
use crate::engine::video::{FrameSelection, Transcoder};
use crate::types::QualityAssessment;

/// PSNR (dB) mapped to a score of 0.
const PSNR_FLOOR_DB: f64 = 20.0;
/// PSNR (dB) mapped to a score of 100. Identical frames cap here.
const PSNR_CEILING_DB: f64 = 50.0;

#[automock]
#[async_trait]
pub trait QualityAssessor: Send + Sync {
    async fn assess(
        &self,
        original_ref: &str,
        processed_ref: &str,
    ) -> Result<QualityAssessment, EngineError>;
}

/// Fidelity numbers for one pair of matching stills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameComparison {
    pub psnr_db: f64,
    pub rmse: f64,
}

impl FrameComparison {
    pub fn measure(original: &RgbImage, processed: &RgbImage) -> Self {
        let resized;
        let processed = if processed.dimensions() != original.dimensions() {
            let (w, h) = original.dimensions();
            resized = image::imageops::resize(processed, w, h, FilterType::Triangle);
            &resized
        } else {
            processed
        };

        Self {
            psnr_db: peak_signal_to_noise_ratio(original, processed),
            rmse: root_mean_squared_error(original, processed),
        }
    }

    fn score(&self) -> f64 {
        // identical frames give an infinite PSNR
        let psnr = if self.psnr_db.is_nan() { PSNR_FLOOR_DB } else { self.psnr_db };
        let clamped = psnr.clamp(PSNR_FLOOR_DB, PSNR_CEILING_DB);
        (clamped - PSNR_FLOOR_DB) / (PSNR_CEILING_DB - PSNR_FLOOR_DB) * 100.0
    }
}

/// Folds per-frame comparisons into an assessment.
///
/// overall is the mean PSNR score, artifact is 100 minus the mean RMSE as a
/// percentage of full scale, consistency is 100 minus the spread between the
/// best and worst frame.
pub fn score_comparisons(
    comparisons: &[FrameComparison],
) -> Result<QualityAssessment, EngineError> {
    if comparisons.is_empty() {
        return Err(EngineError::invalid_input("no frame pairs to compare"));
    }

    let n = comparisons.len() as f64;
    let scores: Vec<f64> = comparisons.iter().map(FrameComparison::score).collect();
    let overall = scores.iter().sum::<f64>() / n;
    let mean_rmse = comparisons.iter().map(|c| c.rmse).sum::<f64>() / n;
    let artifact = (100.0 - mean_rmse / 255.0 * 100.0).clamp(0.0, 100.0);

    let best = scores.iter().cloned().fold(f64::MIN, f64::max);
    let worst = scores.iter().cloned().fold(f64::MAX, f64::min);
    let consistency = (100.0 - (best - worst)).clamp(0.0, 100.0);

    let finite_psnr: Vec<f64> = comparisons
        .iter()
        .map(|c| c.psnr_db)
        .filter(|p| p.is_finite())
        .collect();
    let mut notes = vec![format!("compared {} frame pairs", comparisons.len())];
    if finite_psnr.is_empty() {
        notes.push("frames are pixel-identical".to_string());
    } else {
        let mean_psnr = finite_psnr.iter().sum::<f64>() / finite_psnr.len() as f64;
        notes.push(format!("mean PSNR {:.2} dB", mean_psnr));
    }

    Ok(QualityAssessment {
        overall_score: round2(overall),
        artifact_score: round2(artifact),
        consistency_score: round2(consistency),
        notes,
    })
}

/// Pulls the same evenly spaced stills from both streams and compares them.
pub struct FrameComparisonAssessor {
    transcoder: Arc<dyn Transcoder>,
    sample_frames: u32,
    scratch_dir: Option<PathBuf>,
}

impl FrameComparisonAssessor {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        config: &RemovalConfig,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            transcoder,
            sample_frames: config.quality_sample_frames.max(1),
            scratch_dir,
        }
    }

    fn scratch(&self) -> Result<tempfile::TempDir, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("watermark-quality-");
        let dir = match &self.scratch_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[async_trait]
impl QualityAssessor for FrameComparisonAssessor {
    #[instrument(skip(self))]
    async fn assess(
        &self,
        original_ref: &str,
        processed_ref: &str,
    ) -> Result<QualityAssessment, EngineError> {
        let metadata = self.transcoder.probe(original_ref).await?;
        let selection = FrameSelection {
            interval_frames: (metadata.frame_count / u64::from(self.sample_frames)).max(1),
            count: self.sample_frames,
        };

        let scratch = self.scratch()?;
        let original_dir = scratch.path().join("original");
        let processed_dir = scratch.path().join("processed");
        tokio::fs::create_dir_all(&original_dir).await?;
        tokio::fs::create_dir_all(&processed_dir).await?;

        let (original_frames, processed_frames) = futures::try_join!(
            self.transcoder.extract_frames(original_ref, &selection, &original_dir),
            self.transcoder.extract_frames(processed_ref, &selection, &processed_dir)
        )?;
        debug!(
            original = original_frames.len(),
            processed = processed_frames.len(),
            "quality frames extracted"
        );

        let pairs: Vec<(PathBuf, PathBuf)> =
            original_frames.into_iter().zip(processed_frames).collect();
        let comparisons = tokio::task::spawn_blocking(move || compare_pairs(&pairs))
            .await
            .map_err(|e| EngineError::Io(format!("quality comparison task failed: {}", e)))??;

        score_comparisons(&comparisons)
    }
}

fn compare_pairs(pairs: &[(PathBuf, PathBuf)]) -> Result<Vec<FrameComparison>, EngineError> {
    pairs
        .iter()
        .map(|(original, processed)| -> Result<FrameComparison, EngineError> {
            let original = open_rgb(original)?;
            let processed = open_rgb(processed)?;
            Ok(FrameComparison::measure(&original, &processed))
        })
        .collect()
}

fn open_rgb(path: &Path) -> Result<RgbImage, EngineError> {
    Ok(image::open(path)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::video::{MockTranscoder, VideoMetadata};
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn test_identical_frames_score_full_marks() {
        let frame = gradient(64, 64);
        let comparison = FrameComparison::measure(&frame, &frame);
        assert_eq!(comparison.rmse, 0.0);

        let assessment = score_comparisons(&[comparison, comparison]).unwrap();
        assert_eq!(assessment.overall_score, 100.0);
        assert_eq!(assessment.artifact_score, 100.0);
        assert_eq!(assessment.consistency_score, 100.0);
        assert!(assessment.notes.iter().any(|n| n.contains("identical")));
    }

    #[test]
    fn test_psnr_mapping_is_linear() {
        let comparisons = [
            FrameComparison { psnr_db: 35.0, rmse: 25.5 },
            FrameComparison { psnr_db: 20.0, rmse: 25.5 },
        ];
        let assessment = score_comparisons(&comparisons).unwrap();
        // 50 and 0 averaged
        assert_eq!(assessment.overall_score, 25.0);
        assert_eq!(assessment.artifact_score, 90.0);
        assert_eq!(assessment.consistency_score, 50.0);
    }

    #[test]
    fn test_scores_clamped() {
        let comparisons = [FrameComparison { psnr_db: 5.0, rmse: 300.0 }];
        let assessment = score_comparisons(&comparisons).unwrap();
        assert_eq!(assessment.overall_score, 0.0);
        assert_eq!(assessment.artifact_score, 0.0);
    }

    #[test]
    fn test_empty_comparison_rejected() {
        assert!(matches!(score_comparisons(&[]), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_patched_region_lowers_score() {
        let original = gradient(128, 72);
        let mut processed = original.clone();
        draw_filled_rect_mut(&mut processed, Rect::at(100, 50).of_size(20, 15), Rgb([0, 0, 0]));

        let comparison = FrameComparison::measure(&original, &processed);
        assert!(comparison.psnr_db.is_finite());
        assert!(comparison.rmse > 0.0);

        let assessment = score_comparisons(&[comparison]).unwrap();
        assert!(assessment.overall_score < 100.0);
        assert!(assessment.artifact_score < 100.0);
    }

    #[test]
    fn test_mismatched_dimensions_are_resized() {
        let original = gradient(64, 64);
        let processed = RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]));
        let comparison = FrameComparison::measure(&original, &processed);
        assert!(comparison.rmse > 0.0);
    }

    #[tokio::test]
    async fn test_assessor_compares_extracted_frames() {
        let mut mock = MockTranscoder::new();
        mock.expect_probe().returning(|_| {
            Ok(VideoMetadata {
                width: 64,
                height: 64,
                duration_seconds: 3.0,
                fps: 30.0,
                frame_count: 90,
                has_audio: false,
                estimated: false,
            })
        });
        mock.expect_extract_frames().times(2).returning(|_, selection, dir| {
            assert_eq!(selection.interval_frames, 30);
            (0..selection.count)
                .map(|i| -> Result<PathBuf, EngineError> {
                    let path = dir.join(format!("frame_{:03}.png", i + 1));
                    gradient(64, 64).save(&path)?;
                    Ok(path)
                })
                .collect()
        });

        let assessor =
            FrameComparisonAssessor::new(Arc::new(mock), &RemovalConfig::default(), None);
        let assessment = assessor.assess("in.mp4", "out.mp4").await.unwrap();
        assert_eq!(assessment.overall_score, 100.0);
        assert_eq!(assessment.notes[0], "compared 3 frame pairs");
    }

    #[tokio::test]
    async fn test_assessor_propagates_extraction_failure() {
        let mut mock = MockTranscoder::new();
        mock.expect_probe().returning(|_| Err(EngineError::probe("no such file")));

        let assessor =
            FrameComparisonAssessor::new(Arc::new(mock), &RemovalConfig::default(), None);
        let err = assessor.assess("in.mp4", "out.mp4").await.unwrap_err();
        assert!(matches!(err, EngineError::Probe(_)));
    }
}
