use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use tracing::trace;

use super::profiles::WatermarkTypeProfiles;
use crate::engine::config::DetectionConfig;
use crate::engine::error::EngineError;
use crate::types::{BoundingBox, RemovalDifficulty, WatermarkCandidate, WatermarkType};

/// Random-access RGBA view over a decoded still.
pub trait PixelSource: Send + Sync {
    fn dimensions(&self) -> (u32, u32);
    fn rgba(&self, x: u32, y: u32) -> [u8; 4];
}

impl PixelSource for RgbaImage {
    fn dimensions(&self) -> (u32, u32) {
        RgbaImage::dimensions(self)
    }

    fn rgba(&self, x: u32, y: u32) -> [u8; 4] {
        self.get_pixel(x, y).0
    }
}

/// Opens extracted stills for pixel inspection.
pub trait FrameInspector: Send + Sync {
    /// Fails with [`EngineError::MissingCapability`] when pixel access is
    /// not possible at all on this platform.
    fn open(&self, path: &Path) -> Result<Box<dyn PixelSource>, EngineError>;
}

/// Decodes stills with the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageInspector;

impl FrameInspector for ImageInspector {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelSource>, EngineError> {
        let decoded = image::open(path)?;
        Ok(Box::new(decoded.to_rgba8()))
    }
}

/// Inspector for builds without an image decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPixelAccess;

impl FrameInspector for NoPixelAccess {
    fn open(&self, _path: &Path) -> Result<Box<dyn PixelSource>, EngineError> {
        Err(EngineError::MissingCapability(
            "no image decoder available for extracted frames".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    BottomBand,
}

impl RegionKind {
    pub fn slug(&self) -> &'static str {
        match self {
            RegionKind::TopLeft => "top_left",
            RegionKind::TopRight => "top_right",
            RegionKind::BottomLeft => "bottom_left",
            RegionKind::BottomRight => "bottom_right",
            RegionKind::BottomBand => "bottom_band",
        }
    }

    pub fn watermark_type(&self) -> WatermarkType {
        match self {
            RegionKind::BottomBand => WatermarkType::Text,
            _ => WatermarkType::Logo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRegion {
    pub kind: RegionKind,
    pub bbox: BoundingBox,
}

/// The five probed regions: four corner boxes and a full-width bottom band.
pub fn candidate_regions(
    width: u32,
    height: u32,
    corner_fraction: f64,
    band_fraction: f64,
) -> Vec<CandidateRegion> {
    let cw = ((f64::from(width) * corner_fraction).round() as u32).min(width);
    let ch = ((f64::from(height) * corner_fraction).round() as u32).min(height);
    let bh = ((f64::from(height) * band_fraction).round() as u32).min(height);

    let region = |kind, bbox| CandidateRegion { kind, bbox };
    vec![
        region(RegionKind::TopLeft, BoundingBox::new(0, 0, cw, ch)),
        region(RegionKind::TopRight, BoundingBox::new(width - cw, 0, cw, ch)),
        region(RegionKind::BottomLeft, BoundingBox::new(0, height - ch, cw, ch)),
        region(RegionKind::BottomRight, BoundingBox::new(width - cw, height - ch, cw, ch)),
        region(RegionKind::BottomBand, BoundingBox::new(0, height - bh, width, bh)),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionScore {
    pub transparency: f64,
    pub edge_density: f64,
    pub color_consistency: f64,
    pub weighted: f64,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounded confidence for a weighted score, if it clears the threshold.
/// The comparison uses the rounded value that ends up on the candidate.
fn thresholded_confidence(weighted: f64, threshold: f64) -> Option<f64> {
    let confidence = round2(weighted);
    (confidence > threshold).then_some(confidence)
}

fn sample_points(bbox: &BoundingBox, stride: u32) -> impl Iterator<Item = (u32, u32)> {
    let (x0, x1, y0, y1) = (bbox.x, bbox.right(), bbox.y, bbox.bottom());
    let stride = stride.max(1) as usize;
    (y0..y1)
        .step_by(stride)
        .flat_map(move |y| (x0..x1).step_by(stride).map(move |x| (x, y)))
}

fn channel_delta(a: [u8; 4], b: [u8; 4]) -> u8 {
    (0..3).map(|c| a[c].abs_diff(b[c])).max().unwrap_or(0)
}

pub struct RegionHeuristicDetector {
    config: DetectionConfig,
    profiles: Arc<WatermarkTypeProfiles>,
}

impl RegionHeuristicDetector {
    pub fn new(config: &DetectionConfig, profiles: Arc<WatermarkTypeProfiles>) -> Self {
        Self {
            config: config.clone(),
            profiles,
        }
    }

    /// Share of sampled pixels with non-zero alpha, 0-100.
    pub fn transparency_score(&self, pixels: &dyn PixelSource, bbox: &BoundingBox) -> f64 {
        let (mut total, mut visible) = (0u64, 0u64);
        for (x, y) in sample_points(bbox, self.config.transparency_stride) {
            total += 1;
            if pixels.rgba(x, y)[3] > 0 {
                visible += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        visible as f64 / total as f64 * 100.0
    }

    /// Share of right/below neighbour pairs whose channel delta exceeds the
    /// edge threshold, amplified and capped at 100.
    pub fn edge_density_score(&self, pixels: &dyn PixelSource, bbox: &BoundingBox) -> f64 {
        let threshold = self.config.edge_delta_threshold;
        let (mut pairs, mut edges) = (0u64, 0u64);

        for (x, y) in sample_points(bbox, self.config.edge_stride) {
            let here = pixels.rgba(x, y);
            if x + 1 < bbox.right() {
                pairs += 1;
                if channel_delta(here, pixels.rgba(x + 1, y)) > threshold {
                    edges += 1;
                }
            }
            if y + 1 < bbox.bottom() {
                pairs += 1;
                if channel_delta(here, pixels.rgba(x, y + 1)) > threshold {
                    edges += 1;
                }
            }
        }

        if pairs == 0 {
            return 0.0;
        }
        (edges as f64 / pairs as f64 * self.config.edge_amplification).min(100.0)
    }

    /// `max(0, 100 - variance / 100)` over the mean RGB channel variance.
    pub fn color_consistency_score(&self, pixels: &dyn PixelSource, bbox: &BoundingBox) -> f64 {
        let mut sum = [0f64; 3];
        let mut sum_sq = [0f64; 3];
        let mut n = 0u64;

        for (x, y) in sample_points(bbox, self.config.color_stride) {
            let px = pixels.rgba(x, y);
            for c in 0..3 {
                let v = f64::from(px[c]);
                sum[c] += v;
                sum_sq[c] += v * v;
            }
            n += 1;
        }

        if n == 0 {
            return 0.0;
        }

        let n = n as f64;
        let variance = (0..3)
            .map(|c| {
                let mean = sum[c] / n;
                (sum_sq[c] / n - mean * mean).max(0.0)
            })
            .sum::<f64>()
            / 3.0;

        (100.0 - variance / 100.0).max(0.0)
    }

    pub fn score_region(&self, pixels: &dyn PixelSource, bbox: &BoundingBox) -> RegionScore {
        let (width, height) = pixels.dimensions();
        let bbox = bbox.clamp_to(width, height);

        let transparency = self.transparency_score(pixels, &bbox);
        let edge_density = self.edge_density_score(pixels, &bbox);
        let color_consistency = self.color_consistency_score(pixels, &bbox);

        let weighted = (self.config.transparency_weight * transparency
            + self.config.edge_weight * edge_density
            + self.config.color_weight * color_consistency)
            .clamp(0.0, self.config.max_region_score);

        RegionScore {
            transparency,
            edge_density,
            color_consistency,
            weighted,
        }
    }

    /// Scores the five regions of one frame and keeps those above threshold.
    pub fn detect_frame(
        &self,
        pixels: &dyn PixelSource,
        frame_index: u32,
    ) -> Vec<WatermarkCandidate> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        candidate_regions(width, height, self.config.corner_fraction, self.config.band_fraction)
            .into_iter()
            .filter(|region| region.bbox.area() > 0)
            .filter_map(|region| {
                let score = self.score_region(pixels, &region.bbox);
                trace!(
                    frame = frame_index,
                    region = region.kind.slug(),
                    transparency = score.transparency,
                    edge = score.edge_density,
                    color = score.color_consistency,
                    weighted = score.weighted,
                    "region scored"
                );
                let confidence =
                    thresholded_confidence(score.weighted, self.config.score_threshold)?;
                Some(self.candidate(
                    region.kind.watermark_type(),
                    region.bbox,
                    confidence,
                    format!("f{}-{}", frame_index, region.kind.slug()),
                ))
            })
            .collect()
    }

    fn candidate(
        &self,
        watermark_type: WatermarkType,
        location: BoundingBox,
        confidence: f64,
        tag: String,
    ) -> WatermarkCandidate {
        let profile = self.profiles.get(watermark_type);
        WatermarkCandidate {
            id: format!("{}-{}", watermark_type, tag),
            watermark_type,
            confidence: round2(confidence),
            location,
            temporal_consistency: profile.temporal_consistency,
            removal_difficulty: profile.removal_difficulty,
            frames_detected: 1,
        }
    }

    /// Fixed region used when frames could not be extracted.
    pub fn default_region(&self, width: u32, height: u32) -> WatermarkCandidate {
        let anchor = self.config.default_region_anchor;
        let fraction = self.config.default_region_fraction;
        let location = BoundingBox::new(
            (f64::from(width) * anchor).round() as u32,
            (f64::from(height) * anchor).round() as u32,
            ((f64::from(width) * fraction).round() as u32).max(1),
            ((f64::from(height) * fraction).round() as u32).max(1),
        )
        .clamp_to(width.max(1), height.max(1));

        let mut candidate = self.candidate(
            WatermarkType::Logo,
            location,
            self.config.default_region_confidence,
            "default".to_string(),
        );
        candidate.removal_difficulty = RemovalDifficulty::Medium;
        candidate
    }

    /// Minimal candidate used when pixels cannot be inspected.
    pub fn static_fallback(&self) -> WatermarkCandidate {
        self.candidate(
            WatermarkType::Logo,
            BoundingBox::new(50, 50, 100, 50),
            self.config.static_fallback_confidence,
            "static".to_string(),
        )
    }
}
