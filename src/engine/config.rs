use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use dotenv::dotenv;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub removal: RemovalConfig,
    pub tools: ToolConfig,
    pub store: StoreConfig,
}

/// Detector tuning. Thresholds and region geometry are uncalibrated
/// defaults and are expected to be overridden per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub score_threshold: f64,
    pub max_region_score: f64,
    pub corner_fraction: f64,
    pub band_fraction: f64,
    pub transparency_weight: f64,
    pub edge_weight: f64,
    pub color_weight: f64,
    pub transparency_stride: u32,
    pub edge_stride: u32,
    pub color_stride: u32,
    pub edge_delta_threshold: u8,
    pub edge_amplification: f64,
    pub merge_overlap_threshold: f64,
    pub min_samples: u32,
    pub max_samples: u32,
    pub seconds_per_sample: f64,
    pub assumed_fps: f64,
    pub extraction_timeout_secs: u64,
    pub default_region_anchor: f64,
    pub default_region_fraction: f64,
    pub default_region_confidence: f64,
    pub static_fallback_confidence: f64,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            score_threshold: 70.0,
            max_region_score: 98.0,
            corner_fraction: 0.3,
            band_fraction: 0.2,
            transparency_weight: 0.4,
            edge_weight: 0.3,
            color_weight: 0.3,
            transparency_stride: 5,
            edge_stride: 3,
            color_stride: 4,
            edge_delta_threshold: 30,
            edge_amplification: 200.0,
            merge_overlap_threshold: 0.7,
            min_samples: 3,
            max_samples: 10,
            seconds_per_sample: 10.0,
            assumed_fps: 30.0,
            extraction_timeout_secs: 30,
            default_region_anchor: 0.85,
            default_region_fraction: 0.1,
            default_region_confidence: 75.0,
            static_fallback_confidence: 60.0,
            scratch_dir: None,
        }
    }
}

impl DetectionConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalConfig {
    pub reencode_timeout_secs: u64,
    pub default_crf: u8,
    pub preset: String,
    pub output_suffix: String,
    pub soft_edge_px: u32,
    pub quality_sample_frames: u32,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            reencode_timeout_secs: 3600,
            default_crf: 18,
            preset: "medium".to_string(),
            output_suffix: "_clean".to_string(),
            soft_edge_px: 8,
            quality_sample_frames: 3,
        }
    }
}

impl RemovalConfig {
    pub fn reencode_timeout(&self) -> Duration {
        Duration::from_secs(self.reencode_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub progress_ttl_secs: u64,
    pub detection_cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            progress_ttl_secs: 3600,
            detection_cache_ttl_secs: 600,
        }
    }
}

impl StoreConfig {
    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    pub fn detection_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.detection_cache_ttl_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

impl EngineConfig {
    /// Builds a configuration from `WATERMARK_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self> {
        let d = DetectionConfig::default();
        let detection = DetectionConfig {
            score_threshold: env_or("WATERMARK_SCORE_THRESHOLD", d.score_threshold),
            corner_fraction: env_or("WATERMARK_CORNER_FRACTION", d.corner_fraction),
            band_fraction: env_or("WATERMARK_BAND_FRACTION", d.band_fraction),
            merge_overlap_threshold: env_or("WATERMARK_MERGE_OVERLAP", d.merge_overlap_threshold),
            min_samples: env_or("WATERMARK_MIN_SAMPLES", d.min_samples),
            max_samples: env_or("WATERMARK_MAX_SAMPLES", d.max_samples),
            assumed_fps: env_or("WATERMARK_ASSUMED_FPS", d.assumed_fps),
            extraction_timeout_secs: env_or(
                "WATERMARK_EXTRACTION_TIMEOUT",
                d.extraction_timeout_secs,
            ),
            scratch_dir: std::env::var("WATERMARK_SCRATCH_DIR").ok().map(PathBuf::from),
            ..d
        };

        let r = RemovalConfig::default();
        let removal = RemovalConfig {
            reencode_timeout_secs: env_or("WATERMARK_REENCODE_TIMEOUT", r.reencode_timeout_secs),
            default_crf: env_or("WATERMARK_CRF", r.default_crf),
            preset: env_or("WATERMARK_PRESET", r.preset.clone()),
            output_suffix: env_or("WATERMARK_OUTPUT_SUFFIX", r.output_suffix.clone()),
            soft_edge_px: env_or("WATERMARK_SOFT_EDGE_PX", r.soft_edge_px),
            quality_sample_frames: env_or("WATERMARK_QUALITY_FRAMES", r.quality_sample_frames),
        };

        let t = ToolConfig::default();
        let tools = ToolConfig {
            ffmpeg_path: env_path_or("WATERMARK_FFMPEG_PATH", t.ffmpeg_path),
            ffprobe_path: env_path_or("WATERMARK_FFPROBE_PATH", t.ffprobe_path),
        };

        let s = StoreConfig::default();
        let store = StoreConfig {
            progress_ttl_secs: env_or("WATERMARK_PROGRESS_TTL", s.progress_ttl_secs),
            detection_cache_ttl_secs: env_or(
                "WATERMARK_DETECTION_CACHE_TTL",
                s.detection_cache_ttl_secs,
            ),
        };

        let config = EngineConfig { detection, removal, tools, store };
        config.validate().context("invalid watermark engine configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.min_samples == 0 || d.min_samples > d.max_samples {
            anyhow::bail!(
                "sample bounds must satisfy 0 < min ({}) <= max ({})",
                d.min_samples,
                d.max_samples
            );
        }
        for (name, fraction) in [
            ("corner_fraction", d.corner_fraction),
            ("band_fraction", d.band_fraction),
            ("default_region_anchor", d.default_region_anchor),
            ("default_region_fraction", d.default_region_fraction),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, fraction);
            }
        }
        if d.default_region_anchor + d.default_region_fraction > 1.0 {
            anyhow::bail!("default region does not fit inside the frame");
        }
        if !(0.0..=1.0).contains(&d.merge_overlap_threshold) {
            anyhow::bail!("merge_overlap_threshold must be within [0, 1]");
        }
        if d.transparency_stride == 0 || d.edge_stride == 0 || d.color_stride == 0 {
            anyhow::bail!("sampling strides must be non-zero");
        }
        if self.removal.default_crf > 51 {
            anyhow::bail!("crf must be within [0, 51]");
        }
        Ok(())
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<EngineConfig>>,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        dotenv().ok();

        let config = EngineConfig::from_env()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn get_config(&self) -> Arc<EngineConfig> {
        Arc::new(self.config.read().await.clone())
    }

    pub async fn update_config(&self, new_config: EngineConfig) -> Result<()> {
        new_config.validate()?;
        let mut config = self.config.write().await;
        *config = new_config;
        Ok(())
    }

    pub async fn reload_config(&self) -> Result<()> {
        dotenv().ok();
        let new_config = EngineConfig::from_env()?;
        self.update_config(new_config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.score_threshold, 70.0);
        assert_eq!(config.store.progress_ttl(), Duration::from_secs(3600));
        assert!(config.store.detection_cache_ttl() < config.store.progress_ttl());
    }

    #[test]
    fn test_invalid_sample_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.detection.min_samples = 12;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_manager() {
        std::env::set_var("WATERMARK_SCORE_THRESHOLD", "65.5");
        std::env::set_var("WATERMARK_MAX_SAMPLES", "8");
        std::env::set_var("WATERMARK_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");

        let config_manager = ConfigManager::new().unwrap();
        let config = config_manager.get_config().await;

        assert_eq!(config.detection.score_threshold, 65.5);
        assert_eq!(config.detection.max_samples, 8);
        assert_eq!(config.tools.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));

        std::env::remove_var("WATERMARK_SCORE_THRESHOLD");
        std::env::remove_var("WATERMARK_MAX_SAMPLES");
        std::env::remove_var("WATERMARK_FFMPEG_PATH");

        let mut invalid = EngineConfig::default();
        invalid.removal.default_crf = 80;
        assert!(config_manager.update_config(invalid).await.is_err());
    }
}
