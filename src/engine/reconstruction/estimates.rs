use std::sync::Arc;

use tracing::debug;

use super::methods::{MethodProfile, MethodProfiles};
use crate::engine::video::VideoMetadata;
use crate::types::{RemovalMethod, ResourceEstimate};

const REFERENCE_PIXELS: f64 = 1920.0 * 1080.0;
const BASE_MEMORY_MB: u64 = 256;
const MAX_WORKERS: u32 = 16;
/// Frames the encoder holds for lookahead, independent of the worker count.
const ENCODER_LOOKAHEAD_FRAMES: u64 = 16;

/// Advisory sizing for a removal job. Nothing downstream enforces these
/// numbers; they are attached to the job results for callers to inspect.
#[derive(Debug, Clone)]
pub struct ResourceEstimator {
    profiles: Arc<MethodProfiles>,
    available_workers: u32,
}

impl ResourceEstimator {
    pub fn new(profiles: Arc<MethodProfiles>) -> Self {
        Self::with_workers(profiles, rayon::current_num_threads() as u32)
    }

    pub fn with_workers(profiles: Arc<MethodProfiles>, available_workers: u32) -> Self {
        Self {
            profiles,
            available_workers: available_workers.clamp(1, MAX_WORKERS),
        }
    }

    pub fn estimate(&self, metadata: &VideoMetadata, method: RemovalMethod) -> ResourceEstimate {
        let resolution = resolution_factor(metadata.width, metadata.height);
        let batch_size = recommended_batch_size(resolution);
        let workers = self.recommended_workers(resolution);

        let profile = self.profiles.get(method);

        let estimate = ResourceEstimate {
            estimated_seconds: estimated_seconds(metadata.duration_seconds, resolution, profile),
            recommended_batch_size: batch_size,
            recommended_workers: workers,
            estimated_memory_mb: estimated_memory_mb(
                metadata.width,
                metadata.height,
                batch_size,
                workers,
            ),
            expected_accuracy_percent: profile.map(|p| p.accuracy_percent),
            time_class: profile.map(|p| p.time_class),
        };
        debug!(method = %method, ?estimate, "resource estimate");
        estimate
    }

    /// Large frames get half the workers so their buffers fit in memory.
    fn recommended_workers(&self, resolution: f64) -> u32 {
        if resolution > 2.0 {
            (self.available_workers / 2).max(1)
        } else {
            self.available_workers
        }
    }
}

/// Frame area relative to 1080p, floored at a quarter.
fn resolution_factor(width: u32, height: u32) -> f64 {
    (f64::from(width) * f64::from(height) / REFERENCE_PIXELS).max(0.25)
}

fn estimated_seconds(
    duration_seconds: f64,
    resolution: f64,
    profile: Option<&MethodProfile>,
) -> u64 {
    let cost = profile.map(|p| p.cost_factor).unwrap_or(1.0);
    let seconds = duration_seconds.max(0.0) * cost * resolution;
    (seconds.ceil() as u64).max(1)
}

fn recommended_batch_size(resolution: f64) -> u32 {
    if resolution > 2.0 {
        4
    } else if resolution > 0.5 {
        8
    } else {
        16
    }
}

fn estimated_memory_mb(width: u32, height: u32, batch_size: u32, workers: u32) -> u64 {
    let frame_bytes = u64::from(width) * u64::from(height) * 4;
    let in_flight = frame_bytes * u64::from(batch_size) * u64::from(workers);
    let lookahead = frame_bytes * ENCODER_LOOKAHEAD_FRAMES;
    BASE_MEMORY_MB + (in_flight + lookahead) / (1024 * 1024)
}
