use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::detection::aggregate_confidence;
use crate::types::{ProcessingTimeClass, RemovalMethod, WatermarkCandidate};

/// Declared characteristics of a method. Never feeds selection; the estimator
/// reports accuracy and time class alongside its numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodProfile {
    pub accuracy_percent: f64,
    pub time_class: ProcessingTimeClass,
    /// Seconds of processing per second of 1080p footage, approximate.
    pub cost_factor: f64,
}

#[derive(Debug, Clone)]
pub struct MethodProfiles {
    profiles: HashMap<RemovalMethod, MethodProfile>,
}

impl MethodProfiles {
    pub fn new(profiles: HashMap<RemovalMethod, MethodProfile>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, method: RemovalMethod) -> Option<&MethodProfile> {
        self.profiles.get(&method)
    }
}

impl Default for MethodProfiles {
    fn default() -> Self {
        Self::new(HashMap::from([
            (
                RemovalMethod::Inpainting,
                MethodProfile {
                    accuracy_percent: 95.0,
                    time_class: ProcessingTimeClass::VerySlow,
                    cost_factor: 2.0,
                },
            ),
            (
                RemovalMethod::TemporalCoherence,
                MethodProfile {
                    accuracy_percent: 90.0,
                    time_class: ProcessingTimeClass::Slow,
                    cost_factor: 1.5,
                },
            ),
            (
                RemovalMethod::ContentAware,
                MethodProfile {
                    accuracy_percent: 85.0,
                    time_class: ProcessingTimeClass::Moderate,
                    cost_factor: 1.0,
                },
            ),
            (
                RemovalMethod::FrequencyDomain,
                MethodProfile {
                    accuracy_percent: 75.0,
                    time_class: ProcessingTimeClass::Fast,
                    cost_factor: 0.5,
                },
            ),
        ]))
    }
}

/// Maps mean candidate confidence onto a removal method.
#[derive(Debug, Clone)]
pub struct MethodSelector {
    profiles: Arc<MethodProfiles>,
}

impl MethodSelector {
    pub fn new(profiles: Arc<MethodProfiles>) -> Self {
        Self { profiles }
    }

    pub fn select(&self, mean_confidence: f64) -> RemovalMethod {
        if mean_confidence > 90.0 {
            RemovalMethod::Inpainting
        } else if mean_confidence > 80.0 {
            RemovalMethod::TemporalCoherence
        } else if mean_confidence > 70.0 {
            RemovalMethod::ContentAware
        } else {
            RemovalMethod::FrequencyDomain
        }
    }

    pub fn select_for(&self, watermarks: &[WatermarkCandidate]) -> RemovalMethod {
        self.select(aggregate_confidence(watermarks))
    }

    pub fn profile(&self, method: RemovalMethod) -> Option<&MethodProfile> {
        self.profiles.get(method)
    }
}

impl Default for MethodSelector {
    fn default() -> Self {
        Self::new(Arc::new(MethodProfiles::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, RemovalDifficulty, WatermarkType};

    #[test]
    fn test_selection_thresholds() {
        let selector = MethodSelector::default();
        assert_eq!(selector.select(95.0), RemovalMethod::Inpainting);
        assert_eq!(selector.select(85.0), RemovalMethod::TemporalCoherence);
        assert_eq!(selector.select(75.0), RemovalMethod::ContentAware);
        assert_eq!(selector.select(65.0), RemovalMethod::FrequencyDomain);
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let selector = MethodSelector::default();
        assert_eq!(selector.select(90.0), RemovalMethod::TemporalCoherence);
        assert_eq!(selector.select(80.0), RemovalMethod::ContentAware);
        assert_eq!(selector.select(70.0), RemovalMethod::FrequencyDomain);
        assert_eq!(selector.select(0.0), RemovalMethod::FrequencyDomain);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = MethodSelector::default();
        for step in 0..=1000 {
            let confidence = f64::from(step) / 10.0;
            let first = selector.select(confidence);
            assert!((0..5).all(|_| selector.select(confidence) == first));
        }
    }

    #[test]
    fn test_select_for_uses_mean_confidence() {
        let selector = MethodSelector::default();
        let wm = |confidence| WatermarkCandidate {
            id: "w".into(),
            watermark_type: WatermarkType::Logo,
            confidence,
            location: BoundingBox::new(0, 0, 10, 10),
            temporal_consistency: 90.0,
            removal_difficulty: RemovalDifficulty::Medium,
            frames_detected: 1,
        };
        assert_eq!(selector.select_for(&[wm(98.0), wm(92.0)]), RemovalMethod::Inpainting);
        assert_eq!(selector.select_for(&[wm(98.0), wm(60.0)]), RemovalMethod::ContentAware);
        assert_eq!(selector.select_for(&[]), RemovalMethod::FrequencyDomain);
    }

    #[test]
    fn test_every_method_has_a_profile() {
        let selector = MethodSelector::default();
        for method in RemovalMethod::ALL {
            let profile = selector.profile(method).unwrap();
            assert!(profile.accuracy_percent > 0.0 && profile.accuracy_percent <= 100.0);
        }
    }
}
