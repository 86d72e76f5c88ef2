use std::collections::HashMap;

use crate::types::{RemovalDifficulty, WatermarkType};

/// Static per-type properties attached to every candidate of that type.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkTypeProfile {
    pub removal_difficulty: RemovalDifficulty,
    /// Assumed stability across frames, 0-100.
    pub temporal_consistency: f64,
    pub description: &'static str,
}

/// Immutable lookup table built once and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct WatermarkTypeProfiles {
    profiles: HashMap<WatermarkType, WatermarkTypeProfile>,
}

impl WatermarkTypeProfiles {
    pub fn new(profiles: HashMap<WatermarkType, WatermarkTypeProfile>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, watermark_type: WatermarkType) -> &WatermarkTypeProfile {
        self.profiles
            .get(&watermark_type)
            .unwrap_or(&FALLBACK_PROFILE)
    }
}

const FALLBACK_PROFILE: WatermarkTypeProfile = WatermarkTypeProfile {
    removal_difficulty: RemovalDifficulty::Medium,
    temporal_consistency: 80.0,
    description: "unclassified overlay",
};

impl Default for WatermarkTypeProfiles {
    fn default() -> Self {
        let profiles = HashMap::from([
            (
                WatermarkType::Logo,
                WatermarkTypeProfile {
                    removal_difficulty: RemovalDifficulty::Medium,
                    temporal_consistency: 90.0,
                    description: "static corner logo",
                },
            ),
            (
                WatermarkType::Text,
                WatermarkTypeProfile {
                    removal_difficulty: RemovalDifficulty::Easy,
                    temporal_consistency: 75.0,
                    description: "caption or lower-third text",
                },
            ),
            (
                WatermarkType::Brand,
                WatermarkTypeProfile {
                    removal_difficulty: RemovalDifficulty::Hard,
                    temporal_consistency: 85.0,
                    description: "semi-transparent brand mark",
                },
            ),
            (
                WatermarkType::Channel,
                WatermarkTypeProfile {
                    removal_difficulty: RemovalDifficulty::Medium,
                    temporal_consistency: 95.0,
                    description: "broadcast channel bug",
                },
            ),
        ]);
        Self::new(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles_cover_every_type() {
        let profiles = WatermarkTypeProfiles::default();
        let all = [
            WatermarkType::Logo,
            WatermarkType::Text,
            WatermarkType::Brand,
            WatermarkType::Channel,
        ];
        for t in all {
            let p = profiles.get(t);
            assert!((0.0..=100.0).contains(&p.temporal_consistency));
        }
        assert_eq!(profiles.get(WatermarkType::Logo).removal_difficulty, RemovalDifficulty::Medium);
    }

    #[test]
    fn test_missing_entry_uses_fallback() {
        let profiles = WatermarkTypeProfiles::new(HashMap::new());
        assert_eq!(profiles.get(WatermarkType::Brand), &FALLBACK_PROFILE);
    }
}
