use crate::types::WatermarkCandidate;

/// Collapses per-frame candidates into a canonical set.
///
/// Two candidates merge when their overlap ratio (intersection over the
/// smaller area) exceeds the threshold. The first-seen candidate keeps its
/// geometry and confidence; the merge only adds to `frames_detected`.
/// Canonical candidates are never moved, so every pair in the output
/// overlaps by at most the threshold.
#[derive(Debug, Clone)]
pub struct WatermarkDeduplicator {
    merge_threshold: f64,
}

impl WatermarkDeduplicator {
    pub fn new(merge_threshold: f64) -> Self {
        Self { merge_threshold }
    }

    pub fn deduplicate<I>(&self, per_frame: I) -> Vec<WatermarkCandidate>
    where
        I: IntoIterator<Item = Vec<WatermarkCandidate>>,
    {
        let mut canonical: Vec<WatermarkCandidate> = Vec::new();

        for candidate in per_frame.into_iter().flatten() {
            let existing = canonical
                .iter_mut()
                .find(|c| c.location.overlap_ratio(&candidate.location) > self.merge_threshold);

            match existing {
                Some(first) => first.frames_detected += candidate.frames_detected.max(1),
                None => canonical.push(candidate),
            }
        }

        canonical
    }
}

impl Default for WatermarkDeduplicator {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, RemovalDifficulty, WatermarkType};
    use pretty_assertions::assert_eq;

    fn candidate(id: &str, bbox: BoundingBox, confidence: f64) -> WatermarkCandidate {
        WatermarkCandidate {
            id: id.to_string(),
            watermark_type: WatermarkType::Logo,
            confidence,
            location: bbox,
            temporal_consistency: 90.0,
            removal_difficulty: RemovalDifficulty::Medium,
            frames_detected: 1,
        }
    }

    #[test]
    fn test_overlapping_candidates_merge() {
        let dedup = WatermarkDeduplicator::default();
        let merged = dedup.deduplicate(vec![
            vec![candidate("a", BoundingBox::new(0, 0, 100, 100), 80.0)],
            vec![candidate("b", BoundingBox::new(5, 5, 100, 100), 95.0)],
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].frames_detected, 2);
        // first-seen confidence wins
        assert_eq!(merged[0].confidence, 80.0);
        assert_eq!(merged[0].location, BoundingBox::new(0, 0, 100, 100));
    }

    #[test]
    fn test_below_threshold_overlap_kept_apart() {
        let dedup = WatermarkDeduplicator::default();
        // 90 x 90 = 8100 / 10000 = 0.81 merges; 81 x 81 = 6561 / 10000 does not
        let merged = dedup.deduplicate(vec![
            vec![candidate("a", BoundingBox::new(0, 0, 100, 100), 80.0)],
            vec![candidate("b", BoundingBox::new(19, 19, 100, 100), 85.0)],
        ]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|c| c.frames_detected == 1));
    }

    #[test]
    fn test_same_region_across_many_frames() {
        let dedup = WatermarkDeduplicator::default();
        let frames: Vec<Vec<WatermarkCandidate>> = (0..5)
            .map(|i| {
                vec![
                    candidate(&format!("corner-{}", i), BoundingBox::new(1344, 0, 576, 324), 90.0),
                    candidate(&format!("band-{}", i), BoundingBox::new(0, 864, 1920, 216), 75.0),
                ]
            })
            .collect();

        let merged = dedup.deduplicate(frames);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "corner-0");
        assert_eq!(merged[0].frames_detected, 5);
        assert_eq!(merged[1].id, "band-0");
        assert_eq!(merged[1].frames_detected, 5);
    }

    #[test]
    fn test_output_pairwise_overlap_bounded() {
        let dedup = WatermarkDeduplicator::default();
        let frames: Vec<Vec<WatermarkCandidate>> = (0..20u32)
            .map(|i| {
                let location = BoundingBox::new(i * 7 % 60, i * 13 % 50, 40 + i, 30 + i);
                vec![candidate(&i.to_string(), location, 80.0)]
            })
            .collect();

        let merged = dedup.deduplicate(frames);
        for (i, a) in merged.iter().enumerate() {
            for b in &merged[i + 1..] {
                assert!(a.location.overlap_ratio(&b.location) <= 0.7);
            }
        }
        let total: u32 = merged.iter().map(|c| c.frames_detected).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn test_empty_input() {
        assert!(WatermarkDeduplicator::default().deduplicate(Vec::new()).is_empty());
    }
}
