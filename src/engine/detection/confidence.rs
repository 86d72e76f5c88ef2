use super::regions::round2;
use crate::types::WatermarkCandidate;

/// Mean candidate confidence rounded to two decimals, 0.0 for no candidates.
pub fn aggregate_confidence(candidates: &[WatermarkCandidate]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }
    let total: f64 = candidates.iter().map(|c| c.confidence).sum();
    round2(total / candidates.len() as f64)
}
