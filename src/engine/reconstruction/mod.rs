//! Turns a set of watermark candidates into a removal plan: which method,
//! which ffmpeg filters, how much it should cost, and how good the result is.

mod estimates;
mod filters;
mod methods;
mod quality;

pub use estimates::ResourceEstimator;
pub use filters::{FilterDirective, RemovalFilterBuilder, INPUT_LABEL, OUTPUT_LABEL};
pub use methods::{MethodProfile, MethodProfiles, MethodSelector};
pub use quality::{
    score_comparisons, FrameComparison, FrameComparisonAssessor, MockQualityAssessor,
    QualityAssessor,
};
