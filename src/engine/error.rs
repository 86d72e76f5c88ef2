use thiserror::Error;

use crate::types::RemovalStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Pixel inspection unavailable: {0}")]
    MissingCapability(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Removal job not found: {0}")]
    NotFound(String),

    #[error("Progress store error: {0}")]
    Store(String),

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: RemovalStatus, to: RemovalStatus },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to load image: {0}")]
    Image(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::Image(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

// Helper functions for error creation
impl EngineError {
    pub fn invalid_input<T: std::fmt::Display>(msg: T) -> Self {
        EngineError::InvalidInput(msg.to_string())
    }

    pub fn extraction<T: std::fmt::Display>(msg: T) -> Self {
        EngineError::Extraction(msg.to_string())
    }

    pub fn probe<T: std::fmt::Display>(msg: T) -> Self {
        EngineError::Probe(msg.to_string())
    }

    pub fn transcode<T: std::fmt::Display>(msg: T) -> Self {
        EngineError::Transcode(msg.to_string())
    }

    pub fn store<T: std::fmt::Display>(msg: T) -> Self {
        EngineError::Store(msg.to_string())
    }

    pub fn invalid_transition(from: RemovalStatus, to: RemovalStatus) -> Self {
        EngineError::InvalidTransition { from, to }
    }

    /// Failures the detection pipeline recovers from by falling back.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Extraction(_) | EngineError::Probe(_) | EngineError::MissingCapability(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::transcode("ffmpeg exited with status 1");
        assert_eq!(err.to_string(), "Transcode failed: ffmpeg exited with status 1");

        let err = EngineError::invalid_transition(RemovalStatus::Completed, RemovalStatus::Failed);
        assert_eq!(err.to_string(), "Invalid job transition from completed to failed");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(EngineError::extraction("timeout").is_recoverable());
        assert!(EngineError::MissingCapability("no decoder".into()).is_recoverable());
        assert!(!EngineError::transcode("boom").is_recoverable());
        assert!(!EngineError::NotFound("r1".into()).is_recoverable());
    }
}
