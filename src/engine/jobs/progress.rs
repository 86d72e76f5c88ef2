use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::store::{get_json, put_json, ProgressStore};
use crate::engine::error::EngineError;
use crate::types::RemovalJob;

pub const REMOVAL_KEY_PREFIX: &str = "watermark_removal_";

pub fn removal_key(removal_id: &str) -> String {
    format!("{}{}", REMOVAL_KEY_PREFIX, removal_id)
}

/// Reads and writes whole removal job records. Each write replaces the
/// previous record for the id.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn record(&self, job: &RemovalJob) -> Result<(), EngineError> {
        debug!(
            removal_id = %job.removal_id,
            status = %job.status,
            percentage = job.progress.percentage,
            "recording job state"
        );
        put_json(self.store.as_ref(), &removal_key(&job.removal_id), job, self.ttl).await
    }

    pub async fn load(&self, removal_id: &str) -> Result<Option<RemovalJob>, EngineError> {
        get_json(self.store.as_ref(), &removal_key(removal_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::jobs::store::{MemoryProgressStore, MockProgressStore};
    use crate::types::{RemovalMethod, RemovalStatus};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_scheme() {
        assert_eq!(removal_key("abc"), "watermark_removal_abc");
    }

    #[tokio::test]
    async fn test_record_and_load() {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new(store.clone(), Duration::from_secs(3600));

        let mut job = RemovalJob::new(
            "job-1".to_string(),
            "in.mp4",
            RemovalMethod::ContentAware,
            vec![],
        );
        tracker.record(&job).await.unwrap();

        job.advance(RemovalStatus::Preprocessing, "Analyzing video").unwrap();
        tracker.record(&job).await.unwrap();

        let loaded = tracker.load("job-1").await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(loaded.progress.percentage, 20);
        assert!(store.get("watermark_removal_job-1").await.unwrap().is_some());
        assert_eq!(tracker.load("job-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut store = MockProgressStore::new();
        store
            .expect_put()
            .returning(|_, _, _| Err(EngineError::store("connection refused")));

        let tracker = ProgressTracker::new(Arc::new(store), Duration::from_secs(60));
        let job = RemovalJob::new("job-1".to_string(), "in.mp4", RemovalMethod::Inpainting, vec![]);
        let err = tracker.record(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
