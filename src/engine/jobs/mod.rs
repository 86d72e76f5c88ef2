mod progress;
mod runner;
mod store;

pub use progress::{removal_key, ProgressTracker, REMOVAL_KEY_PREFIX};
pub use runner::{default_output_ref, JobRunner, RemovalRequest};
pub use store::{get_json, put_json, MemoryProgressStore, MockProgressStore, ProgressStore};
