mod manual;
mod worker;

pub use manual::ManualQueue;
pub use worker::WorkerQueue;

use crate::errors::AppResult;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
}

pub type Job = Box<dyn FnOnce(&JobContext) -> AppResult<()> + Send + 'static>;

pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, name: &str, job: Job, countdown: Duration) -> AppResult<String>;

    // Best-effort cancellation. Returns `true` only when a job that had not
    // started yet was removed; revoking a running or unknown job is a no-op.
    fn revoke(&self, job_id: &str) -> AppResult<bool>;
}
