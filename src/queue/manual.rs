use super::{Job, JobContext, TaskQueue};
use crate::errors::AppResult;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct ManualJob {
    job_id: String,
    name: String,
    countdown: Duration,
    job: Job,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    pending: Vec<ManualJob>,
    executed: Vec<String>,
    revoked: Vec<String>,
    failed: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ManualQueue {
    state: Arc<Mutex<ManualState>>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut self.state().pending);
        let count = jobs.len();
        for ManualJob { job_id, name, job, .. } in jobs {
            let context = JobContext {
                job_id: job_id.clone(),
                name,
            };
            let outcome = job(&context);
            let mut state = self.state();
            state.executed.push(job_id.clone());
            if let Err(error) = outcome {
                tracing::warn!(job_id = %job_id, error = %error, "manual job failed");
                state.failed.push(job_id);
            }
        }
        count
    }

    pub fn pending(&self) -> Vec<(String, String, Duration)> {
        self.state()
            .pending
            .iter()
            .map(|job| (job.job_id.clone(), job.name.clone(), job.countdown))
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.state().revoked.clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.state().failed.clone()
    }
}

impl TaskQueue for ManualQueue {
    fn enqueue(&self, name: &str, job: Job, countdown: Duration) -> AppResult<String> {
        let mut state = self.state();
        state.next_id += 1;
        let job_id = format!("job-{}", state.next_id);
        state.pending.push(ManualJob {
            job_id: job_id.clone(),
            name: name.to_string(),
            countdown,
            job,
        });
        Ok(job_id)
    }

    fn revoke(&self, job_id: &str) -> AppResult<bool> {
        let mut state = self.state();
        let Some(index) = state.pending.iter().position(|job| job.job_id == job_id) else {
            return Ok(false);
        };
        state.pending.remove(index);
        state.revoked.push(job_id.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::ManualQueue;
    use crate::errors::AppError;
    use crate::queue::{JobContext, TaskQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_only_unrevoked_jobs() {
        let queue = ManualQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let counter = counter.clone();
            let id = queue
                .enqueue(
                    "count",
                    Box::new(move |_: &JobContext| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    Duration::from_secs(1),
                )
                .expect("enqueue");
            ids.push(id);
        }
        assert!(queue.revoke(&ids[0]).expect("revoke"));
        assert!(!queue.revoke("job-unknown").expect("unknown revoke"));

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(queue.executed(), vec![ids[1].clone(), ids[2].clone()]);
        assert_eq!(queue.revoked(), vec![ids[0].clone()]);
        assert!(!queue.revoke(&ids[1]).expect("revoking a finished job is a no-op"));
    }

    #[test]
    fn records_failed_jobs() {
        let queue = ManualQueue::new();
        let id = queue
            .enqueue(
                "fail",
                Box::new(|_: &JobContext| Err(AppError::Store("offline".to_string()))),
                Duration::ZERO,
            )
            .expect("enqueue");
        queue.run_pending();
        assert_eq!(queue.failed(), vec![id]);
    }
}
