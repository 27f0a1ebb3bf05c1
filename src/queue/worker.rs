use super::{Job, JobContext, TaskQueue};
use crate::errors::{AppError, AppResult};
use crate::settings::CacheSettings;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use uuid::Uuid;

struct QueuedJob {
    job_id: String,
    name: String,
    queued_at: DateTime<Utc>,
    not_before: DateTime<Utc>,
    job: Job,
}

#[derive(Clone)]
pub struct WorkerQueue {
    pending: Arc<Mutex<Vec<QueuedJob>>>,
    running: Arc<Mutex<HashSet<String>>>,
    notify: Arc<Notify>,
    handle: Handle,
    worker_limit: usize,
    max_queue_size: usize,
}

impl WorkerQueue {
    pub fn new(handle: Handle, worker_limit: usize, max_queue_size: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(Mutex::new(HashSet::new())),
            notify: Arc::new(Notify::new()),
            handle,
            worker_limit: worker_limit.max(1),
            max_queue_size,
        }
    }

    pub fn from_settings(handle: Handle, settings: &CacheSettings) -> Self {
        Self::new(handle, settings.worker_limit, settings.max_queue_size)
    }

    pub fn start(&self) {
        let queue = self.clone();
        self.handle.spawn(async move {
            queue.run_loop().await;
        });
    }

    pub fn pending_len(&self) -> AppResult<usize> {
        Ok(self.pending()?.len())
    }

    fn pending(&self) -> AppResult<MutexGuard<'_, Vec<QueuedJob>>> {
        self.pending.lock().map_err(|_| AppError::poisoned("worker queue"))
    }

    fn running(&self) -> AppResult<MutexGuard<'_, HashSet<String>>> {
        self.running.lock().map_err(|_| AppError::poisoned("worker running set"))
    }

    async fn run_loop(self) {
        loop {
            self.notify.notified().await;
            loop {
                let (maybe_job, next_delay) = match self.pick_next_job() {
                    Ok(next) => next,
                    Err(error) => {
                        tracing::error!(error = %error, "worker queue could not pick next job");
                        break;
                    }
                };
                let Some(job) = maybe_job else {
                    if let Some(delay) = next_delay {
                        let notify = self.notify.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            notify.notify_one();
                        });
                    }
                    break;
                };

                let queue = self.clone();
                tokio::spawn(async move {
                    queue.execute(job).await;
                    queue.notify.notify_one();
                });
            }
        }
    }

    fn pick_next_job(&self) -> AppResult<(Option<QueuedJob>, Option<Duration>)> {
        let mut running = self.running()?;
        if running.len() >= self.worker_limit {
            return Ok((None, None));
        }

        let mut pending = self.pending()?;
        if pending.is_empty() {
            return Ok((None, None));
        }

        let now = Utc::now();
        let ready_index = pending
            .iter()
            .enumerate()
            .filter(|(_, job)| job.not_before <= now)
            .min_by_key(|(_, job)| (job.not_before, job.queued_at))
            .map(|(index, _)| index);

        let Some(index) = ready_index else {
            let delay = pending.iter().map(|job| job.not_before).min().map(|at| {
                let diff = at.signed_duration_since(now).num_milliseconds();
                Duration::from_millis(diff.max(0) as u64)
            });
            return Ok((None, delay));
        };

        let job = pending.remove(index);
        running.insert(job.job_id.clone());
        Ok((Some(job), None))
    }

    async fn execute(&self, queued: QueuedJob) {
        let QueuedJob { job_id, name, job, .. } = queued;
        let context = JobContext {
            job_id: job_id.clone(),
            name: name.clone(),
        };

        match tokio::task::spawn_blocking(move || job(&context)).await {
            Ok(Ok(())) => {
                tracing::debug!(job_id = %job_id, name = %name, "background job finished");
            }
            Ok(Err(error)) => {
                tracing::warn!(job_id = %job_id, name = %name, error = %error, "background job failed");
            }
            Err(error) => {
                tracing::error!(job_id = %job_id, name = %name, error = %error, "background job panicked");
            }
        }

        match self.running() {
            Ok(mut running) => {
                running.remove(&job_id);
            }
            Err(error) => {
                tracing::error!(job_id = %job_id, error = %error, "failed to release worker slot");
            }
        }
    }
}

impl TaskQueue for WorkerQueue {
    fn enqueue(&self, name: &str, job: Job, countdown: Duration) -> AppResult<String> {
        let countdown = chrono::Duration::from_std(countdown)
            .map_err(|error| AppError::Queue(format!("invalid countdown: {error}")))?;
        let now = Utc::now();
        let job_id = Uuid::new_v4().to_string();
        {
            let mut pending = self.pending()?;
            if pending.len() >= self.max_queue_size {
                return Err(AppError::Queue(format!(
                    "Queue capacity exceeded (max {}).",
                    self.max_queue_size
                )));
            }
            pending.push(QueuedJob {
                job_id: job_id.clone(),
                name: name.to_string(),
                queued_at: now,
                not_before: now + countdown,
                job,
            });
        }
        self.notify.notify_one();
        Ok(job_id)
    }

    fn revoke(&self, job_id: &str) -> AppResult<bool> {
        let mut pending = self.pending()?;
        let Some(index) = pending.iter().position(|job| job.job_id == job_id) else {
            tracing::debug!(job_id = %job_id, "revoke ignored for running or unknown job");
            return Ok(false);
        };
        pending.remove(index);
        Ok(true)
    }
}
