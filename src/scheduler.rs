use crate::cache::CacheBackend;
use crate::errors::{AppError, AppResult};
use crate::keys;
use crate::queue::{Job, JobContext, TaskQueue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Scheduled,
    Running,
    Failed,
}

// Bookkeeping stored under `rebuild_<target>_task_id`.
//
// The ticket is written before the job is enqueued, so a job that starts
// immediately can still tell whether it is the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskRecord {
    pub ticket: String,
    pub job_id: Option<String>,
    pub state: TaskState,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildState {
    Idle,
    Scheduled { job_id: Option<String> },
    Running { job_id: Option<String> },
    Failed { job_id: Option<String>, error: Option<String> },
}

#[derive(Clone)]
pub struct RebuildScheduler {
    cache: Arc<dyn CacheBackend>,
    queue: Arc<dyn TaskQueue>,
}

impl RebuildScheduler {
    pub fn new(cache: Arc<dyn CacheBackend>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { cache, queue }
    }

    pub fn schedule_rebuild<T, F>(&self, target_key: &str, builder: F, delay: Duration) -> AppResult<String>
    where
        T: Serialize,
        F: FnOnce() -> AppResult<T> + Send + 'static,
    {
        let task_key = keys::rebuild_task_key(target_key);
        self.revoke_queued_task(&task_key)?;

        let ticket = Uuid::new_v4().to_string();
        write_record(
            self.cache.as_ref(),
            &task_key,
            &TaskRecord {
                ticket: ticket.clone(),
                job_id: None,
                state: TaskState::Scheduled,
                updated_at: Utc::now(),
                error: None,
            },
        )?;

        let job = rebuild_job(self.cache.clone(), target_key.to_string(), ticket.clone(), builder);
        let job_id = match self.queue.enqueue(&format!("rebuild {target_key}"), job, delay) {
            Ok(job_id) => job_id,
            Err(error) => {
                if current_ticket(self.cache.as_ref(), &task_key)?.as_deref() == Some(ticket.as_str()) {
                    self.cache.delete(&task_key)?;
                }
                return Err(error);
            }
        };

        // A job that already started records its own id. Only a job finishing
        // between this read and the write can still leave a stale record, and
        // the next schedule replaces it.
        if let Some(mut record) = read_record(self.cache.as_ref(), &task_key)? {
            if record.ticket == ticket && record.state == TaskState::Scheduled {
                record.job_id = Some(job_id.clone());
                write_record(self.cache.as_ref(), &task_key, &record)?;
            }
        }

        tracing::info!(
            target_key = %target_key,
            job_id = %job_id,
            delay_ms = delay.as_millis() as u64,
            "scheduled rebuild"
        );
        Ok(job_id)
    }

    pub fn revoke_queued_task(&self, task_id_key: &str) -> AppResult<bool> {
        let Some(record) = read_record(self.cache.as_ref(), task_id_key)? else {
            return Ok(false);
        };
        let Some(job_id) = record.job_id else {
            tracing::debug!(task_key = %task_id_key, "no job id recorded yet; nothing to revoke");
            return Ok(false);
        };
        match self.queue.revoke(&job_id) {
            Ok(revoked) => {
                tracing::debug!(task_key = %task_id_key, job_id = %job_id, revoked, "revoke requested");
                Ok(revoked)
            }
            Err(error) => {
                tracing::warn!(task_key = %task_id_key, job_id = %job_id, error = %error, "revoke failed");
                Ok(false)
            }
        }
    }

    pub fn task_record(&self, target_key: &str) -> AppResult<Option<TaskRecord>> {
        read_record(self.cache.as_ref(), &keys::rebuild_task_key(target_key))
    }

    pub fn rebuild_state(&self, target_key: &str) -> AppResult<RebuildState> {
        let Some(record) = self.task_record(target_key)? else {
            return Ok(RebuildState::Idle);
        };
        Ok(match record.state {
            TaskState::Scheduled => RebuildState::Scheduled { job_id: record.job_id },
            TaskState::Running => RebuildState::Running { job_id: record.job_id },
            TaskState::Failed => RebuildState::Failed {
                job_id: record.job_id,
                error: record.error,
            },
        })
    }
}

fn rebuild_job<T, F>(cache: Arc<dyn CacheBackend>, target_key: String, ticket: String, builder: F) -> Job
where
    T: Serialize,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    Box::new(move |context: &JobContext| run_rebuild(cache.as_ref(), &target_key, &ticket, context, builder))
}

fn run_rebuild<T, F>(
    cache: &dyn CacheBackend,
    target_key: &str,
    ticket: &str,
    context: &JobContext,
    builder: F,
) -> AppResult<()>
where
    T: Serialize,
    F: FnOnce() -> AppResult<T>,
{
    let task_key = keys::rebuild_task_key(target_key);
    match read_record(cache, &task_key)? {
        Some(record) if record.ticket != ticket => {
            tracing::debug!(target_key = %target_key, job_id = %context.job_id, "rebuild superseded; skipping");
            return Ok(());
        }
        Some(mut record) => {
            record.state = TaskState::Running;
            record.job_id.get_or_insert_with(|| context.job_id.clone());
            record.updated_at = Utc::now();
            write_record(cache, &task_key, &record)?;
        }
        None => {
            tracing::debug!(target_key = %target_key, job_id = %context.job_id, "rebuild has no task record");
        }
    }

    let outcome = builder().and_then(|value| {
        let encoded = serde_json::to_string(&value)?;
        cache.set(target_key, &encoded, None)
    });

    if let Err(error) = outcome {
        mark_failed(cache, &task_key, ticket, &error);
        return Err(error);
    }

    if current_ticket(cache, &task_key)?.as_deref() == Some(ticket) {
        cache.delete(&task_key)?;
    }
    tracing::info!(target_key = %target_key, job_id = %context.job_id, "rebuild complete");
    Ok(())
}

// The record is kept after a failure so the next schedule revokes and
// replaces it rather than stacking a second job.
fn mark_failed(cache: &dyn CacheBackend, task_key: &str, ticket: &str, failure: &AppError) {
    let update = read_record(cache, task_key).and_then(|record| match record {
        Some(mut record) if record.ticket == ticket => {
            record.state = TaskState::Failed;
            record.error = Some(failure.to_string());
            record.updated_at = Utc::now();
            write_record(cache, task_key, &record)
        }
        _ => Ok(()),
    });
    if let Err(error) = update {
        tracing::warn!(task_key = %task_key, error = %error, "failed to record rebuild failure");
    }
}

fn current_ticket(cache: &dyn CacheBackend, task_key: &str) -> AppResult<Option<String>> {
    Ok(read_record(cache, task_key)?.map(|record| record.ticket))
}

fn read_record(cache: &dyn CacheBackend, task_key: &str) -> AppResult<Option<TaskRecord>> {
    let Some(raw) = cache.get(task_key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(error) => {
            tracing::warn!(task_key = %task_key, error = %error, "discarding unreadable task record");
            Ok(None)
        }
    }
}

fn write_record(cache: &dyn CacheBackend, task_key: &str, record: &TaskRecord) -> AppResult<()> {
    cache.set(task_key, &serde_json::to_string(record)?, None)
}
