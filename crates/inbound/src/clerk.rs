//! Job clerk: a queue of job closures run one at a time on a blocking worker
//!
//! Statuses move `in_queue → running → done | error`. The dispatcher writes
//! `running`; the worker writes the final state. A panicking job is caught at
//! the worker boundary and recorded as `error` by the dispatcher, so one bad
//! job never stops the queue.

use chrono::{DateTime, Utc};
use inbound_common::{InboundError, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ClerkConfig;

/// A queued unit of work; `Ok(Some(..))` becomes the job result
pub type JobFn = Box<dyn FnOnce() -> anyhow::Result<Option<serde_json::Value>> + Send + 'static>;

/// Lifecycle state of a clerk-managed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    InQueue,
    Running,
    Done,
    Error,
}

/// Snapshot of one job's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub job_result: Option<serde_json::Value>,
}

type StatusTable = Arc<RwLock<HashMap<String, JobStatus>>>;

struct QueuedJob {
    id: String,
    job: JobFn,
}

/// Owns the job queue and the dispatcher task.
pub struct JobClerk {
    sender: mpsc::Sender<QueuedJob>,
    statuses: StatusTable,
    dispatcher: JoinHandle<()>,
}

impl JobClerk {
    /// Spawn the dispatcher on the current tokio runtime
    pub fn start(config: &ClerkConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let statuses = StatusTable::default();
        let dispatcher = tokio::spawn(dispatch(receiver, statuses.clone()));

        info!(queue_capacity = config.queue_capacity, "Job clerk started");
        Self {
            sender,
            statuses,
            dispatcher,
        }
    }

    /// Register and enqueue `job`, waiting for queue space if necessary.
    ///
    /// Without an id a UUID v4 is generated.
    pub async fn run_job<F>(&self, job: F, job_id: Option<String>) -> Result<JobStatus>
    where
        F: FnOnce() -> anyhow::Result<Option<serde_json::Value>> + Send + 'static,
    {
        let id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = Utc::now();
        let status = JobStatus {
            job_id: id.clone(),
            status: JobState::InQueue,
            created_at,
            updated_at: created_at,
            job_result: None,
        };

        self.statuses.write().await.insert(id.clone(), status.clone());

        let queued = QueuedJob {
            id: id.clone(),
            job: Box::new(job),
        };
        if self.sender.send(queued).await.is_err() {
            self.statuses.write().await.remove(&id);
            return Err(InboundError::Job("job queue is closed".to_string()));
        }

        debug!(job_id = %id, "Job queued");
        Ok(status)
    }

    pub async fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.read().await.get(job_id).cloned()
    }

    /// Close the queue and wait until every queued job has finished
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.dispatcher
            .await
            .map_err(|e| InboundError::Job(format!("dispatcher task failed: {}", e)))?;
        info!("Job clerk stopped");
        Ok(())
    }
}

async fn set_state(statuses: &StatusTable, job_id: &str, state: JobState, result: Option<serde_json::Value>) {
    let mut table = statuses.write().await;
    if let Some(status) = table.get_mut(job_id) {
        status.status = state;
        status.updated_at = Utc::now();
        if result.is_some() {
            status.job_result = result;
        }
    }
}

fn error_result(message: impl std::fmt::Display) -> serde_json::Value {
    json!({ "error_message": message.to_string() })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Runs on the blocking pool; records `done` or `error`.
fn run_worker(job: QueuedJob, statuses: StatusTable) {
    let (state, result) = match (job.job)() {
        Ok(result) => (JobState::Done, result),
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Job failed");
            (JobState::Error, Some(error_result(format!("{:#}", e))))
        },
    };

    let mut table = statuses.blocking_write();
    if let Some(status) = table.get_mut(&job.id) {
        status.status = state;
        status.updated_at = Utc::now();
        status.job_result = result;
    }
}

#[instrument(skip_all)]
async fn dispatch(mut receiver: mpsc::Receiver<QueuedJob>, statuses: StatusTable) {
    while let Some(job) = receiver.recv().await {
        let job_id = job.id.clone();
        set_state(&statuses, &job_id, JobState::Running, None).await;
        info!(job_id = %job_id, "Job started");

        let worker_statuses = statuses.clone();
        match tokio::task::spawn_blocking(move || run_worker(job, worker_statuses)).await {
            Ok(()) => {
                info!(job_id = %job_id, "Job finished");
            },
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic().as_ref());
                error!(job_id = %job_id, panic = %message, "Job panicked");
                set_state(&statuses, &job_id, JobState::Error, Some(error_result(message))).await;
            },
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job worker cancelled");
                set_state(&statuses, &job_id, JobState::Error, Some(error_result(e))).await;
            },
        }
    }
    debug!("Job queue closed");
}
