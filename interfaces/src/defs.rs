use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// What a job hands back to whoever launched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl JobOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// Object style note:
// Jobs are expected to run inside short lived single-task processes.
// A job owns its configuration and collaborators; `run` is called once
// and must turn every failure into an error outcome instead of returning Err.

#[async_trait]
pub trait Job: Send + Sync {
    fn job_name(&self) -> String;

    async fn run(&self) -> JobOutcome;
}

/// Bookkeeping for job lifecycles (pending -> completed | failed).
#[async_trait]
pub trait JobTracker: Send + Sync {
    async fn create_job(&self, job_name: &str) -> Result<Uuid>;

    async fn update_status(&self, job_id: Uuid, status: JobStatus, message: Option<String>) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>>;
}
