use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::defs::Job;
use crate::defs::JobOutcome;
use crate::defs::JobRecord;
use crate::defs::JobStatus;
use crate::defs::JobTracker;

/// Keeps job records in process memory. Good enough for a one-shot CLI run
/// and for tests; a service would put these rows in a database.
#[derive(Default)]
pub struct MemoryJobTracker {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn create_job(&self, job_name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let record = JobRecord {
            id,
            job_name: job_name.to_owned(),
            status: JobStatus::Pending,
            message: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus, message: Option<String>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;
        record.status = status;
        record.message = message;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(&job_id).cloned())
    }
}

/// Create a pending record, run the job, and record how it ended.
///
/// A panicking job is recorded as failed; the panic does not reach the caller.
pub async fn run_tracked(tracker: &dyn JobTracker, job: &dyn Job) -> Result<(Uuid, JobOutcome)> {
    let name = job.job_name();
    let job_id = tracker.create_job(&name).await?;
    info!("Started job {} ({})", name, job_id);

    let outcome = match AssertUnwindSafe(job.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "job panicked".to_owned());
            JobOutcome::error(reason)
        }
    };

    let status = if outcome.is_success() {
        JobStatus::Completed
    } else {
        error!("Job {} ({}) failed: {}", name, job_id, outcome.message);
        JobStatus::Failed
    };
    tracker.update_status(job_id, status, Some(outcome.message.clone())).await?;

    Ok((job_id, outcome))
}
