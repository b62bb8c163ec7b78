use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobInstance, JobParameters};
use crate::state_machine::BatchStatus;

/// One attempt to run a job with a specific parameter set
///
/// Ids are assigned by the repository; `id == 0` means "not yet persisted".
/// `version` is bumped by every successful repository update and guards
/// against lost updates between the runner and a concurrent stop request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub job_instance_id: i64,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub version: i32,
}

impl JobExecution {
    pub fn new(instance: &JobInstance, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            job_instance_id: instance.id,
            job_name: instance.job_name.clone(),
            parameters,
            status: BatchStatus::Starting,
            exit_description: None,
            created_at: now,
            start_time: None,
            end_time: None,
            last_updated: now,
            version: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    /// Wall-clock duration, if the execution has both started and ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
