use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobExecution, StepExecution};
use crate::state_machine::BatchStatus;

/// Externally observable state of one job execution
///
/// This is the whole status surface: status, counts and exit descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub job_execution_id: i64,
    pub job_instance_id: i64,
    pub job_name: String,
    pub status: BatchStatus,
    pub exit_description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_description: Option<String>,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub retry_count: u64,
}

impl From<&StepExecution> for StepSummary {
    fn from(step: &StepExecution) -> Self {
        Self {
            step_execution_id: step.id,
            step_name: step.step_name.clone(),
            status: step.status,
            exit_description: step.exit_description.clone(),
            read_count: step.read_count,
            write_count: step.write_count,
            skip_count: step.skip_count(),
            filter_count: step.filter_count,
            commit_count: step.commit_count,
            rollback_count: step.rollback_count,
            retry_count: step.retry_count,
        }
    }
}

impl ExecutionSummary {
    pub fn new(job: &JobExecution, steps: &[StepExecution]) -> Self {
        let steps: Vec<StepSummary> = steps.iter().map(StepSummary::from).collect();
        Self {
            job_execution_id: job.id,
            job_instance_id: job.job_instance_id,
            job_name: job.job_name.clone(),
            status: job.status,
            exit_description: job.exit_description.clone(),
            start_time: job.start_time,
            end_time: job.end_time,
            read_count: steps.iter().map(|s| s.read_count).sum(),
            write_count: steps.iter().map(|s| s.write_count).sum(),
            skip_count: steps.iter().map(|s| s.skip_count).sum(),
            filter_count: steps.iter().map(|s| s.filter_count).sum(),
            commit_count: steps.iter().map(|s| s.commit_count).sum(),
            steps,
        }
    }
}
