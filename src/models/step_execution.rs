//! # Step Execution
//!
//! Per-step attempt record with the counters that make a chunk-oriented step
//! auditable and restartable.
//!
//! Counters only move when a chunk commits: the pipeline accumulates a
//! [`StepContribution`] while a chunk is in flight and folds it into the
//! execution with [`StepExecution::apply_contribution`] once the write succeeded.
//! A chunk that rolls back contributes nothing except a rollback tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExecutionContext;
use crate::state_machine::BatchStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub retry_count: u64,
    pub execution_context: ExecutionContext,
    pub exit_description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub version: i32,
}

impl StepExecution {
    pub fn new(step_name: impl Into<String>, job_execution_id: i64) -> Self {
        Self {
            id: 0,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            retry_count: 0,
            execution_context: ExecutionContext::new(),
            exit_description: None,
            start_time: None,
            end_time: None,
            last_updated: Utc::now(),
            version: 0,
        }
    }

    /// Total skips across the read, process and write stages
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Fold a committed chunk's contribution into the running totals
    pub fn apply_contribution(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.retry_count += contribution.retry_count;
        self.commit_count += 1;
    }
}

/// Counts accumulated by a single in-flight chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepContribution {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub retry_count: u64,
}

impl StepContribution {
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contribution_applies_on_commit() {
        let mut step = StepExecution::new("import", 1);
        let contribution = StepContribution {
            read_count: 5,
            write_count: 4,
            process_skip_count: 1,
            retry_count: 2,
            ..Default::default()
        };

        step.apply_contribution(&contribution);
        step.apply_contribution(&contribution);

        assert_eq!(step.read_count, 10);
        assert_eq!(step.write_count, 8);
        assert_eq!(step.skip_count(), 2);
        assert_eq!(step.retry_count, 4);
        assert_eq!(step.commit_count, 2);
        assert_eq!(step.rollback_count, 0);
    }
}
