//! # Step Executor
//!
//! Runs one [`Step`] inside a job execution and records everything a restart
//! needs.
//!
//! ## Overview
//!
//! 1. Looks up the latest execution of the step across the whole job instance.
//!    A COMPLETED step is skipped unless it allows starting again; a step that
//!    hit its `start_limit` is refused.
//! 2. Creates a new [`StepExecution`], seeded with the previous execution
//!    context when the previous attempt did not complete, and moves it to
//!    STARTED.
//! 3. Runs the step with a [`RepositoryCommitHook`] that opens each chunk's
//!    transaction, commits it together with the counts and context, and checks
//!    whether the job is STOPPING.
//! 4. Records COMPLETED, STOPPED or FAILED from the step outcome.
//!
//! Repository failures abort immediately and are returned to the caller; the
//! executor never keeps reading after it could not record progress.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{instrument, warn};

use super::pipeline::{ChunkCommitHook, ChunkControl, PipelineOutcome};
use super::Step;
use crate::constants::events;
use crate::error::BatchError;
use crate::logging::log_step_operation;
use crate::models::{JobExecution, StepExecution};
use crate::repository::{ChunkTransaction, JobRepository, RepositoryError};
use crate::state_machine::{BatchStatus, ExecutionEvent, ExecutionStateMachine};

/// Commits each chunk with its checkpoint and reports a pending stop request
pub struct RepositoryCommitHook {
    repository: Arc<dyn JobRepository>,
    job_execution_id: i64,
}

impl RepositoryCommitHook {
    pub fn new(repository: Arc<dyn JobRepository>, job_execution_id: i64) -> Self {
        Self {
            repository,
            job_execution_id,
        }
    }
}

#[async_trait]
impl ChunkCommitHook for RepositoryCommitHook {
    async fn begin(&mut self) -> Result<ChunkTransaction, BatchError> {
        Ok(self.repository.begin_chunk().await?)
    }

    async fn commit(
        &mut self,
        transaction: ChunkTransaction,
        step: &mut StepExecution,
    ) -> Result<ChunkControl, BatchError> {
        self.repository.commit_chunk(transaction, step).await?;

        let job = self
            .repository
            .get_job_execution(self.job_execution_id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "job execution",
                id: self.job_execution_id,
            })?;

        Ok(if job.is_stopping() {
            ChunkControl::Stop
        } else {
            ChunkControl::Continue
        })
    }
}

/// Result of asking the executor to run a step
#[derive(Debug, Clone)]
pub enum StepResult {
    /// The step completed in an earlier execution of this instance and was not run
    AlreadyComplete(StepExecution),
    Executed(StepExecution),
}

impl StepResult {
    pub fn execution(&self) -> &StepExecution {
        match self {
            Self::AlreadyComplete(step) | Self::Executed(step) => step,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.execution().status
    }
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    state_machine: ExecutionStateMachine,
}

impl StepExecutor {
    pub fn new(state_machine: ExecutionStateMachine) -> Self {
        Self { state_machine }
    }

    #[instrument(skip_all, fields(step_name = step.name(), job_execution_id = job_execution.id))]
    pub async fn execute(
        &self,
        step: &dyn Step,
        job_execution: &JobExecution,
    ) -> Result<StepResult, BatchError> {
        let repository = self.state_machine.repository();
        let last = repository
            .find_last_step_execution(job_execution.job_instance_id, step.name())
            .await?;

        if let Some(last) = &last {
            if last.status == BatchStatus::Completed && !step.allow_start_if_complete() {
                log_step_operation(
                    events::STEP_SKIPPED_COMPLETE,
                    Some(job_execution.id),
                    Some(last.id),
                    step.name(),
                    last.status.as_str(),
                    None,
                );
                return Ok(StepResult::AlreadyComplete(last.clone()));
            }
        }

        if let Some(limit) = step.start_limit() {
            let started = repository
                .count_step_executions(job_execution.job_instance_id, step.name())
                .await?;
            if started >= limit {
                return Err(BatchError::StartLimitExceeded {
                    step_name: step.name().to_string(),
                    limit,
                });
            }
        }

        let mut execution = StepExecution::new(step.name(), job_execution.id);
        if let Some(last) = last.filter(|l| l.status != BatchStatus::Completed) {
            execution.execution_context = last.execution_context;
        }
        repository.add_step_execution(&mut execution).await?;
        self.state_machine
            .transition_step(&mut execution, ExecutionEvent::Start)
            .await?;
        log_step_operation(
            events::STEP_STARTED,
            Some(job_execution.id),
            Some(execution.id),
            step.name(),
            execution.status.as_str(),
            None,
        );

        let mut hook = RepositoryCommitHook::new(Arc::clone(repository), job_execution.id);
        let outcome = step
            .execute(&mut execution, &job_execution.parameters, &mut hook)
            .await;

        let (event, operation) = match outcome {
            Ok(PipelineOutcome::Completed) => (ExecutionEvent::Complete, events::STEP_COMPLETED),
            Ok(PipelineOutcome::Stopped) => (ExecutionEvent::Stop, events::STEP_STOPPED),
            Ok(PipelineOutcome::Failed(message)) => {
                (ExecutionEvent::Fail(message), events::STEP_FAILED)
            }
            Err(e) => {
                if let Err(record_err) = self
                    .state_machine
                    .transition_step(&mut execution, ExecutionEvent::Fail(e.to_string()))
                    .await
                {
                    warn!(
                        step_execution_id = execution.id,
                        error = %record_err,
                        "Could not record step failure"
                    );
                }
                return Err(e);
            }
        };

        self.state_machine
            .transition_step(&mut execution, event)
            .await?;
        log_step_operation(
            operation,
            Some(job_execution.id),
            Some(execution.id),
            step.name(),
            execution.status.as_str(),
            execution.exit_description.as_deref(),
        );
        Ok(StepResult::Executed(execution))
    }
}
