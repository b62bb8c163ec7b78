use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ExecutionEvent,
    states::BatchStatus,
};
use crate::models::{JobExecution, StepExecution};
use crate::repository::{JobRepository, RepositoryError};

/// How often a job transition is re-applied after losing an optimistic-lock race
const MAX_CONFLICT_RETRIES: usize = 3;

/// Determine the target status for `event` applied to `current`
pub fn determine_target_state(
    current: BatchStatus,
    event: &ExecutionEvent,
) -> StateMachineResult<BatchStatus> {
    let target = match (current, event) {
        (BatchStatus::Starting, ExecutionEvent::Start) => BatchStatus::Started,

        // A stop request that arrives after the last chunk committed loses to completion
        (BatchStatus::Started | BatchStatus::Stopping, ExecutionEvent::Complete) => {
            BatchStatus::Completed
        }

        (
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping,
            ExecutionEvent::Fail(_),
        ) => BatchStatus::Failed,

        (BatchStatus::Starting | BatchStatus::Started, ExecutionEvent::RequestStop) => {
            BatchStatus::Stopping
        }

        (
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping,
            ExecutionEvent::Stop,
        ) => BatchStatus::Stopped,

        (from, _) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    debug_assert!(current.can_transition_to(target));
    Ok(target)
}

/// Records that move through the batch status lifecycle
pub trait ExecutionRecord {
    fn status(&self) -> BatchStatus;

    /// Apply an already-validated transition to the in-memory record
    fn record_transition(&mut self, target: BatchStatus, event: &ExecutionEvent);
}

macro_rules! impl_execution_record {
    ($ty:ty) => {
        impl ExecutionRecord for $ty {
            fn status(&self) -> BatchStatus {
                self.status
            }

            fn record_transition(&mut self, target: BatchStatus, event: &ExecutionEvent) {
                let now = Utc::now();
                if target == BatchStatus::Started && self.start_time.is_none() {
                    self.start_time = Some(now);
                }
                if target.is_terminal() {
                    self.end_time = Some(now);
                }
                if let Some(message) = event.error_message() {
                    self.exit_description = Some(message.to_string());
                }
                self.status = target;
            }
        }
    };
}

impl_execution_record!(JobExecution);
impl_execution_record!(StepExecution);

/// Validates and persists job and step execution transitions
///
/// Every transition is written through the repository before the caller sees
/// the new status, so an in-memory record never runs ahead of what a restart
/// would observe.
#[derive(Clone)]
pub struct ExecutionStateMachine {
    repository: Arc<dyn JobRepository>,
}

impl std::fmt::Debug for ExecutionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStateMachine").finish_non_exhaustive()
    }
}

impl ExecutionStateMachine {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Transition a job execution, re-reading it when a concurrent writer won
    ///
    /// The only concurrent writer is a stop request, so on conflict the event
    /// is re-evaluated against the freshly loaded status. Transitions that are
    /// no longer legal (for example `Start` after the job was already stopped)
    /// surface as [`StateMachineError::InvalidTransition`] with the reloaded
    /// record left in `execution`.
    pub async fn transition_job(
        &self,
        execution: &mut JobExecution,
        event: ExecutionEvent,
    ) -> StateMachineResult<BatchStatus> {
        let mut attempts = 0;
        loop {
            let from = execution.status;
            let target = determine_target_state(from, &event)?;
            let mut candidate = execution.clone();
            candidate.record_transition(target, &event);

            match self.repository.update_job_execution(&mut candidate).await {
                Ok(()) => {
                    debug!(
                        job_execution_id = execution.id,
                        from = %from,
                        to = %target,
                        event = event.event_type(),
                        "Job execution transitioned"
                    );
                    *execution = candidate;
                    return Ok(target);
                }
                Err(RepositoryError::OptimisticLock { .. }) if attempts < MAX_CONFLICT_RETRIES => {
                    attempts += 1;
                    warn!(
                        job_execution_id = execution.id,
                        event = event.event_type(),
                        attempt = attempts,
                        "Concurrent job execution update, reloading"
                    );
                    self.refresh_job(execution).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Transition a step execution; steps have a single writer
    pub async fn transition_step(
        &self,
        step: &mut StepExecution,
        event: ExecutionEvent,
    ) -> StateMachineResult<BatchStatus> {
        let from = step.status;
        let target = determine_target_state(from, &event)?;
        let mut candidate = step.clone();
        candidate.record_transition(target, &event);
        self.repository.update_step_execution(&mut candidate).await?;

        debug!(
            step_execution_id = step.id,
            step_name = %step.step_name,
            from = %from,
            to = %target,
            event = event.event_type(),
            "Step execution transitioned"
        );
        *step = candidate;
        Ok(target)
    }

    /// Replace `execution` with the persisted record
    pub async fn refresh_job(&self, execution: &mut JobExecution) -> StateMachineResult<()> {
        let fresh = self
            .repository
            .get_job_execution(execution.id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "job execution",
                id: execution.id,
            })?;
        *execution = fresh;
        Ok(())
    }

    /// Ask a running execution to stop at its next chunk boundary
    pub async fn request_stop(&self, execution_id: i64) -> StateMachineResult<JobExecution> {
        let mut execution = self
            .repository
            .get_job_execution(execution_id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity: "job execution",
                id: execution_id,
            })?;

        if execution.status == BatchStatus::Stopping {
            return Ok(execution);
        }
        self.transition_job(&mut execution, ExecutionEvent::RequestStop)
            .await?;
        Ok(execution)
    }
}
