use tracing::{instrument, warn};

use super::Job;
use crate::constants::events;
use crate::error::BatchError;
use crate::logging::log_job_operation;
use crate::models::JobExecution;
use crate::state_machine::{BatchStatus, ExecutionEvent, ExecutionStateMachine, StateMachineError};
use crate::step::{StepExecutor, StepResult};

/// Executes the steps of one accepted job execution in order
///
/// The runner is the single writer of its execution apart from stop requests,
/// which it observes by re-reading the execution before every step and after
/// every commit.
#[derive(Debug, Clone)]
pub struct JobRunner {
    state_machine: ExecutionStateMachine,
    step_executor: StepExecutor,
}

impl JobRunner {
    pub fn new(state_machine: ExecutionStateMachine) -> Self {
        Self {
            step_executor: StepExecutor::new(state_machine.clone()),
            state_machine,
        }
    }

    /// Run `execution` to a terminal status
    ///
    /// Step failures end in a FAILED execution and `Ok`; an `Err` means the
    /// repository could not record progress and the execution was abandoned
    /// where it stood.
    #[instrument(skip_all, fields(job_name = job.name(), job_execution_id = execution.id))]
    pub async fn run(&self, job: &Job, mut execution: JobExecution) -> Result<JobExecution, BatchError> {
        match self
            .state_machine
            .transition_job(&mut execution, ExecutionEvent::Start)
            .await
        {
            Ok(_) => {}
            Err(StateMachineError::InvalidTransition { .. }) if execution.is_stopping() => {
                self.finish(job, &mut execution, ExecutionEvent::Stop).await?;
                return Ok(execution);
            }
            Err(e) => return Err(e.into()),
        }
        log_job_operation(
            events::JOB_STARTED,
            job.name(),
            Some(execution.id),
            execution.status.as_str(),
            None,
        );

        match self.run_steps(job, &mut execution).await {
            Ok(event) => {
                self.finish(job, &mut execution, event).await?;
                Ok(execution)
            }
            Err(e) => {
                if let Err(record_err) = self
                    .state_machine
                    .transition_job(&mut execution, ExecutionEvent::Fail(e.to_string()))
                    .await
                {
                    warn!(error = %record_err, "Could not record job failure");
                }
                Err(e)
            }
        }
    }

    /// Run every step and return the event that ends the job
    async fn run_steps(
        &self,
        job: &Job,
        execution: &mut JobExecution,
    ) -> Result<ExecutionEvent, BatchError> {
        for step in job.steps() {
            self.state_machine.refresh_job(execution).await?;
            if execution.is_stopping() {
                return Ok(ExecutionEvent::Stop);
            }

            let result = match self.step_executor.execute(step.as_ref(), execution).await {
                Ok(result) => result,
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => return Ok(ExecutionEvent::Fail(e.to_string())),
            };

            match result {
                StepResult::AlreadyComplete(_) => {}
                StepResult::Executed(step_execution) => match step_execution.status {
                    BatchStatus::Completed => {}
                    BatchStatus::Stopped => return Ok(ExecutionEvent::Stop),
                    BatchStatus::Failed => {
                        let reason = step_execution
                            .exit_description
                            .unwrap_or_else(|| format!("step {} failed", step.name()));
                        return Ok(ExecutionEvent::Fail(reason));
                    }
                    other => {
                        return Err(BatchError::Internal(format!(
                            "step {} ended in non-terminal status {other}",
                            step.name()
                        )))
                    }
                },
            }
        }
        Ok(ExecutionEvent::Complete)
    }

    async fn finish(
        &self,
        job: &Job,
        execution: &mut JobExecution,
        event: ExecutionEvent,
    ) -> Result<(), BatchError> {
        let operation = match event {
            ExecutionEvent::Complete => events::JOB_COMPLETED,
            ExecutionEvent::Fail(_) => events::JOB_FAILED,
            _ => events::JOB_STOPPED,
        };
        self.state_machine.transition_job(execution, event).await?;
        log_job_operation(
            operation,
            job.name(),
            Some(execution.id),
            execution.status.as_str(),
            execution.exit_description.as_deref(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemError, ItemResult};
    use crate::models::{JobParameters, JobParametersBuilder, StepExecution};
    use crate::repository::{InMemoryJobRepository, JobRepository, LaunchDecision, RestartPolicy};
    use crate::step::{RepeatStatus, Tasklet, TaskletStep};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Outcome(Option<&'static str>);

    #[async_trait]
    impl Tasklet for Outcome {
        async fn execute(&self, _: &StepExecution, _: &JobParameters) -> ItemResult<RepeatStatus> {
            match self.0 {
                Some(message) => Err(ItemError::fatal(message)),
                None => Ok(RepeatStatus::Finished),
            }
        }
    }

    fn step(name: &str, failure: Option<&'static str>) -> Arc<TaskletStep> {
        Arc::new(TaskletStep::new(name, Arc::new(Outcome(failure))))
    }

    async fn accepted(repository: &Arc<InMemoryJobRepository>, job: &Job) -> JobExecution {
        let params = JobParametersBuilder::new()
            .add_string("file", "/in/dogs.csv")
            .to_job_parameters();
        match repository
            .create_job_execution(job.name(), &params, RestartPolicy::default())
            .await
            .unwrap()
        {
            LaunchDecision::Accepted { execution, .. } => execution,
            LaunchDecision::Rejected(r) => panic!("rejected: {r:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_steps_complete() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let runner = JobRunner::new(ExecutionStateMachine::new(repository.clone()));
        let job = Job::builder("import")
            .with_step(step("setup", None))
            .with_step(step("load", None))
            .build()
            .unwrap();

        let execution = accepted(&repository, &job).await;
        let finished = runner.run(&job, execution).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert!(finished.start_time.is_some() && finished.end_time.is_some());
        let steps = repository.find_step_executions(finished.id).await.unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_fails_job_and_skips_rest() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let runner = JobRunner::new(ExecutionStateMachine::new(repository.clone()));
        let job = Job::builder("import")
            .with_step(step("setup", Some("schema missing")))
            .with_step(step("load", None))
            .build()
            .unwrap();

        let execution = accepted(&repository, &job).await;
        let finished = runner.run(&job, execution).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Failed);
        assert!(finished
            .exit_description
            .as_deref()
            .is_some_and(|d| d.contains("schema missing")));
        let steps = repository.find_step_executions(finished.id).await.unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start_ends_stopped() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let state_machine = ExecutionStateMachine::new(repository.clone());
        let runner = JobRunner::new(state_machine.clone());
        let job = Job::builder("import")
            .with_step(step("setup", None))
            .build()
            .unwrap();

        let execution = accepted(&repository, &job).await;
        state_machine.request_stop(execution.id).await.unwrap();
        let finished = runner.run(&job, execution).await.unwrap();

        assert_eq!(finished.status, BatchStatus::Stopped);
        assert!(repository
            .find_step_executions(finished.id)
            .await
            .unwrap()
            .is_empty());
    }
}
