//! # Job Operator
//!
//! Launch, restart, stop and query surface over registered jobs.
//!
//! ## Overview
//!
//! Every launch goes through [`JobRepository::create_job_execution`], which
//! applies the duplicate-run and restart rules atomically. Rejections are
//! returned synchronously as [`BatchError`] launch rejections and never create
//! an execution. Accepted executions are either run inline ([`JobOperator::launch`])
//! or on their own tokio task ([`JobOperator::start`]) while the caller polls
//! the repository for status.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tasker_batch::job::{Job, JobOperator};
//! use tasker_batch::models::JobParametersBuilder;
//! use tasker_batch::registry::JobRegistry;
//! use tasker_batch::repository::InMemoryJobRepository;
//! use tasker_batch::step::{SetupTasklet, TaskletStep};
//! use tasker_batch::{BatchError, BatchStatus};
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(JobRegistry::new());
//! registry.register(
//!     Job::builder("greetJob")
//!         .with_step(Arc::new(TaskletStep::new("setup", Arc::new(SetupTasklet::new("name")))))
//!         .build()?,
//! )?;
//! let operator = JobOperator::new(Arc::new(InMemoryJobRepository::new()), registry);
//!
//! let params = JobParametersBuilder::new().add_string("name", "batch fans").to_job_parameters();
//! let execution = operator.launch("greetJob", &params).await?;
//! assert_eq!(execution.status, BatchStatus::Completed);
//!
//! let again = operator.launch("greetJob", &params).await;
//! assert!(matches!(again, Err(BatchError::JobInstanceAlreadyComplete { .. })));
//! # Ok::<(), BatchError>(())
//! # }).unwrap();
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Job, JobRunner};
use crate::constants::{defaults, events};
use crate::error::{BatchError, Result};
use crate::logging::{log_error, log_job_operation};
use crate::models::{ExecutionSummary, JobExecution, JobParameters, StepExecution};
use crate::registry::JobRegistry;
use crate::repository::{JobRepository, LaunchDecision, LaunchRejection};
use crate::state_machine::{BatchStatus, ExecutionStateMachine, StateMachineError};

/// Entry in the operator's active set, removed when dropped
///
/// Covers runs that end early: a dropped `launch` future or a panicking task.
struct ActiveExecution {
    active: Arc<DashMap<i64, String>>,
    execution_id: i64,
}

impl ActiveExecution {
    fn register(active: &Arc<DashMap<i64, String>>, execution_id: i64, job_name: &str) -> Self {
        active.insert(execution_id, job_name.to_string());
        Self {
            active: Arc::clone(active),
            execution_id,
        }
    }
}

impl Drop for ActiveExecution {
    fn drop(&mut self) {
        self.active.remove(&self.execution_id);
    }
}

#[derive(Clone)]
pub struct JobOperator {
    repository: Arc<dyn JobRepository>,
    registry: Arc<JobRegistry>,
    state_machine: ExecutionStateMachine,
    runner: JobRunner,
    active: Arc<DashMap<i64, String>>,
}

impl std::fmt::Debug for JobOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOperator")
            .field("jobs", &self.registry.names())
            .field("active", &self.active_executions())
            .finish_non_exhaustive()
    }
}

impl JobOperator {
    pub fn new(repository: Arc<dyn JobRepository>, registry: Arc<JobRegistry>) -> Self {
        let state_machine = ExecutionStateMachine::new(Arc::clone(&repository));
        Self {
            runner: JobRunner::new(state_machine.clone()),
            state_machine,
            repository,
            registry,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Accept and run a job to completion on the current task
    #[instrument(skip(self, parameters), fields(job_key = %parameters.job_key()))]
    pub async fn launch(&self, job_name: &str, parameters: &JobParameters) -> Result<JobExecution> {
        let job = self.registry.get(job_name)?;
        let execution = self.accept(&job, parameters).await?;
        let _active = ActiveExecution::register(&self.active, execution.id, job.name());
        self.runner.run(&job, execution).await
    }

    /// Accept a job and run it on a background task
    ///
    /// Returns the accepted STARTING execution; its progress is visible
    /// through [`JobOperator::get_execution`].
    #[instrument(skip(self, parameters), fields(job_key = %parameters.job_key()))]
    pub async fn start(&self, job_name: &str, parameters: &JobParameters) -> Result<JobExecution> {
        let job = self.registry.get(job_name)?;
        let execution = self.accept(&job, parameters).await?;
        self.spawn(job, execution.clone());
        Ok(execution)
    }

    /// Start a new execution of a FAILED or STOPPED execution's instance
    pub async fn restart(&self, execution_id: i64) -> Result<JobExecution> {
        let previous = self.require_execution(execution_id).await?;
        match previous.status {
            status if status.is_restartable() => {}
            status if status.is_running() => {
                return Err(BatchError::JobExecutionAlreadyRunning {
                    job_name: previous.job_name,
                    execution_id,
                })
            }
            _ => {
                return Err(BatchError::JobInstanceAlreadyComplete {
                    job_key: previous.parameters.job_key(),
                    job_name: previous.job_name,
                })
            }
        }
        self.start(&previous.job_name, &previous.parameters).await
    }

    /// Start a new instance with parameters from the job's incrementer
    pub async fn start_next_instance(&self, job_name: &str) -> Result<JobExecution> {
        let job = self.registry.get(job_name)?;
        let incrementer = job.incrementer().ok_or_else(|| {
            BatchError::InvalidParameters(format!("job '{job_name}' has no parameters incrementer"))
        })?;
        let previous = self.repository.find_last_job_execution(job_name).await?;
        let next = incrementer.next(previous.as_ref().map(|e| &e.parameters));
        self.start(job_name, &next).await
    }

    /// Request a cooperative stop; the runner honors it at the next chunk boundary
    pub async fn stop(&self, execution_id: i64) -> Result<JobExecution> {
        let execution = self.require_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(not_running(&execution));
        }

        match self.state_machine.request_stop(execution_id).await {
            Ok(stopping) => {
                log_job_operation(
                    events::JOB_STOP_REQUESTED,
                    &stopping.job_name,
                    Some(stopping.id),
                    stopping.status.as_str(),
                    None,
                );
                Ok(stopping)
            }
            // finished between our read and the stop request
            Err(StateMachineError::InvalidTransition { .. }) => {
                let current = self.require_execution(execution_id).await?;
                Err(not_running(&current))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
        Ok(self.repository.get_job_execution(execution_id).await?)
    }

    /// Latest execution for a job and identifying parameter set
    pub async fn find_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>> {
        Ok(self.repository.find_execution(job_name, parameters).await?)
    }

    pub async fn step_executions(&self, execution_id: i64) -> Result<Vec<StepExecution>> {
        Ok(self.repository.find_step_executions(execution_id).await?)
    }

    pub async fn running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        Ok(self.repository.find_running_job_executions(job_name).await?)
    }

    /// Status, counts and exit descriptions of one execution
    pub async fn summary(&self, execution_id: i64) -> Result<ExecutionSummary> {
        let execution = self.require_execution(execution_id).await?;
        let steps = self.step_executions(execution_id).await?;
        Ok(ExecutionSummary::new(&execution, &steps))
    }

    /// Poll until the execution reaches a terminal status
    pub async fn await_completion(&self, execution_id: i64, timeout: Duration) -> Result<JobExecution> {
        let poll = async {
            loop {
                let execution = self.require_execution(execution_id).await?;
                if execution.status.is_terminal() {
                    return Ok::<_, BatchError>(execution);
                }
                tokio::time::sleep(Duration::from_millis(defaults::AWAIT_POLL_INTERVAL_MS)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            BatchError::Internal(format!(
                "job execution {execution_id} did not finish within {timeout:?}"
            ))
        })?
    }

    /// Executions running on tasks owned by this operator
    pub fn active_executions(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Wait until every execution started by this operator has finished
    pub async fn await_quiescence(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.active.is_empty() {
                tokio::time::sleep(Duration::from_millis(defaults::AWAIT_POLL_INTERVAL_MS)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    async fn accept(&self, job: &Job, parameters: &JobParameters) -> Result<JobExecution> {
        let decision = self
            .repository
            .create_job_execution(job.name(), parameters, job.restart_policy())
            .await?;

        match decision {
            LaunchDecision::Accepted { execution, restart } => {
                log_job_operation(
                    events::JOB_LAUNCH_REQUESTED,
                    job.name(),
                    Some(execution.id),
                    execution.status.as_str(),
                    restart.then_some("restart"),
                );
                Ok(execution)
            }
            LaunchDecision::Rejected(rejection) => {
                let err = rejection_error(job.name(), rejection);
                log_job_operation(
                    events::JOB_LAUNCH_REJECTED,
                    job.name(),
                    None,
                    "REJECTED",
                    Some(&err.to_string()),
                );
                Err(err)
            }
        }
    }

    fn spawn(&self, job: Arc<Job>, execution: JobExecution) {
        let runner = self.runner.clone();
        let execution_id = execution.id;
        let active = ActiveExecution::register(&self.active, execution_id, job.name());

        tokio::spawn(async move {
            let _active = active;
            match runner.run(&job, execution).await {
                Ok(finished) => debug!(
                    job_execution_id = finished.id,
                    status = %finished.status,
                    "Background execution finished"
                ),
                Err(e) => log_error(
                    "JobOperator",
                    "run",
                    &e.to_string(),
                    Some(&format!("job_execution_id={execution_id}")),
                ),
            }
        });
    }

    async fn require_execution(&self, execution_id: i64) -> Result<JobExecution> {
        self.repository
            .get_job_execution(execution_id)
            .await?
            .ok_or(BatchError::NoSuchJobExecution(execution_id))
    }
}

fn not_running(execution: &JobExecution) -> BatchError {
    BatchError::JobExecutionNotRunning {
        execution_id: execution.id,
        status: execution.status.to_string(),
    }
}

fn rejection_error(job_name: &str, rejection: LaunchRejection) -> BatchError {
    match rejection {
        LaunchRejection::AlreadyComplete { job_key } => BatchError::JobInstanceAlreadyComplete {
            job_name: job_name.to_string(),
            job_key,
        },
        LaunchRejection::AlreadyRunning { execution_id } => BatchError::JobExecutionAlreadyRunning {
            job_name: job_name.to_string(),
            execution_id,
        },
        LaunchRejection::RestartNotAllowed => BatchError::JobRestartNotAllowed {
            job_name: job_name.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemError, ItemResult};
    use crate::job::RunIdIncrementer;
    use crate::models::JobParametersBuilder;
    use crate::repository::InMemoryJobRepository;
    use crate::step::{RepeatStatus, Tasklet, TaskletStep};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Finishes, or fails while `broken` is set
    struct Toggle(Arc<AtomicBool>);

    #[async_trait]
    impl Tasklet for Toggle {
        async fn execute(&self, _: &StepExecution, _: &JobParameters) -> ItemResult<RepeatStatus> {
            if self.0.load(Ordering::SeqCst) {
                Err(ItemError::fatal("broken"))
            } else {
                Ok(RepeatStatus::Finished)
            }
        }
    }

    fn operator(broken: Arc<AtomicBool>) -> JobOperator {
        let registry = Arc::new(JobRegistry::new());
        registry
            .register(
                Job::builder("import")
                    .with_step(Arc::new(TaskletStep::new("load", Arc::new(Toggle(broken)))))
                    .with_incrementer(Arc::new(RunIdIncrementer::new()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        JobOperator::new(Arc::new(InMemoryJobRepository::new()), registry)
    }

    fn params(file: &str) -> JobParameters {
        JobParametersBuilder::new()
            .add_string("file", file)
            .add_string_with("name", "fans", false)
            .to_job_parameters()
    }

    #[tokio::test]
    async fn test_duplicate_launch_after_completion_is_rejected() {
        let operator = operator(Arc::new(AtomicBool::new(false)));
        let first = operator.launch("import", &params("/in/a.csv")).await.unwrap();
        assert_eq!(first.status, BatchStatus::Completed);

        let err = operator
            .launch("import", &params("/in/a.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::JobInstanceAlreadyComplete { .. }));
        assert!(err.is_launch_rejection());

        let other = operator.launch("import", &params("/in/b.csv")).await.unwrap();
        assert_eq!(other.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_job_is_reported() {
        let operator = operator(Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            operator.launch("missing", &params("/in/a.csv")).await,
            Err(BatchError::NoSuchJob(_))
        ));
        assert!(matches!(
            operator.stop(404).await,
            Err(BatchError::NoSuchJobExecution(404))
        ));
    }

    #[tokio::test]
    async fn test_restart_of_failed_execution() {
        let broken = Arc::new(AtomicBool::new(true));
        let operator = operator(broken.clone());

        let failed = operator.launch("import", &params("/in/a.csv")).await.unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);

        broken.store(false, Ordering::SeqCst);
        let restarted = operator.restart(failed.id).await.unwrap();
        let finished = operator
            .await_completion(restarted.id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.job_instance_id, failed.job_instance_id);
        assert!(matches!(
            operator.restart(finished.id).await,
            Err(BatchError::JobInstanceAlreadyComplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_next_instance_uses_run_id() {
        let operator = operator(Arc::new(AtomicBool::new(false)));

        let first = operator.start_next_instance("import").await.unwrap();
        operator
            .await_completion(first.id, Duration::from_secs(5))
            .await
            .unwrap();
        let second = operator.start_next_instance("import").await.unwrap();
        let second = operator
            .await_completion(second.id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(first.parameters.get_long("run.id"), Some(1));
        assert_eq!(second.parameters.get_long("run.id"), Some(2));
        assert_ne!(first.job_instance_id, second.job_instance_id);
        assert!(operator.await_quiescence(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_stop_of_finished_execution_is_rejected() {
        let operator = operator(Arc::new(AtomicBool::new(false)));
        let done = operator.launch("import", &params("/in/a.csv")).await.unwrap();

        assert!(matches!(
            operator.stop(done.id).await,
            Err(BatchError::JobExecutionNotRunning { .. })
        ));
        let summary = operator.summary(done.id).await.unwrap();
        assert_eq!(summary.status, BatchStatus::Completed);
    }

    struct Hang;

    #[async_trait]
    impl Tasklet for Hang {
        async fn execute(&self, _: &StepExecution, _: &JobParameters) -> ItemResult<RepeatStatus> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(RepeatStatus::Finished)
        }
    }

    #[tokio::test]
    async fn test_dropped_launch_leaves_no_active_execution() {
        let operator = operator(Arc::new(AtomicBool::new(false)));
        operator
            .registry()
            .register(
                Job::builder("hang")
                    .with_step(Arc::new(TaskletStep::new("wait", Arc::new(Hang))))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            operator.launch("hang", &params("/in/slow.csv")),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(operator.active_executions().is_empty());
        assert!(operator.await_quiescence(Duration::from_millis(100)).await);
    }
}
