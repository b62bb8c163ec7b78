//! # Job Repository
//!
//! Durable store of job instances, job executions, step executions and their
//! execution contexts. The repository is the single source of truth for "has
//! this run already happened" and "how far did it get".
//!
//! ## Guarantees
//!
//! - **Atomic launch acceptance**: [`JobRepository::create_job_execution`] finds or
//!   creates the job instance, applies duplicate-run and restart rules, and
//!   records the new `STARTING` execution as one serialized operation.
//! - **Single writer per execution**: every update carries the version the
//!   caller last saw; a stale version fails with
//!   [`RepositoryError::OptimisticLock`] instead of silently overwriting.
//! - **Chunk atomicity**: [`JobRepository::begin_chunk`] opens the
//!   [`ChunkTransaction`] a chunk's writes enlist in and
//!   [`JobRepository::commit_chunk`] records the checkpoint inside it, so the
//!   chunk and its checkpoint become durable together.
//! - **Visibility before progress**: update methods return only after the write
//!   is visible to subsequent reads, so the state machine never advances on
//!   state that was not recorded.
//!
//! ## Implementations
//!
//! - [`InMemoryJobRepository`] for tests and embedded use
//! - [`PgJobRepository`] backed by PostgreSQL via SQLx

pub mod in_memory;
pub mod postgres;
pub mod transaction;

pub use in_memory::InMemoryJobRepository;
pub use postgres::PgJobRepository;
pub use transaction::ChunkTransaction;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{JobExecution, JobInstance, JobParameters, StepExecution};

/// Errors raised by repository implementations
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Optimistic locking failure on {entity} {id}: expected version {expected}, found {actual}")]
    OptimisticLock {
        entity: &'static str,
        id: i64,
        expected: i32,
        actual: i32,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid persisted data: {0}")]
    InvalidData(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Restart rules a job definition hands to the repository at launch time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// `false` rejects any second execution of the same instance
    pub restartable: bool,
    /// `true` lets a COMPLETED instance run again with the same parameters
    pub allow_restart_if_complete: bool,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restartable: true,
            allow_restart_if_complete: false,
        }
    }
}

/// Why a launch request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRejection {
    AlreadyComplete { job_key: String },
    AlreadyRunning { execution_id: i64 },
    RestartNotAllowed,
}

/// Outcome of [`JobRepository::create_job_execution`]
#[derive(Debug, Clone)]
pub enum LaunchDecision {
    /// A new execution was recorded; `restart` is true when the instance
    /// already had executions
    Accepted {
        execution: JobExecution,
        restart: bool,
    },
    Rejected(LaunchRejection),
}

/// Decide whether a new execution may be created for an instance whose most
/// recent execution is `last`
pub fn evaluate_launch(
    last: Option<&JobExecution>,
    job_key: &str,
    policy: RestartPolicy,
) -> Option<LaunchRejection> {
    let last = last?;
    if last.status.is_running() {
        return Some(LaunchRejection::AlreadyRunning {
            execution_id: last.id,
        });
    }
    if last.status == crate::state_machine::BatchStatus::Completed
        && !policy.allow_restart_if_complete
    {
        return Some(LaunchRejection::AlreadyComplete {
            job_key: job_key.to_string(),
        });
    }
    if !policy.restartable {
        return Some(LaunchRejection::RestartNotAllowed);
    }
    None
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Find or create the job instance for `parameters` and record a new
    /// `STARTING` execution, unless the restart rules reject it
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        policy: RestartPolicy,
    ) -> RepositoryResult<LaunchDecision>;

    /// Persist status, timestamps and exit description; bumps `version`
    async fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()>;

    async fn get_job_execution(&self, id: i64) -> RepositoryResult<Option<JobExecution>>;

    async fn get_job_instance(&self, id: i64) -> RepositoryResult<Option<JobInstance>>;

    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> RepositoryResult<Option<JobInstance>>;

    /// Executions of one instance, newest first
    async fn find_job_executions(&self, job_instance_id: i64)
        -> RepositoryResult<Vec<JobExecution>>;

    /// Most recent execution of any instance of `job_name`
    async fn find_last_job_execution(&self, job_name: &str)
        -> RepositoryResult<Option<JobExecution>>;

    async fn find_running_job_executions(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Vec<JobExecution>>;

    /// Record a new step execution; assigns its id
    async fn add_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()>;

    /// Persist counts, status and execution context; bumps `version`
    async fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()>;

    async fn get_step_execution(&self, id: i64) -> RepositoryResult<Option<StepExecution>>;

    /// Open the unit of work one chunk's writes and checkpoint share
    async fn begin_chunk(&self) -> RepositoryResult<ChunkTransaction> {
        Ok(ChunkTransaction::detached())
    }

    /// Record `step` as the chunk's checkpoint and commit it with the writes
    /// in `transaction`; on error neither is durable
    async fn commit_chunk(
        &self,
        transaction: ChunkTransaction,
        step: &mut StepExecution,
    ) -> RepositoryResult<()> {
        if let Err(e) = self.update_step_execution(step).await {
            transaction.discard().await;
            return Err(e);
        }
        transaction.commit().await?;
        Ok(())
    }

    /// Step executions of one job execution in creation order
    async fn find_step_executions(
        &self,
        job_execution_id: i64,
    ) -> RepositoryResult<Vec<StepExecution>>;

    /// Latest execution of `step_name` across every execution of the instance
    async fn find_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>>;

    async fn count_step_executions(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<u32>;

    /// Latest execution for a job name and identifying parameter set
    async fn find_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> RepositoryResult<Option<JobExecution>> {
        match self.find_job_instance(job_name, &parameters.job_key()).await? {
            Some(instance) => Ok(self
                .find_job_executions(instance.id)
                .await?
                .into_iter()
                .next()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobParametersBuilder;
    use crate::state_machine::BatchStatus;

    fn execution_with(status: BatchStatus) -> JobExecution {
        let instance = JobInstance::new(1, "import", "file=string:/a.csv");
        let mut execution = JobExecution::new(
            &instance,
            JobParametersBuilder::new()
                .add_string("file", "/a.csv")
                .to_job_parameters(),
        );
        execution.id = 9;
        execution.status = status;
        execution
    }

    #[test]
    fn test_first_launch_is_accepted() {
        assert_eq!(evaluate_launch(None, "k", RestartPolicy::default()), None);
    }

    #[test]
    fn test_completed_instance_is_rejected() {
        let last = execution_with(BatchStatus::Completed);
        assert_eq!(
            evaluate_launch(Some(&last), "k", RestartPolicy::default()),
            Some(LaunchRejection::AlreadyComplete {
                job_key: "k".to_string()
            })
        );

        let policy = RestartPolicy {
            allow_restart_if_complete: true,
            ..Default::default()
        };
        assert_eq!(evaluate_launch(Some(&last), "k", policy), None);
    }

    #[test]
    fn test_running_instance_is_rejected() {
        for status in [
            BatchStatus::Starting,
            BatchStatus::Started,
            BatchStatus::Stopping,
        ] {
            let last = execution_with(status);
            assert_eq!(
                evaluate_launch(Some(&last), "k", RestartPolicy::default()),
                Some(LaunchRejection::AlreadyRunning { execution_id: 9 })
            );
        }
    }

    #[test]
    fn test_failed_instance_restarts_unless_prevented() {
        let last = execution_with(BatchStatus::Failed);
        assert_eq!(
            evaluate_launch(Some(&last), "k", RestartPolicy::default()),
            None
        );

        let policy = RestartPolicy {
            restartable: false,
            ..Default::default()
        };
        assert_eq!(
            evaluate_launch(Some(&last), "k", policy),
            Some(LaunchRejection::RestartNotAllowed)
        );
    }
}
