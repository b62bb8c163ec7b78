//! Single-callback steps.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::pipeline::{ChunkCommitHook, ChunkControl, PipelineOutcome};
use super::Step;
use crate::error::BatchError;
use crate::item::ItemResult;
use crate::models::{JobParameters, StepContribution, StepExecution};

/// Whether a tasklet wants to be called again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    Continuable,
    Finished,
}

#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(
        &self,
        step: &StepExecution,
        parameters: &JobParameters,
    ) -> ItemResult<RepeatStatus>;
}

/// Step that calls a [`Tasklet`] until it reports [`RepeatStatus::Finished`]
///
/// Each call is one commit: the hook runs after it, so a stop request is
/// honored between calls.
pub struct TaskletStep {
    name: String,
    tasklet: Arc<dyn Tasklet>,
    allow_start_if_complete: bool,
    start_limit: Option<u32>,
}

impl std::fmt::Debug for TaskletStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskletStep")
            .field("name", &self.name)
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .field("start_limit", &self.start_limit)
            .finish_non_exhaustive()
    }
}

impl TaskletStep {
    pub fn new(name: impl Into<String>, tasklet: Arc<dyn Tasklet>) -> Self {
        Self {
            name: name.into(),
            tasklet,
            allow_start_if_complete: false,
            start_limit: None,
        }
    }

    pub fn with_allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn with_start_limit(mut self, start_limit: Option<u32>) -> Self {
        self.start_limit = start_limit;
        self
    }
}

#[async_trait]
impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn start_limit(&self) -> Option<u32> {
        self.start_limit
    }

    async fn execute(
        &self,
        step: &mut StepExecution,
        parameters: &JobParameters,
        hook: &mut dyn ChunkCommitHook,
    ) -> Result<PipelineOutcome, BatchError> {
        loop {
            let status = match self.tasklet.execute(step, parameters).await {
                Ok(status) => status,
                Err(e) => {
                    step.rollback_count += 1;
                    return Ok(PipelineOutcome::Failed(e.to_string()));
                }
            };

            let transaction = hook.begin().await?;
            step.apply_contribution(&StepContribution::default());
            let control = hook.commit(transaction, step).await?;

            match (status, control) {
                (RepeatStatus::Finished, _) => return Ok(PipelineOutcome::Completed),
                (RepeatStatus::Continuable, ChunkControl::Stop) => {
                    return Ok(PipelineOutcome::Stopped)
                }
                (RepeatStatus::Continuable, ChunkControl::Continue) => {}
            }
        }
    }
}

/// Greets the run's audience and optionally prepares the target schema
#[derive(Debug, Clone)]
pub struct SetupTasklet {
    greeting_parameter: String,
    sql: Option<String>,
    pool: Option<PgPool>,
}

impl SetupTasklet {
    pub fn new(greeting_parameter: impl Into<String>) -> Self {
        Self {
            greeting_parameter: greeting_parameter.into(),
            sql: None,
            pool: None,
        }
    }

    /// Execute `sql` once per run before finishing
    pub fn with_statement(mut self, pool: PgPool, sql: impl Into<String>) -> Self {
        self.pool = Some(pool);
        self.sql = Some(sql.into());
        self
    }
}

#[async_trait]
impl Tasklet for SetupTasklet {
    async fn execute(
        &self,
        step: &StepExecution,
        parameters: &JobParameters,
    ) -> ItemResult<RepeatStatus> {
        let audience = parameters
            .get(&self.greeting_parameter)
            .map(|p| p.value.to_string())
            .unwrap_or_else(|| "everyone".to_string());
        info!(
            step_name = %step.step_name,
            job_execution_id = step.job_execution_id,
            "Setting up the world for {audience}"
        );

        if let (Some(pool), Some(sql)) = (&self.pool, &self.sql) {
            sqlx::raw_sql(sql).execute(pool).await?;
        }
        Ok(RepeatStatus::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemError;
    use crate::models::JobParametersBuilder;
    use crate::step::NoopCommitHook;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountDown(AtomicU32);

    #[async_trait]
    impl Tasklet for CountDown {
        async fn execute(&self, _: &StepExecution, _: &JobParameters) -> ItemResult<RepeatStatus> {
            match self.0.fetch_sub(1, Ordering::SeqCst) {
                0 => Err(ItemError::fatal("called after finishing")),
                1 => Ok(RepeatStatus::Finished),
                _ => Ok(RepeatStatus::Continuable),
            }
        }
    }

    #[tokio::test]
    async fn test_tasklet_repeats_until_finished() {
        let step = TaskletStep::new("countdown", Arc::new(CountDown(AtomicU32::new(3))));
        let mut execution = StepExecution::new("countdown", 1);

        let outcome = step
            .execute(&mut execution, &JobParameters::new(), &mut NoopCommitHook)
            .await
            .unwrap();

        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(execution.commit_count, 3);
    }

    #[tokio::test]
    async fn test_tasklet_error_fails_step() {
        let step = TaskletStep::new("countdown", Arc::new(CountDown(AtomicU32::new(0))));
        let mut execution = StepExecution::new("countdown", 1);

        let outcome = step
            .execute(&mut execution, &JobParameters::new(), &mut NoopCommitHook)
            .await
            .unwrap();

        assert!(matches!(outcome, PipelineOutcome::Failed(_)));
        assert_eq!(execution.rollback_count, 1);
        assert_eq!(execution.commit_count, 0);
    }

    #[tokio::test]
    async fn test_setup_tasklet_finishes_without_statement() {
        let tasklet = SetupTasklet::new("name");
        let params = JobParametersBuilder::new()
            .add_string_with("name", "Enterprise Integration fans", false)
            .to_job_parameters();

        let status = tasklet
            .execute(&StepExecution::new("setup", 1), &params)
            .await
            .unwrap();
        assert_eq!(status, RepeatStatus::Finished);
    }
}
