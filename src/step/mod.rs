//! # Steps
//!
//! A job is an ordered list of [`Step`]s. Two kinds exist:
//!
//! - [`ChunkOrientedStep`] drives a [`ChunkPipeline`] over a fresh reader built
//!   from the job parameters
//! - [`TaskletStep`] calls a single [`Tasklet`] until it reports
//!   [`RepeatStatus::Finished`]
//!
//! The [`StepExecutor`] wraps either kind with the lifecycle bookkeeping:
//! restart context, `allow_start_if_complete`, `start_limit`, per-commit
//! persistence and stop detection.

pub mod chunk_step;
pub mod executor;
pub mod pipeline;
pub mod policy;
pub mod tasklet;

pub use chunk_step::{ChunkOrientedStep, ChunkOrientedStepBuilder};
pub use executor::{RepositoryCommitHook, StepExecutor, StepResult};
pub use pipeline::{ChunkCommitHook, ChunkControl, ChunkPipeline, NoopCommitHook, PipelineOutcome};
pub use policy::{
    AlwaysSkipItemSkipPolicy, FilteredItemAccounting, LimitCheckingSkipPolicy,
    NeverSkipItemSkipPolicy, RetryPolicy, SkipPolicy,
};
pub use tasklet::{RepeatStatus, SetupTasklet, Tasklet, TaskletStep};

use async_trait::async_trait;

use crate::error::BatchError;
use crate::models::{JobParameters, StepExecution};

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Run again on restart even when the previous execution completed
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Maximum executions of this step within one job instance
    fn start_limit(&self) -> Option<u32> {
        None
    }

    /// Run the step body against an already started `step` execution
    ///
    /// Counts and the execution context are updated in place; `hook` is
    /// called after every commit.
    async fn execute(
        &self,
        step: &mut StepExecution,
        parameters: &JobParameters,
        hook: &mut dyn ChunkCommitHook,
    ) -> Result<PipelineOutcome, BatchError>;
}
