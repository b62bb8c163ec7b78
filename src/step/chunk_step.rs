use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::pipeline::{ChunkCommitHook, ChunkPipeline, PipelineOutcome};
use super::policy::{FilteredItemAccounting, LimitCheckingSkipPolicy, RetryPolicy, SkipPolicy};
use super::Step;
use crate::error::BatchError;
use crate::item::{ItemProcessor, ItemReaderFactory, ItemWriter};
use crate::models::{JobParameters, StepExecution};

/// Step that reads, processes and writes records in chunks
pub struct ChunkOrientedStep<I, O> {
    name: String,
    reader_factory: Arc<dyn ItemReaderFactory<I>>,
    pipeline: ChunkPipeline<I, O>,
    allow_start_if_complete: bool,
    start_limit: Option<u32>,
}

impl<I, O> std::fmt::Debug for ChunkOrientedStep<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkOrientedStep")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline)
            .field("allow_start_if_complete", &self.allow_start_if_complete)
            .field("start_limit", &self.start_limit)
            .finish_non_exhaustive()
    }
}

impl<I, O> ChunkOrientedStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn builder(
        name: impl Into<String>,
        reader_factory: Arc<dyn ItemReaderFactory<I>>,
        processor: Arc<dyn ItemProcessor<I, O>>,
        writer: Arc<dyn ItemWriter<O>>,
    ) -> ChunkOrientedStepBuilder<I, O> {
        ChunkOrientedStepBuilder {
            name: name.into(),
            reader_factory,
            pipeline: ChunkPipeline::new(processor, writer),
            retry_policy: RetryPolicy::default(),
            allow_start_if_complete: false,
            start_limit: None,
        }
    }

    pub fn pipeline(&self) -> &ChunkPipeline<I, O> {
        &self.pipeline
    }
}

#[async_trait]
impl<I, O> Step for ChunkOrientedStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
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
        let mut reader = match self.reader_factory.create(parameters) {
            Ok(reader) => reader,
            Err(e) => return Ok(PipelineOutcome::Failed(e.to_string())),
        };
        self.pipeline.run(reader.as_mut(), step, hook).await
    }
}

/// Builder for [`ChunkOrientedStep`]
pub struct ChunkOrientedStepBuilder<I, O> {
    name: String,
    reader_factory: Arc<dyn ItemReaderFactory<I>>,
    pipeline: ChunkPipeline<I, O>,
    retry_policy: RetryPolicy,
    allow_start_if_complete: bool,
    start_limit: Option<u32>,
}

impl<I, O> ChunkOrientedStepBuilder<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.pipeline = self.pipeline.with_chunk_size(chunk_size);
        self
    }

    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.pipeline = self.pipeline.with_worker_pool_size(worker_pool_size);
        self
    }

    pub fn with_skip_policy(mut self, skip_policy: Arc<dyn SkipPolicy>) -> Self {
        self.pipeline = self.pipeline.with_skip_policy(skip_policy);
        self
    }

    /// Skip invalid and transient records until `skip_limit` were skipped
    pub fn with_skip_limit(self, skip_limit: u64) -> Self {
        self.with_skip_policy(Arc::new(LimitCheckingSkipPolicy::new(skip_limit)))
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_policy.retry_limit = retry_limit;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_policy.initial_backoff = backoff;
        self
    }

    pub fn with_filtered_items(mut self, filtered_items: FilteredItemAccounting) -> Self {
        self.pipeline = self.pipeline.with_filtered_items(filtered_items);
        self
    }

    pub fn with_allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn with_start_limit(mut self, start_limit: Option<u32>) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn build(self) -> ChunkOrientedStep<I, O> {
        ChunkOrientedStep {
            name: self.name,
            reader_factory: self.reader_factory,
            pipeline: self.pipeline.with_retry_policy(self.retry_policy),
            allow_start_if_complete: self.allow_start_if_complete,
            start_limit: self.start_limit,
        }
    }
}
