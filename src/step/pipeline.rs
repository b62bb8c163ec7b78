//! # Chunk Pipeline
//!
//! Read, process and write loop of a chunk-oriented step.
//!
//! ## Overview
//!
//! Each iteration reads up to `chunk_size` records, fans processing out to a
//! bounded pool of tokio tasks, and writes the survivors as one batch inside
//! the [`ChunkTransaction`] opened by the commit hook. Once the writes
//! succeeded the chunk's counts are folded into the [`StepExecution`], the
//! reader's position saved into its execution context, and the hook commits the
//! transaction together with that checkpoint. A chunk that fails, whether while
//! writing or while recording the checkpoint, is rolled back as a whole and
//! contributes nothing except a rollback tick, so a restart re-reads it from the
//! last saved position.
//!
//! ## Key Features
//!
//! - **Ordered fan-out**: processing runs on up to `worker_pool_size` tasks at
//!   once, but results are consumed in read order, so skip decisions and
//!   commits are identical for every pool size
//! - **Retry before skip**: transient processor and writer failures are retried
//!   with backoff; once retries are exhausted the skip policy decides
//! - **Write scanning**: a skippable chunk write failure re-writes the chunk one
//!   record at a time so only the offending records are skipped; the scan runs
//!   in the same transaction, so a later unskippable failure discards the
//!   records it already wrote
//! - **Cooperative stop**: the commit hook can end the run at a chunk boundary

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::policy::{FilteredItemAccounting, LimitCheckingSkipPolicy, RetryPolicy, SkipPolicy};
use crate::constants::events;
use crate::error::BatchError;
use crate::item::{Chunk, ItemError, ItemProcessor, ItemReader, ItemResult, ItemWriter};
use crate::models::{StepContribution, StepExecution};
use crate::repository::{ChunkTransaction, RepositoryError};

/// What the pipeline should do after a chunk committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Stop,
}

/// Transaction boundary of each chunk
#[async_trait]
pub trait ChunkCommitHook: Send {
    /// Open the transaction the chunk's writes enlist in
    async fn begin(&mut self) -> Result<ChunkTransaction, BatchError> {
        Ok(ChunkTransaction::detached())
    }

    /// Record `step` as the checkpoint and commit it with the chunk's writes
    async fn commit(
        &mut self,
        transaction: ChunkTransaction,
        step: &mut StepExecution,
    ) -> Result<ChunkControl, BatchError>;
}

/// Hook that never persists and never stops
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommitHook;

#[async_trait]
impl ChunkCommitHook for NoopCommitHook {
    async fn commit(
        &mut self,
        transaction: ChunkTransaction,
        _step: &mut StepExecution,
    ) -> Result<ChunkControl, BatchError> {
        transaction.commit().await.map_err(RepositoryError::from)?;
        Ok(ChunkControl::Continue)
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Input exhausted and every chunk committed
    Completed,
    /// The commit hook asked to stop
    Stopped,
    /// A record failure could not be retried or skipped
    Failed(String),
}

struct ProcessedItem<O> {
    result: ItemResult<Option<O>>,
    retries: u32,
}

pub struct ChunkPipeline<I, O> {
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: Arc<dyn ItemWriter<O>>,
    chunk_size: usize,
    worker_pool_size: usize,
    skip_policy: Arc<dyn SkipPolicy>,
    retry_policy: RetryPolicy,
    filtered_items: FilteredItemAccounting,
}

impl<I, O> std::fmt::Debug for ChunkPipeline<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPipeline")
            .field("chunk_size", &self.chunk_size)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("skip_policy", &self.skip_policy)
            .field("retry_policy", &self.retry_policy)
            .field("filtered_items", &self.filtered_items)
            .finish_non_exhaustive()
    }
}

impl<I, O> ChunkPipeline<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(processor: Arc<dyn ItemProcessor<I, O>>, writer: Arc<dyn ItemWriter<O>>) -> Self {
        Self {
            processor,
            writer,
            chunk_size: crate::constants::defaults::CHUNK_SIZE,
            worker_pool_size: 1,
            skip_policy: Arc::new(LimitCheckingSkipPolicy::new(0)),
            retry_policy: RetryPolicy::default(),
            filtered_items: FilteredItemAccounting::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size.max(1);
        self
    }

    pub fn with_skip_policy(mut self, skip_policy: Arc<dyn SkipPolicy>) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_filtered_items(mut self, filtered_items: FilteredItemAccounting) -> Self {
        self.filtered_items = filtered_items;
        self
    }

    /// Drive `reader` to exhaustion, a stop request, or a failure
    ///
    /// Record-level failures end in [`PipelineOutcome::Failed`]; an `Err` is
    /// only returned when the commit hook failed, in which case the chunk was
    /// rolled back, `step` still holds the last recorded checkpoint, and
    /// nothing more was read.
    pub async fn run(
        &self,
        reader: &mut dyn ItemReader<I>,
        step: &mut StepExecution,
        hook: &mut dyn ChunkCommitHook,
    ) -> Result<PipelineOutcome, BatchError> {
        if let Err(e) = reader.open(&step.execution_context).await {
            return Ok(PipelineOutcome::Failed(e.to_string()));
        }

        let outcome = self.run_chunks(reader, step, hook).await;

        if let Err(e) = reader.close().await {
            warn!(step_name = %step.step_name, error = %e, "Reader close failed");
        }
        outcome
    }

    async fn run_chunks(
        &self,
        reader: &mut dyn ItemReader<I>,
        step: &mut StepExecution,
        hook: &mut dyn ChunkCommitHook,
    ) -> Result<PipelineOutcome, BatchError> {
        loop {
            let mut contribution = StepContribution::default();
            let skips_before = step.skip_count();

            let (chunk, exhausted) =
                match self.read_chunk(reader, &mut contribution, skips_before).await {
                    Ok(read) => read,
                    Err(e) => return Ok(self.roll_back(step, e)),
                };

            if chunk.is_empty() && contribution.read_skip_count == 0 {
                return Ok(PipelineOutcome::Completed);
            }

            let survivors = match self
                .process_chunk(chunk, &mut contribution, skips_before)
                .await
            {
                Ok(survivors) => survivors,
                Err(e) => return Ok(self.roll_back(step, e)),
            };

            let mut transaction = hook.begin().await?;
            if let Err(e) = self
                .write_chunk(&mut transaction, survivors, &mut contribution, skips_before)
                .await
            {
                transaction.discard().await;
                return Ok(self.roll_back(step, e));
            }

            let checkpoint = step.clone();
            step.apply_contribution(&contribution);
            reader.update(&mut step.execution_context);

            let control = match hook.commit(transaction, step).await {
                Ok(control) => control,
                Err(e) => {
                    *step = checkpoint;
                    step.rollback_count += 1;
                    warn!(
                        event = events::CHUNK_ROLLED_BACK,
                        step_name = %step.step_name,
                        step_execution_id = step.id,
                        error = %e,
                        "Chunk checkpoint could not be recorded"
                    );
                    return Err(e);
                }
            };
            debug!(
                event = events::CHUNK_COMMITTED,
                step_name = %step.step_name,
                step_execution_id = step.id,
                read_count = step.read_count,
                write_count = step.write_count,
                skip_count = step.skip_count(),
                commit_count = step.commit_count,
                "Chunk committed"
            );

            if exhausted {
                return Ok(PipelineOutcome::Completed);
            }
            if control == ChunkControl::Stop {
                return Ok(PipelineOutcome::Stopped);
            }
        }
    }

    fn roll_back(&self, step: &mut StepExecution, error: ItemError) -> PipelineOutcome {
        step.rollback_count += 1;
        warn!(
            event = events::CHUNK_ROLLED_BACK,
            step_name = %step.step_name,
            step_execution_id = step.id,
            error = %error,
            "Chunk rolled back"
        );
        PipelineOutcome::Failed(error.to_string())
    }

    fn may_skip(&self, error: &ItemError, skip_count: u64) -> bool {
        !error.is_fatal() && self.skip_policy.should_skip(error, skip_count)
    }

    /// Read up to a chunk of records; the flag reports end of input
    async fn read_chunk(
        &self,
        reader: &mut dyn ItemReader<I>,
        contribution: &mut StepContribution,
        skips_before: u64,
    ) -> ItemResult<(Chunk<I>, bool)> {
        let mut chunk = Chunk::with_capacity(self.chunk_size);
        while !chunk.is_full() {
            match reader.read().await {
                Ok(Some(item)) => {
                    contribution.read_count += 1;
                    chunk.push(item);
                }
                Ok(None) => return Ok((chunk, true)),
                Err(e) if self.may_skip(&e, skips_before + contribution.skip_count()) => {
                    debug!(error = %e, "Skipping unreadable record");
                    contribution.read_skip_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((chunk, false))
    }

    /// Process a chunk on the worker pool, keeping read order
    async fn process_chunk(
        &self,
        chunk: Chunk<I>,
        contribution: &mut StepContribution,
        skips_before: u64,
    ) -> ItemResult<Vec<O>> {
        let retry_policy = self.retry_policy;
        let results: Vec<ProcessedItem<O>> = stream::iter(chunk.into_iter().map(|item| {
            let processor = Arc::clone(&self.processor);
            tokio::spawn(async move { process_with_retry(processor.as_ref(), &item, retry_policy).await })
        }))
        .buffered(self.worker_pool_size)
        .map(|joined| {
            joined.unwrap_or_else(|e| ProcessedItem {
                result: Err(ItemError::fatal(format!("processor task aborted: {e}"))),
                retries: 0,
            })
        })
        .collect()
        .await;

        let mut survivors = Vec::with_capacity(results.len());
        for processed in results {
            contribution.retry_count += u64::from(processed.retries);
            match processed.result {
                Ok(Some(output)) => survivors.push(output),
                Ok(None) => match self.filtered_items {
                    FilteredItemAccounting::Ignore => {}
                    FilteredItemAccounting::Count => contribution.filter_count += 1,
                    FilteredItemAccounting::CountAsSkip => contribution.process_skip_count += 1,
                },
                Err(e) if self.may_skip(&e, skips_before + contribution.skip_count()) => {
                    debug!(error = %e, "Skipping record that failed processing");
                    contribution.process_skip_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(survivors)
    }

    async fn write_chunk(
        &self,
        transaction: &mut ChunkTransaction,
        items: Vec<O>,
        contribution: &mut StepContribution,
        skips_before: u64,
    ) -> ItemResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        match self.write_with_retry(transaction, &items, contribution).await {
            Ok(()) => {
                contribution.write_count += items.len() as u64;
                Ok(())
            }
            Err(e) if self.may_skip(&e, skips_before + contribution.skip_count()) => {
                debug!(error = %e, items = items.len(), "Chunk write failed, scanning records");
                self.scan_chunk(transaction, &items, contribution, skips_before)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Re-write a failed chunk one record at a time, skipping the bad ones
    async fn scan_chunk(
        &self,
        transaction: &mut ChunkTransaction,
        items: &[O],
        contribution: &mut StepContribution,
        skips_before: u64,
    ) -> ItemResult<()> {
        for item in items.chunks(1) {
            match self.write_with_retry(transaction, item, contribution).await {
                Ok(()) => contribution.write_count += 1,
                Err(e) if self.may_skip(&e, skips_before + contribution.skip_count()) => {
                    debug!(error = %e, "Skipping record that failed to write");
                    contribution.write_skip_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn write_with_retry(
        &self,
        transaction: &mut ChunkTransaction,
        items: &[O],
        contribution: &mut StepContribution,
    ) -> ItemResult<()> {
        let mut retries = 0;
        loop {
            match self.writer.write(items, transaction).await {
                Ok(()) => return Ok(()),
                Err(e) if self.retry_policy.can_retry(&e, retries) => {
                    tokio::time::sleep(self.retry_policy.backoff(retries)).await;
                    retries += 1;
                    contribution.retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn process_with_retry<I, O>(
    processor: &dyn ItemProcessor<I, O>,
    item: &I,
    retry_policy: RetryPolicy,
) -> ProcessedItem<O> {
    let mut retries = 0;
    loop {
        match processor.process(item).await {
            Err(e) if retry_policy.can_retry(&e, retries) => {
                tokio::time::sleep(retry_policy.backoff(retries)).await;
                retries += 1;
            }
            result => return ProcessedItem { result, retries },
        }
    }
}
