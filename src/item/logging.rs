//! Logging decorators for the item capabilities.
//!
//! Each wrapper emits a debug event naming the stage and the executing thread
//! before delegating, which makes the fan-out of processing across the worker
//! pool visible in the logs.

use async_trait::async_trait;
use tracing::debug;

use super::{ItemProcessor, ItemReader, ItemResult, ItemWriter};
use crate::models::ExecutionContext;
use crate::repository::ChunkTransaction;

fn thread_label() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => format!("{name} ({:?})", current.id()),
        None => format!("{:?}", current.id()),
    }
}

#[derive(Debug)]
pub struct LoggingItemReader<R> {
    label: String,
    inner: R,
}

impl<R> LoggingItemReader<R> {
    pub fn new(label: impl Into<String>, inner: R) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<T, R> ItemReader<T> for LoggingItemReader<R>
where
    R: ItemReader<T>,
    T: Send,
{
    async fn open(&mut self, context: &ExecutionContext) -> ItemResult<()> {
        debug!(stage = %self.label, thread = %thread_label(), "open");
        self.inner.open(context).await
    }

    async fn read(&mut self) -> ItemResult<Option<T>> {
        debug!(stage = %self.label, thread = %thread_label(), "read");
        self.inner.read().await
    }

    fn update(&self, context: &mut ExecutionContext) {
        self.inner.update(context)
    }

    async fn close(&mut self) -> ItemResult<()> {
        self.inner.close().await
    }
}

#[derive(Debug)]
pub struct LoggingItemProcessor<P> {
    label: String,
    inner: P,
}

impl<P> LoggingItemProcessor<P> {
    pub fn new(label: impl Into<String>, inner: P) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }
}

#[async_trait]
impl<I, O, P> ItemProcessor<I, O> for LoggingItemProcessor<P>
where
    P: ItemProcessor<I, O>,
    I: Sync,
    O: Send,
{
    async fn process(&self, item: &I) -> ItemResult<Option<O>> {
        debug!(stage = %self.label, thread = %thread_label(), "process");
        self.inner.process(item).await
    }
}

#[derive(Debug)]
pub struct LoggingItemWriter<W> {
    label: String,
    inner: W,
}

impl<W> LoggingItemWriter<W> {
    pub fn new(label: impl Into<String>, inner: W) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }
}

#[async_trait]
impl<T, W> ItemWriter<T> for LoggingItemWriter<W>
where
    W: ItemWriter<T>,
    T: Sync,
{
    async fn write(&self, items: &[T], transaction: &mut ChunkTransaction) -> ItemResult<()> {
        debug!(
            stage = %self.label,
            thread = %thread_label(),
            items = items.len(),
            "write"
        );
        self.inner.write(items, transaction).await
    }
}
