//! General-purpose readers, processors and writers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{ItemError, ItemProcessor, ItemReader, ItemResult, ItemWriter, Record};
use crate::config::RejectRule;
use crate::constants::READ_COUNT_SUFFIX;
use crate::models::ExecutionContext;
use crate::repository::ChunkTransaction;

/// In-memory reader that saves its position like a file reader does
#[derive(Debug)]
pub struct ListItemReader<T> {
    name: String,
    items: VecDeque<T>,
    position: u64,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::named("listReader", items)
    }

    pub fn named(name: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            items: items.into(),
            position: 0,
        }
    }

    fn position_key(&self) -> String {
        format!("{}{READ_COUNT_SUFFIX}", self.name)
    }
}

#[async_trait]
impl<T: Send> ItemReader<T> for ListItemReader<T> {
    async fn open(&mut self, context: &ExecutionContext) -> ItemResult<()> {
        let restart_at = context
            .get_long(&self.position_key())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0);
        while self.position < restart_at && self.items.pop_front().is_some() {
            self.position += 1;
        }
        Ok(())
    }

    async fn read(&mut self) -> ItemResult<Option<T>> {
        let next = self.items.pop_front();
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }

    fn update(&self, context: &mut ExecutionContext) {
        context.put_long(self.position_key(), self.position as i64);
    }
}

/// Processor backed by a closure
pub struct FnItemProcessor<F> {
    f: F,
}

impl<F> FnItemProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<I, O, F> ItemProcessor<I, O> for FnItemProcessor<F>
where
    F: Fn(&I) -> ItemResult<Option<O>> + Send + Sync,
    I: Sync,
    O: Send,
{
    async fn process(&self, item: &I) -> ItemResult<Option<O>> {
        (self.f)(item)
    }
}

/// Hands every item through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughItemProcessor;

impl PassThroughItemProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<T> ItemProcessor<T, T> for PassThroughItemProcessor
where
    T: Clone + Send + Sync,
{
    async fn process(&self, item: &T) -> ItemResult<Option<T>> {
        Ok(Some(item.clone()))
    }
}

/// Fails records matching any configured rule with the rule's error kind
#[derive(Debug, Clone, Default)]
pub struct RejectingRecordProcessor {
    rules: Vec<RejectRule>,
}

impl RejectingRecordProcessor {
    pub fn new(rules: Vec<RejectRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl ItemProcessor<Record, Record> for RejectingRecordProcessor {
    async fn process(&self, item: &Record) -> ItemResult<Option<Record>> {
        for rule in &self.rules {
            if let Some(value) = item.get(&rule.field) {
                if value.to_string() == rule.equals {
                    return Err(ItemError::new(
                        rule.kind,
                        format!("record {}={} rejected", rule.field, rule.equals),
                    ));
                }
            }
        }
        Ok(Some(item.clone()))
    }
}

/// Writer that keeps every committed chunk in memory
///
/// Items become visible through [`CollectingItemWriter::chunks`] only once the
/// chunk transaction they were written in commits.
#[derive(Debug)]
pub struct CollectingItemWriter<T> {
    chunks: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> Clone for CollectingItemWriter<T> {
    fn clone(&self) -> Self {
        Self {
            chunks: Arc::clone(&self.chunks),
        }
    }
}

impl<T> Default for CollectingItemWriter<T> {
    fn default() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> CollectingItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Vec<T>> {
        self.chunks.lock().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl<T> ItemWriter<T> for CollectingItemWriter<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn write(&self, items: &[T], transaction: &mut ChunkTransaction) -> ItemResult<()> {
        let chunks = Arc::clone(&self.chunks);
        let staged = items.to_vec();
        transaction.on_commit(move || chunks.lock().push(staged));
        Ok(())
    }
}
