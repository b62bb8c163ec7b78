//! # Item Capabilities
//!
//! The three capability traits a chunk-oriented step is assembled from, plus
//! the record-level error type every stage reports failures with.
//!
//! ## Overview
//!
//! - [`ItemReader`] yields records one at a time and tracks a restartable position
//! - [`ItemProcessor`] transforms a record, filters it (`Ok(None)`), or fails it
//! - [`ItemWriter`] writes a whole chunk at once inside the chunk's
//!   [`ChunkTransaction`], so the writes become durable only together with the
//!   checkpoint that records them
//!
//! The chunk pipeline depends only on these traits. Concrete sources and sinks
//! ([`DelimitedItemReader`], [`PgBatchItemWriter`]) and the logging decorators
//! live in the submodules.

pub mod chunk;
pub mod delimited_reader;
pub mod field_set;
pub mod logging;
pub mod sql_writer;
pub mod support;

pub use chunk::Chunk;
pub use delimited_reader::{DelimitedItemReader, DelimitedItemReaderBuilder};
pub use field_set::{
    FieldSet, FieldSetMapper, FieldSpec, FieldType, FieldValue, Record, RecordMapper,
    SqlParameterSource,
};
pub use logging::{LoggingItemProcessor, LoggingItemReader, LoggingItemWriter};
pub use sql_writer::PgBatchItemWriter;
pub use support::{
    CollectingItemWriter, FnItemProcessor, ListItemReader, PassThroughItemProcessor,
    RejectingRecordProcessor,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{ExecutionContext, JobParameters};
use crate::repository::ChunkTransaction;

/// Classification that drives retry and skip decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemErrorKind {
    /// The record itself is bad (malformed line, constraint violation); skippable
    Invalid,
    /// The record may succeed on another attempt; retried, then skippable
    Transient,
    /// Never retried or skipped; fails the step
    Fatal,
}

impl fmt::Display for ItemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "invalid",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        })
    }
}

/// Record-level failure raised by a reader, processor or writer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} item error: {message}")]
pub struct ItemError {
    pub kind: ItemErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ItemErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::Invalid, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ItemErrorKind::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ItemErrorKind::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ItemErrorKind::Fatal
    }
}

impl From<std::io::Error> for ItemError {
    fn from(err: std::io::Error) -> Self {
        Self::fatal(format!("I/O error: {err}"))
    }
}

impl From<csv::Error> for ItemError {
    fn from(err: csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(_) => Self::fatal(format!("CSV I/O error: {err}")),
            _ => Self::invalid(format!("Malformed input: {err}")),
        }
    }
}

impl From<sqlx::Error> for ItemError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if !matches!(db.kind(), sqlx::error::ErrorKind::Other) => {
                // unique, foreign key, not-null and check violations are properties of the row
                Self::invalid(format!("Rejected by database: {db}"))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::transient(format!("Database unavailable: {err}"))
            }
            _ => Self::fatal(format!("Database error: {err}")),
        }
    }
}

pub type ItemResult<T> = Result<T, ItemError>;

/// Source of records with a restartable position
#[async_trait]
pub trait ItemReader<T>: Send {
    /// Position the reader; `context` holds the state saved by [`ItemReader::update`]
    async fn open(&mut self, _context: &ExecutionContext) -> ItemResult<()> {
        Ok(())
    }

    /// Next record, or `None` at end of input
    async fn read(&mut self) -> ItemResult<Option<T>>;

    /// Save the current position; called only after a chunk committed
    fn update(&self, _context: &mut ExecutionContext) {}

    async fn close(&mut self) -> ItemResult<()> {
        Ok(())
    }
}

/// Record transformation; `Ok(None)` filters the record out of the chunk
#[async_trait]
pub trait ItemProcessor<I, O>: Send + Sync {
    async fn process(&self, item: &I) -> ItemResult<Option<O>>;
}

/// Chunk sink; a call either writes every item or fails as a whole
///
/// Writes must go through `transaction`: execute on its database transaction
/// when there is one, or defer the effect with [`ChunkTransaction::on_commit`].
/// A failed call must leave nothing behind in `transaction`, because the
/// pipeline may retry or scan within the same chunk.
#[async_trait]
pub trait ItemWriter<T>: Send + Sync {
    async fn write(&self, items: &[T], transaction: &mut ChunkTransaction) -> ItemResult<()>;
}

/// Builds a fresh reader for each step execution from the job parameters
pub trait ItemReaderFactory<T>: Send + Sync {
    fn create(&self, parameters: &JobParameters) -> ItemResult<Box<dyn ItemReader<T>>>;
}

impl<T, F> ItemReaderFactory<T> for F
where
    F: Fn(&JobParameters) -> ItemResult<Box<dyn ItemReader<T>>> + Send + Sync,
{
    fn create(&self, parameters: &JobParameters) -> ItemResult<Box<dyn ItemReader<T>>> {
        self(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind() {
        let err = ItemError::transient("connection reset");
        assert_eq!(err.to_string(), "transient item error: connection reset");
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_csv_parse_errors_are_invalid() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(&b"ok,\xff\xfe\n"[..]);
        let mut record = csv::StringRecord::new();
        let err: ItemError = reader.read_record(&mut record).unwrap_err().into();
        assert_eq!(err.kind, ItemErrorKind::Invalid);
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: ItemError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind, ItemErrorKind::Transient);
    }

    #[test]
    fn test_kind_deserializes_from_lowercase() {
        let kind: ItemErrorKind = serde_json::from_str("\"fatal\"").unwrap();
        assert_eq!(kind, ItemErrorKind::Fatal);
    }
}
