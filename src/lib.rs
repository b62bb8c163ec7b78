#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Batch
//!
//! Chunk-oriented batch job runner with restartable executions.
//!
//! ## Overview
//!
//! A job is an ordered list of steps. A chunk-oriented step reads records
//! lazily, processes them on a bounded worker pool, and commits them to a sink
//! in fixed-size chunks. Every commit checkpoints the reader position into the
//! job repository, so a FAILED or STOPPED execution restarts exactly after the
//! last committed chunk.
//!
//! ## Architecture
//!
//! - **Chunk pipeline** ([`step::ChunkPipeline`]): read, process, write with
//!   skip and retry policies
//! - **Step executor** ([`step::StepExecutor`]): restart context,
//!   `allow_start_if_complete`, `start_limit`, per-commit persistence
//! - **State machine** ([`state_machine`]): STARTING → STARTED → COMPLETED,
//!   FAILED or STOPPED, with optimistic-lock aware transitions
//! - **Job repository** ([`repository`]): in-memory or PostgreSQL store of
//!   instances, executions and execution contexts
//! - **Trigger adapter** ([`trigger`]): launches a job for every new inbound file
//!
//! ## Module Organization
//!
//! - [`item`] - reader, processor and writer capabilities and implementations
//! - [`step`] - chunk and tasklet steps, policies, the step executor
//! - [`job`] - job definitions, runner and operator
//! - [`bootstrap`] - config-driven construction of the whole system
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_batch::item::{CollectingItemWriter, ItemReader, ItemResult, ListItemReader, PassThroughItemProcessor};
//! use tasker_batch::job::{Job, JobOperator};
//! use tasker_batch::models::{JobParameters, JobParametersBuilder};
//! use tasker_batch::registry::JobRegistry;
//! use tasker_batch::repository::InMemoryJobRepository;
//! use tasker_batch::step::ChunkOrientedStep;
//!
//! # async fn example() -> tasker_batch::Result<()> {
//! fn numbers(_: &JobParameters) -> ItemResult<Box<dyn ItemReader<u32>>> {
//!     Ok(Box::new(ListItemReader::new((1..=10).collect())))
//! }
//!
//! let step = ChunkOrientedStep::<u32, u32>::builder(
//!     "copy",
//!     Arc::new(numbers),
//!     Arc::new(PassThroughItemProcessor),
//!     Arc::new(CollectingItemWriter::new()),
//! )
//! .with_chunk_size(5)
//! .build();
//!
//! let registry = Arc::new(JobRegistry::new());
//! registry.register(Job::builder("copyJob").with_step(Arc::new(step)).build()?)?;
//! let operator = JobOperator::new(Arc::new(InMemoryJobRepository::new()), registry);
//!
//! let params = JobParametersBuilder::new().add_string("file", "/in/numbers.csv").to_job_parameters();
//! let execution = operator.launch("copyJob", &params).await?;
//! println!("{} finished {}", execution.id, execution.status);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod item;
pub mod job;
pub mod logging;
pub mod models;
pub mod registry;
pub mod repository;
pub mod state_machine;
pub mod step;
pub mod trigger;

pub use bootstrap::{BatchBootstrap, BatchSystemHandle};
pub use config::{BatchConfig, ConfigManager};
pub use error::{BatchError, Result};
pub use item::{ItemError, ItemErrorKind, ItemProcessor, ItemReader, ItemWriter};
pub use job::{Job, JobOperator};
pub use models::{ExecutionSummary, JobExecution, JobParameters, JobParametersBuilder, StepExecution};
pub use repository::{InMemoryJobRepository, JobRepository, PgJobRepository};
pub use state_machine::BatchStatus;
pub use step::{ChunkOrientedStep, StepExecutor};
pub use trigger::TriggerAdapter;
